// SPDX-License-Identifier: GPL-3.0-only

//! Logical playback clock
//!
//! Position advances with wall time only while running. Pausing freezes it;
//! resuming re-anchors so paused wall time is never counted.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockState {
    /// Position accumulated up to `anchor`
    base: Duration,
    /// Wall time at which `base` was valid; `None` while paused
    anchor: Option<Instant>,
}

impl ClockState {
    /// Paused clock at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn position(&self) -> Duration {
        self.position_at(Instant::now())
    }

    pub fn position_at(&self, now: Instant) -> Duration {
        match self.anchor {
            Some(anchor) => self.base + now.saturating_duration_since(anchor),
            None => self.base,
        }
    }

    /// Start advancing from the current position
    pub fn resume(&mut self) {
        self.resume_at(Instant::now());
    }

    pub fn resume_at(&mut self, now: Instant) {
        if self.anchor.is_none() {
            self.anchor = Some(now);
        }
    }

    /// Freeze at the current position
    pub fn pause(&mut self) {
        self.pause_at(Instant::now());
    }

    pub fn pause_at(&mut self, now: Instant) {
        if self.anchor.is_some() {
            self.base = self.position_at(now);
            self.anchor = None;
        }
    }

    /// Jump to `position`, keeping the running/paused flag
    pub fn seek(&mut self, position: Duration) {
        self.seek_at(position, Instant::now());
    }

    pub fn seek_at(&mut self, position: Duration, now: Instant) {
        self.base = position;
        if self.anchor.is_some() {
            self.anchor = Some(now);
        }
    }

    /// Paused at zero
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
