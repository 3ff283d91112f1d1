// SPDX-License-Identifier: GPL-3.0-only

//! Playback state machine values and the shared session
//!
//! All mutable session state (playback state, clock, playlist cursor) lives
//! in one [`Session`] behind one mutex. Command handlers mutate it with short
//! critical sections and bump `revision`; pacing loops copy what they need
//! each cycle and suspend on the condition variable without holding the lock.

use super::clock::ClockState;
use super::playlist::{EntryId, Playlist};
use crate::errors::{ErrorKind, PlaybackError};
use crate::media::{MediaDescriptor, MediaKind, StreamKind};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PlaybackState {
    /// No source open
    Stopped,
    /// Tearing down the previous source and opening the next
    Loading,
    /// Clock running, units emitted
    Playing,
    /// Source open, clock frozen
    Paused,
    /// Terminal failure; `reset` or `stop` returns to `Stopped`
    Error,
}

impl PlaybackState {
    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackState::Playing)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, PlaybackState::Paused)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, PlaybackState::Stopped)
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Why the session is in `Error`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub reason: ErrorKind,
    pub message: String,
    /// Stream whose pacing loop failed, if the failure was mid-playback
    pub stream: Option<StreamKind>,
}

impl ErrorReport {
    pub fn new(error: &PlaybackError, stream: Option<StreamKind>) -> Self {
        Self {
            reason: error.kind(),
            message: error.to_string(),
            stream,
        }
    }
}

/// Identity of the entry being played
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentEntry {
    pub id: EntryId,
    pub path: PathBuf,
    pub kind: MediaKind,
}

/// Pacing counters for the active entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub video_emitted: u64,
    pub video_dropped: u64,
    pub audio_emitted: u64,
    pub audio_dropped: u64,
    /// Times a lagging stream was re-anchored to the clock
    pub corrections: u64,
    /// Most recent video-minus-audio emission lateness
    pub last_drift_ms: i64,
}

/// Read-only view handed to front-ends
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub state: PlaybackState,
    pub current: Option<CurrentEntry>,
    pub position_ms: u64,
    pub duration_ms: Option<u64>,
    pub error: Option<ErrorReport>,
    pub playlist_len: usize,
    pub looping: bool,
    pub shuffle: bool,
    pub sync: SyncStats,
}

/// The entry whose sources are open
#[derive(Debug, Clone)]
pub struct ActiveEntry {
    pub id: EntryId,
    pub descriptor: MediaDescriptor,
    pub duration: Option<Duration>,
    pub seekable: bool,
}

/// Pending reposition for the pacing loops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekRequest {
    pub seq: u64,
    pub position: Duration,
}

/// Mutable session state guarded by [`SharedSession`]
#[derive(Debug)]
pub struct Session {
    pub state: PlaybackState,
    pub clock: ClockState,
    pub playlist: Playlist,
    pub active: Option<ActiveEntry>,
    pub error: Option<ErrorReport>,
    /// Bumped whenever the active source changes; stale pacing loops exit
    pub generation: u64,
    /// Bumped on every mutation pacing loops may care about
    pub revision: u64,
    pub seek: Option<SeekRequest>,
    /// Enter `Playing` instead of `Paused` once loading completes
    pub resume_after_load: bool,
}

impl Session {
    pub fn new(playlist: Playlist) -> Self {
        Self {
            state: PlaybackState::Stopped,
            clock: ClockState::new(),
            playlist,
            active: None,
            error: None,
            generation: 0,
            revision: 0,
            seek: None,
            resume_after_load: false,
        }
    }

    pub fn snapshot(&self, sync: SyncStats) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state,
            current: self.active.as_ref().map(|active| CurrentEntry {
                id: active.id,
                path: active.descriptor.path.clone(),
                kind: active.descriptor.kind,
            }),
            position_ms: match self.state {
                PlaybackState::Stopped => 0,
                _ => self.clock.position().as_millis() as u64,
            },
            duration_ms: self
                .active
                .as_ref()
                .and_then(|a| a.duration)
                .map(|d| d.as_millis() as u64),
            error: self.error.clone(),
            playlist_len: self.playlist.len(),
            looping: self.playlist.looping(),
            shuffle: self.playlist.shuffle(),
            sync,
        }
    }
}

/// What a pacing loop needs from the session each cycle
#[derive(Debug, Clone, Copy)]
pub struct CycleView {
    pub clock: ClockState,
    pub revision: u64,
    pub seek: Option<SeekRequest>,
}

impl CycleView {
    pub fn position(&self) -> Duration {
        self.clock.position_at(Instant::now())
    }

    pub fn running(&self) -> bool {
        self.clock.is_running()
    }
}

/// Session mutex plus the condition variable pacing loops suspend on
#[derive(Debug)]
pub struct SharedSession {
    session: Mutex<Session>,
    changed: Condvar,
}

impl SharedSession {
    pub fn new(session: Session) -> Self {
        Self {
            session: Mutex::new(session),
            changed: Condvar::new(),
        }
    }

    /// Lock the session; a poisoned lock still yields the state
    pub fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a mutation and wake every suspended pacing loop
    pub fn notify(&self, session: &mut Session) {
        session.revision = session.revision.wrapping_add(1);
        self.changed.notify_all();
    }

    /// Copy the cycle view, or `None` once `generation` is stale
    pub fn observe(&self, generation: u64) -> Option<CycleView> {
        let session = self.lock();
        (session.generation == generation).then(|| CycleView {
            clock: session.clock,
            revision: session.revision,
            seek: session.seek,
        })
    }

    /// Suspend until the session changes past `revision` or `timeout` elapses
    ///
    /// The lock is released while waiting.
    pub fn wait_for_change(&self, revision: u64, timeout: Duration) {
        let guard = self.lock();
        let _unused = self
            .changed
            .wait_timeout_while(guard, timeout, |s| s.revision == revision)
            .unwrap_or_else(|e| e.into_inner());
    }
}
