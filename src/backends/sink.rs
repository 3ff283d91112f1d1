// SPDX-License-Identifier: GPL-3.0-only

//! Device sink contract
//!
//! A sink accepts one decoded unit per call and forwards it to a virtual
//! device. Writes must not block for longer than one unit's duration; a
//! failed write is reported to the pacing loop, which applies the retry
//! policy.

use crate::errors::PlaybackResult;
use crate::media::{AudioBlock, Frame};
use std::sync::{Arc, Mutex};

pub trait DeviceSink<U>: Send {
    /// Label used in logs
    fn name(&self) -> &str;

    /// Deliver a unit; `DeviceUnavailable` when the device is gone
    fn write(&mut self, unit: &U) -> PlaybackResult<()>;

    /// Release the device; the next write may reopen it
    fn close(&mut self) {}
}

/// Sink handle shared between the controller and a pacing loop
pub type SharedSink<U> = Arc<Mutex<Box<dyn DeviceSink<U>>>>;

pub type VideoSink = SharedSink<Frame>;
pub type AudioSink = SharedSink<AudioBlock>;

/// Wrap a sink for sharing
pub fn shared<U, S>(sink: S) -> SharedSink<U>
where
    S: DeviceSink<U> + 'static,
{
    Arc::new(Mutex::new(Box::new(sink)))
}
