// SPDX-License-Identifier: GPL-3.0-only

//! Pull-source contract between decoders and the pacing loops

use super::types::{AudioBlock, Frame, MediaDescriptor, MediaUnit};
use crate::errors::PlaybackResult;
use std::time::Duration;

/// Outcome of a single bounded read
#[derive(Debug)]
pub enum SourceRead<U> {
    /// Next decoded unit
    Unit(U),
    /// Nothing decoded within the timeout; the caller may retry
    Pending,
    /// Stream finished normally
    EndOfStream,
}

/// A decoder producing units of one media kind at the source's native cadence
///
/// Implementations hold an exclusive OS handle while open. `close` must be
/// idempotent and implementations must also release on drop, so a source
/// abandoned on any error path never leaks its handle.
pub trait MediaSource<U: MediaUnit>: Send {
    /// Pull the next unit, blocking for at most `timeout`
    fn read(&mut self, timeout: Duration) -> PlaybackResult<SourceRead<U>>;

    /// Best-effort reposition; live sources return `NotSeekable`
    fn seek(&mut self, position: Duration) -> PlaybackResult<()>;

    /// Release the underlying handle
    fn close(&mut self);
}

pub type VideoSource = Box<dyn MediaSource<Frame>>;
pub type AudioSource = Box<dyn MediaSource<AudioBlock>>;

/// The streams of one opened playlist entry
pub struct OpenedMedia {
    pub descriptor: MediaDescriptor,
    pub video: Option<VideoSource>,
    pub audio: Option<AudioSource>,
    /// Unknown for live sources
    pub duration: Option<Duration>,
}

impl OpenedMedia {
    pub fn seekable(&self) -> bool {
        !self.descriptor.kind.is_live()
    }

    pub fn has_streams(&self) -> bool {
        self.video.is_some() || self.audio.is_some()
    }
}

impl std::fmt::Debug for OpenedMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedMedia")
            .field("descriptor", &self.descriptor)
            .field("video", &self.video.is_some())
            .field("audio", &self.audio.is_some())
            .field("duration", &self.duration)
            .finish()
    }
}

/// Opens playlist entries into decodable streams
///
/// `open` fails with `DecodeError` when the container/codec cannot be decoded
/// or the device is busy.
pub trait SourceFactory: Send + Sync {
    fn open(&self, descriptor: &MediaDescriptor) -> PlaybackResult<OpenedMedia>;
}
