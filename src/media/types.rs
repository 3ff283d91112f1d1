// SPDX-License-Identifier: GPL-3.0-only

//! Shared media types: descriptors, decoded frames and audio blocks

use gstreamer::buffer::{MappedBuffer, Readable};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// What a playlist entry points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    /// Container with a video track and optionally an audio track
    VideoFile,
    /// Audio-only file
    AudioFile,
    /// V4L2 capture device, unbounded and not seekable
    LiveCamera,
}

impl MediaKind {
    /// Whether the source has a known end and supports seeking
    pub fn is_live(&self) -> bool {
        matches!(self, MediaKind::LiveCamera)
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::VideoFile => write!(f, "video"),
            MediaKind::AudioFile => write!(f, "audio"),
            MediaKind::LiveCamera => write!(f, "camera"),
        }
    }
}

/// Which pacing loop a unit or event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Video,
    Audio,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Video => write!(f, "video"),
            StreamKind::Audio => write!(f, "audio"),
        }
    }
}

/// Validated reference to a file or device, produced once at load time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaDescriptor {
    /// Absolute path of the file or device node
    pub path: PathBuf,
    pub kind: MediaKind,
    /// Demuxer/parser expected for this container (informational for decodebin)
    pub decoder_hint: &'static str,
}

impl MediaDescriptor {
    pub fn new(path: impl Into<PathBuf>, kind: MediaKind, decoder_hint: &'static str) -> Self {
        Self {
            path: path.into(),
            kind,
            decoder_hint,
        }
    }
}

/// Pixel layout of frames pushed to the virtual camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit RGBA, 4 bytes per pixel
    #[default]
    Rgba,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgba => 4,
        }
    }
}

/// Fixed video output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    #[serde(default)]
    pub pixel_format: PixelFormat,
}

impl VideoFormat {
    /// Duration of one frame at the output framerate
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }

    /// Expected byte length of one tightly packed frame
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_format.bytes_per_pixel()
    }
}

/// Fixed audio output format (interleaved 32-bit float)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    /// Playback duration of `samples` interleaved values
    pub fn duration_of(&self, samples: usize) -> Duration {
        let frames = samples as u64 / self.channels.max(1) as u64;
        Duration::from_nanos(frames * 1_000_000_000 / self.sample_rate.max(1) as u64)
    }
}

/// Frame data storage - either pre-copied bytes or zero-copy GStreamer buffer
///
/// The `Mapped` variant keeps the GStreamer buffer mapped and alive until all
/// references are dropped.
#[derive(Clone)]
pub enum FrameData {
    /// Pre-copied bytes (test sources, converted frames)
    Copied(Arc<[u8]>),
    /// Zero-copy mapped GStreamer buffer
    Mapped(Arc<MappedBuffer<Readable>>),
}

impl FrameData {
    /// Create FrameData from a mapped GStreamer buffer (zero-copy)
    pub fn from_mapped_buffer(buffer: MappedBuffer<Readable>) -> Self {
        FrameData::Mapped(Arc::new(buffer))
    }

    pub fn len(&self) -> usize {
        self.as_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<u8>> for FrameData {
    fn from(data: Vec<u8>) -> Self {
        FrameData::Copied(Arc::from(data.into_boxed_slice()))
    }
}

impl std::fmt::Debug for FrameData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameData::Copied(data) => write!(f, "FrameData::Copied({} bytes)", data.len()),
            FrameData::Mapped(buf) => write!(f, "FrameData::Mapped({} bytes)", buf.len()),
        }
    }
}

impl AsRef<[u8]> for FrameData {
    fn as_ref(&self) -> &[u8] {
        match self {
            FrameData::Copied(data) => data.as_ref(),
            FrameData::Mapped(buf) => buf.as_slice(),
        }
    }
}

impl std::ops::Deref for FrameData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_ref()
    }
}

/// A decoded video image
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: FrameData,
    pub format: VideoFormat,
    /// Presentation timestamp relative to stream start
    pub timestamp: Duration,
}

/// A decoded block of interleaved samples
#[derive(Debug, Clone)]
pub struct AudioBlock {
    pub samples: Arc<[f32]>,
    pub format: AudioFormat,
    /// Presentation timestamp relative to stream start
    pub timestamp: Duration,
}

impl AudioBlock {
    /// Playback duration of this block
    pub fn duration(&self) -> Duration {
        self.format.duration_of(self.samples.len())
    }

    /// Raw little-endian bytes for the sink
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.samples)
    }
}

/// Common view over decoded units used by the pacing loops
pub trait MediaUnit: Send + 'static {
    const STREAM: StreamKind;

    fn timestamp(&self) -> Duration;
}

impl MediaUnit for Frame {
    const STREAM: StreamKind = StreamKind::Video;

    fn timestamp(&self) -> Duration {
        self.timestamp
    }
}

impl MediaUnit for AudioBlock {
    const STREAM: StreamKind = StreamKind::Audio;

    fn timestamp(&self) -> Duration {
        self.timestamp
    }
}
