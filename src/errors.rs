// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the playback engine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Result type alias using PlaybackError
pub type PlaybackResult<T> = Result<T, PlaybackError>;

/// Main engine error type
///
/// End of stream is deliberately absent: it is a normal completion signal
/// reported through [`crate::media::SourceRead::EndOfStream`].
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackError {
    /// Path does not exist
    NotFound(PathBuf),
    /// Extension, container or device type not on the allow-list
    UnsupportedFormat(String),
    /// Decoder failed to open or failed mid-stream
    DecodeError(String),
    /// Source cannot seek (live camera)
    NotSeekable,
    /// Virtual sink missing or disconnected
    DeviceUnavailable(String),
    /// Cursor is at the boundary and looping is disabled
    EndOfPlaylist,
    /// Playlist has no current entry
    Empty,
    /// Command is not valid in the current state
    InvalidState(String),
    /// Configuration errors
    Config(String),
    /// Filesystem errors
    Io(String),
}

/// Fieldless mirror of [`PlaybackError`] for reports and snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    UnsupportedFormat,
    DecodeError,
    NotSeekable,
    DeviceUnavailable,
    EndOfPlaylist,
    Empty,
    InvalidState,
    Config,
    Io,
}

impl PlaybackError {
    /// Get the error kind without its payload
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlaybackError::NotFound(_) => ErrorKind::NotFound,
            PlaybackError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            PlaybackError::DecodeError(_) => ErrorKind::DecodeError,
            PlaybackError::NotSeekable => ErrorKind::NotSeekable,
            PlaybackError::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            PlaybackError::EndOfPlaylist => ErrorKind::EndOfPlaylist,
            PlaybackError::Empty => ErrorKind::Empty,
            PlaybackError::InvalidState(_) => ErrorKind::InvalidState,
            PlaybackError::Config(_) => ErrorKind::Config,
            PlaybackError::Io(_) => ErrorKind::Io,
        }
    }
}

impl fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackError::NotFound(path) => write!(f, "Not found: {}", path.display()),
            PlaybackError::UnsupportedFormat(msg) => write!(f, "Unsupported format: {}", msg),
            PlaybackError::DecodeError(msg) => write!(f, "Decode error: {}", msg),
            PlaybackError::NotSeekable => write!(f, "Source is not seekable"),
            PlaybackError::DeviceUnavailable(msg) => write!(f, "Device unavailable: {}", msg),
            PlaybackError::EndOfPlaylist => write!(f, "End of playlist"),
            PlaybackError::Empty => write!(f, "Playlist is empty"),
            PlaybackError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            PlaybackError::Config(msg) => write!(f, "Configuration error: {}", msg),
            PlaybackError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl std::error::Error for PlaybackError {}

impl From<std::io::Error> for PlaybackError {
    fn from(err: std::io::Error) -> Self {
        PlaybackError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PlaybackError {
    fn from(err: serde_json::Error) -> Self {
        PlaybackError::Config(err.to_string())
    }
}

impl From<gstreamer::glib::Error> for PlaybackError {
    fn from(err: gstreamer::glib::Error) -> Self {
        PlaybackError::DecodeError(err.to_string())
    }
}
