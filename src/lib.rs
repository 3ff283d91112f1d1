// SPDX-License-Identifier: GPL-3.0-only

//! StreamForge - play media into virtual camera and microphone devices
//!
//! Decodes a playlist of video files, audio files and live cameras, paces
//! the decoded units against a shared logical clock and publishes them to
//! virtual devices other applications can select as a webcam or microphone.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`playback`]: controller state machine, playlist, clock and sync engine
//! - [`media`]: descriptors, decoded units and the source contract
//! - [`backends`]: GStreamer decoders and virtual device sinks
//! - [`config`]: user configuration handling
//! - [`testing`]: fake sources and sinks for exercising the engine
//!
//! # Example
//!
//! ```ignore
//! let config = Config::load()?;
//! let factory = Arc::new(GstSourceFactory::new(&config));
//! let camera = sink::shared(VirtualCameraSink::new(&config));
//! let microphone = sink::shared(VirtualMicrophoneSink::new(&config));
//! let controller = PlaybackController::new(config, factory, camera, microphone)?;
//! controller.load(&["intro.mp4", "talk.mkv"]);
//! controller.play()?;
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod media;
pub mod playback;
pub mod testing;

// Re-export commonly used types
pub use config::Config;
pub use constants::VirtualCameraOutput;
pub use errors::{ErrorKind, PlaybackError, PlaybackResult};
pub use playback::{
    EntryId, LoadReport, PlaybackController, PlaybackState, PlaylistEntry, StatusSnapshot,
};
