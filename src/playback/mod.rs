// SPDX-License-Identifier: GPL-3.0-only

//! Playback engine
//!
//! ```text
//! PlaybackController ──▶ Playlist ──▶ SourceFactory ──▶ SyncEngine ──▶ DeviceSink
//!        │                                                  ▲
//!        └──────────── SharedSession (state, clock) ────────┘
//! ```
//!
//! # Modules
//!
//! - [`controller`]: command surface and state machine
//! - [`playlist`]: ordered queue with loop/shuffle policies
//! - [`clock`]: pausable logical clock
//! - [`state`]: state values, status snapshots and the shared session lock
//! - [`sync`]: per-stream pacing loops and drift monitoring
//! - [`worker`]: pacing loop thread lifecycle

pub mod clock;
pub mod controller;
pub mod playlist;
pub mod state;
pub mod sync;
pub mod worker;

pub use clock::ClockState;
pub use controller::PlaybackController;
pub use playlist::{EntryId, LoadReport, Playlist, PlaylistEntry, Rejection};
pub use state::{CurrentEntry, ErrorReport, PlaybackState, StatusSnapshot, SyncStats};
pub use sync::{SyncEngine, SyncTuning};
