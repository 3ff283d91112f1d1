// SPDX-License-Identifier: GPL-3.0-only

//! Backend layer: decoders in, virtual devices out
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │             Playback / Sync Engine          │
//! └──────────┬───────────────────────┬──────────┘
//!            │ MediaSource           │ DeviceSink
//! ┌──────────┴──────────┐ ┌──────────┴──────────┐
//! │      Decoder        │ │ Virtual Camera      │
//! │ (GStreamer appsink) │ │ Virtual Microphone  │
//! └─────────────────────┘ └─────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`decoder`]: file and camera sources built on GStreamer pipelines
//! - [`devices`]: V4L2 device discovery and sink availability checks
//! - [`sink`]: the [`sink::DeviceSink`] seam used by the pacing loops
//! - [`virtual_camera`]: PipeWire or v4l2loopback video output
//! - [`virtual_microphone`]: PipeWire audio output

pub mod decoder;
pub mod devices;
pub mod gst_utils;
pub mod sink;
pub mod virtual_camera;
pub mod virtual_microphone;
