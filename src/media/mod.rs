// SPDX-License-Identifier: GPL-3.0-only

//! Media model shared by decoders, the sync engine and the device sinks
//!
//! # Modules
//!
//! - [`types`]: descriptors, decoded frames and audio blocks
//! - [`allow_list`]: declarative table of accepted input formats
//! - [`source`]: pull-source contract implemented by decoder backends

pub mod allow_list;
pub mod source;
pub mod types;

pub use allow_list::{FORMAT_TABLE, FormatRule, classify};
pub use source::{
    AudioSource, MediaSource, OpenedMedia, SourceFactory, SourceRead, VideoSource,
};
pub use types::{
    AudioBlock, AudioFormat, Frame, FrameData, MediaDescriptor, MediaKind, MediaUnit,
    PixelFormat, StreamKind, VideoFormat,
};
