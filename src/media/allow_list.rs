// SPDX-License-Identifier: GPL-3.0-only

//! Supported input formats
//!
//! A declarative table mapping file extensions to the media kind and the
//! demuxer/parser GStreamer is expected to pick. Paths are classified once,
//! at load time; nothing downstream branches on extensions again.

use super::types::{MediaDescriptor, MediaKind};
use crate::errors::{PlaybackError, PlaybackResult};
use std::path::Path;

/// One accepted container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatRule {
    pub extension: &'static str,
    pub kind: MediaKind,
    pub decoder_hint: &'static str,
}

const fn rule(extension: &'static str, kind: MediaKind, decoder_hint: &'static str) -> FormatRule {
    FormatRule {
        extension,
        kind,
        decoder_hint,
    }
}

/// Supported file formats
pub const FORMAT_TABLE: &[FormatRule] = &[
    rule("mp4", MediaKind::VideoFile, "qtdemux"),
    rule("mov", MediaKind::VideoFile, "qtdemux"),
    rule("mkv", MediaKind::VideoFile, "matroskademux"),
    rule("webm", MediaKind::VideoFile, "matroskademux"),
    rule("avi", MediaKind::VideoFile, "avidemux"),
    rule("wav", MediaKind::AudioFile, "wavparse"),
    rule("mp3", MediaKind::AudioFile, "mpegaudioparse"),
    rule("flac", MediaKind::AudioFile, "flacparse"),
    rule("ogg", MediaKind::AudioFile, "oggdemux"),
    rule("aac", MediaKind::AudioFile, "aacparse"),
];

/// Device node prefix treated as a live camera
pub const CAMERA_DEVICE_PREFIX: &str = "/dev/video";

/// Decoder hint used for live camera entries
pub const CAMERA_DECODER_HINT: &str = "v4l2src";

/// Find the rule for a file extension (case-insensitive)
pub fn lookup(extension: &str) -> Option<&'static FormatRule> {
    let extension = extension.to_ascii_lowercase();
    FORMAT_TABLE.iter().find(|r| r.extension == extension)
}

/// Whether the path names a camera device node
pub fn is_camera_device(path: &Path) -> bool {
    path.to_str()
        .is_some_and(|p| p.starts_with(CAMERA_DEVICE_PREFIX))
}

/// Classify a path against the allow-list without touching the filesystem
pub fn classify(path: &Path) -> PlaybackResult<MediaDescriptor> {
    if is_camera_device(path) {
        return Ok(MediaDescriptor::new(
            path,
            MediaKind::LiveCamera,
            CAMERA_DECODER_HINT,
        ));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();

    lookup(extension)
        .map(|rule| MediaDescriptor::new(path, rule.kind, rule.decoder_hint))
        .ok_or_else(|| {
            PlaybackError::UnsupportedFormat(if extension.is_empty() {
                format!("{} has no extension", path.display())
            } else {
                format!("'.{}' is not on the allow-list", extension)
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(lookup("MP4").map(|r| r.kind), Some(MediaKind::VideoFile));
        assert_eq!(lookup("Flac").map(|r| r.kind), Some(MediaKind::AudioFile));
        assert!(lookup("gif").is_none());
    }

    #[test]
    fn test_classify_rejects_unknown_extension() {
        let err = classify(Path::new("/tmp/notes.txt")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);

        let err = classify(Path::new("/tmp/README")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn test_classify_camera_device() {
        let descriptor = classify(Path::new("/dev/video2")).unwrap();
        assert_eq!(descriptor.kind, MediaKind::LiveCamera);
        assert!(descriptor.kind.is_live());
    }

    #[test]
    fn test_extensions_are_unique() {
        for (i, a) in FORMAT_TABLE.iter().enumerate() {
            for b in &FORMAT_TABLE[i + 1..] {
                assert_ne!(a.extension, b.extension);
            }
        }
    }
}
