// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for constants module

use streamforge::VirtualCameraOutput;
use streamforge::constants::{output, sync, timing};
use streamforge::media::{FORMAT_TABLE, MediaKind};

#[test]
fn test_output_variants() {
    assert_eq!(VirtualCameraOutput::ALL.len(), 2);
    for output in VirtualCameraOutput::ALL {
        assert!(!output.display_name().is_empty());
    }
}

#[test]
fn test_default_audio_block_is_short() {
    let block_ms = output::DEFAULT_BLOCK_FRAMES as u64 * 1000 / output::DEFAULT_SAMPLE_RATE as u64;
    assert_eq!(block_ms, 10);
}

#[test]
fn test_lag_thresholds_ordering() {
    assert!(sync::VIDEO_LAG_THRESHOLD < sync::AUDIO_LAG_THRESHOLD);
    assert!(sync::DRIFT_TOLERANCE < sync::VIDEO_LAG_THRESHOLD);
    assert!(sync::HOLD_RECHECK_INTERVAL < sync::AUDIO_DELIVER_WINDOW);
}

#[test]
fn test_read_slice_fits_teardown_bound() {
    assert!(timing::READ_TIMEOUT < timing::TEARDOWN_TIMEOUT);
}

#[test]
fn test_format_table_covers_both_kinds() {
    assert!(FORMAT_TABLE.iter().any(|r| r.kind == MediaKind::VideoFile));
    assert!(FORMAT_TABLE.iter().any(|r| r.kind == MediaKind::AudioFile));
    assert!(FORMAT_TABLE.iter().all(|r| r.kind != MediaKind::LiveCamera));
}
