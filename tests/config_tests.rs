// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use streamforge::{Config, ErrorKind, VirtualCameraOutput};

#[test]
fn test_config_default() {
    let config = Config::default();

    assert!(config.validate().is_ok());
    assert!(!config.playlist.looping);
    assert!(!config.playlist.shuffle);
    assert_eq!(config.output, VirtualCameraOutput::PipeWire);
    assert_eq!(config.sync.drift_tolerance_ms, 40);
    assert_eq!(config.sync.audio_deliver_window_ms, 10);
    assert_eq!(config.sink.max_failures, 3);
    assert_eq!(config.teardown_timeout_ms, 250);
}

#[test]
fn test_config_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");

    let mut config = Config::default();
    config.playlist.looping = true;
    config.output = VirtualCameraOutput::V4L2Loopback;
    config.v4l2loopback_device = Some("/dev/video10".into());
    config.save_to(&path).unwrap();

    assert_eq!(Config::load_from(&path).unwrap(), config);
}

#[test]
fn test_config_load_rejects_invalid_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"video": {"width": 0, "height": 720, "fps": 30}}"#).unwrap();

    let err = Config::load_from(&path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn test_config_load_reports_malformed_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();

    assert_eq!(Config::load_from(&path).unwrap_err().kind(), ErrorKind::Config);
}

#[test]
fn test_config_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load_from(&dir.path().join("absent.json")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}
