// SPDX-License-Identifier: GPL-3.0-only

//! End-to-end tests for the playback controller using fake sources and sinks

use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use streamforge::backends::devices;
use streamforge::backends::sink::{self, AudioSink, VideoSink};
use streamforge::media::StreamKind;
use streamforge::testing::{
    Emission, FailingSink, FakeMedia, FakeSourceFactory, RecordingSink, SinkLog,
};
use streamforge::{Config, ErrorKind, PlaybackController, PlaybackError, PlaybackState};
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(5);

struct Rig {
    controller: PlaybackController,
    factory: Arc<FakeSourceFactory>,
    video: SinkLog,
    audio: SinkLog,
    dir: TempDir,
}

impl Rig {
    fn new(factory: FakeSourceFactory) -> Self {
        Self::with_config(factory, Config::default())
    }

    fn with_config(factory: FakeSourceFactory, config: Config) -> Self {
        let (video_sink, video) = RecordingSink::new("video");
        let (audio_sink, audio) = RecordingSink::new("audio");
        let mut rig = Self::with_sinks(
            factory,
            config,
            sink::shared(video_sink),
            sink::shared(audio_sink),
        );
        rig.video = video;
        rig.audio = audio;
        rig
    }

    fn with_sinks(
        factory: FakeSourceFactory,
        config: Config,
        video_sink: VideoSink,
        audio_sink: AudioSink,
    ) -> Self {
        let factory = Arc::new(factory);
        let controller =
            PlaybackController::new(config, factory.clone(), video_sink, audio_sink).unwrap();
        Self {
            controller,
            factory,
            video: SinkLog::default(),
            audio: SinkLog::default(),
            dir: TempDir::new().unwrap(),
        }
    }

    /// Create empty files in the rig's directory
    fn files(&self, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = self.dir.path().join(name);
                File::create(&path).unwrap();
                path
            })
            .collect()
    }

    fn state(&self) -> PlaybackState {
        self.controller.status().state
    }

    fn wait_for_state(&self, state: PlaybackState) -> bool {
        wait_until(WAIT, || self.state() == state)
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn clip(ms: u64) -> FakeMedia {
    FakeMedia::clip(Duration::from_millis(ms))
}

#[test]
fn test_load_skips_missing_paths_and_settles_paused() {
    let rig = Rig::new(FakeSourceFactory::new(clip(5_000)));
    let mut paths = rig.files(&["a.mp4"]);
    paths.push(rig.dir.path().join("missing.mp4"));
    paths.extend(rig.files(&["b.wav"]));

    let report = rig.controller.load(&paths);

    assert_eq!(report.accepted.len(), 2);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].reason, ErrorKind::NotFound);
    assert_eq!(report.rejected[0].path, paths[1]);

    let status = rig.controller.status();
    assert_eq!(status.state, PlaybackState::Paused);
    assert_eq!(status.playlist_len, 2);
    assert_eq!(status.current.map(|c| c.id), Some(report.accepted[0]));
}

#[test]
fn test_unsupported_extension_never_changes_state() {
    let rig = Rig::new(FakeSourceFactory::new(clip(5_000)));
    let notes = rig.files(&["notes.txt"]);

    let report = rig.controller.load(&notes);
    assert!(report.accepted.is_empty());
    assert_eq!(report.rejected[0].reason, ErrorKind::UnsupportedFormat);
    assert_eq!(rig.state(), PlaybackState::Stopped);

    rig.controller.load(&rig.files(&["a.mp4"]));
    rig.controller.play().unwrap();
    assert_eq!(rig.state(), PlaybackState::Playing);

    rig.controller.load(&notes);
    assert_eq!(rig.state(), PlaybackState::Playing);
    assert_eq!(rig.controller.status().playlist_len, 1);
}

#[test]
fn test_directory_load_expands_supported_files() {
    let rig = Rig::new(FakeSourceFactory::new(clip(5_000)));
    fs::create_dir(rig.dir.path().join("nested")).unwrap();
    rig.files(&["b.mkv", "readme.txt", "nested/a.flac"]);

    let report = rig.controller.load(&[rig.dir.path()]);
    assert_eq!(report.accepted.len(), 2);
    assert!(report.rejected.is_empty());
}

#[test]
fn test_play_on_empty_playlist_fails() {
    let rig = Rig::new(FakeSourceFactory::new(clip(5_000)));
    assert_eq!(rig.controller.play(), Err(PlaybackError::Empty));
    assert_eq!(rig.state(), PlaybackState::Stopped);
}

#[test]
fn test_playlist_plays_through_and_stops() {
    let rig = Rig::new(FakeSourceFactory::new(clip(90)));
    rig.controller.load(&rig.files(&["a.mp4", "b.mp4"]));
    rig.controller.play().unwrap();

    assert!(wait_until(WAIT, || rig.factory.opens() == 2
        && rig.state() == PlaybackState::Stopped));
    assert!(!rig.video.is_empty());
    assert!(!rig.audio.is_empty());
    assert!(rig.video.closes() >= 1);
    assert!(wait_until(WAIT, || rig.factory.open_handles() == 0));

    let status = rig.controller.status();
    assert_eq!(status.position_ms, 0);
    assert!(status.current.is_none());
}

#[test]
fn test_looping_playlist_restarts() {
    let mut config = Config::default();
    config.playlist.looping = true;
    let rig = Rig::with_config(FakeSourceFactory::new(clip(90)), config);
    rig.controller.load(&rig.files(&["a.mp4"]));
    rig.controller.play().unwrap();

    assert!(wait_until(WAIT, || rig.factory.opens() >= 3));
    assert_ne!(rig.state(), PlaybackState::Stopped);
    rig.controller.stop().unwrap();
    assert_eq!(rig.state(), PlaybackState::Stopped);
}

#[test]
fn test_repeat_flag_replays_entry() {
    let rig = Rig::new(FakeSourceFactory::new(clip(90)));
    let report = rig.controller.load(&rig.files(&["a.mp4", "b.mp4"]));
    let first = report.accepted[0];
    rig.controller.set_entry_flags(first, true, false).unwrap();
    rig.controller.play().unwrap();

    assert!(wait_until(WAIT, || rig.factory.opens() >= 3
        && rig.controller.status().current.map(|c| c.id) == Some(first)));
    rig.controller.stop().unwrap();
}

#[test]
fn test_pause_freezes_position() {
    let rig = Rig::new(FakeSourceFactory::new(clip(10_000)));
    rig.controller.load(&rig.files(&["a.mp4"]));
    rig.controller.play().unwrap();
    thread::sleep(Duration::from_millis(150));

    rig.controller.pause().unwrap();
    rig.controller.pause().unwrap();
    let paused_at = rig.controller.status().position_ms;
    assert!(paused_at >= 100);

    thread::sleep(Duration::from_millis(150));
    let status = rig.controller.status();
    assert_eq!(status.state, PlaybackState::Paused);
    assert_eq!(status.position_ms, paused_at);

    rig.controller.play().unwrap();
    assert!(wait_until(WAIT, || rig.controller.status().position_ms > paused_at + 50));
}

#[test]
fn test_units_are_emitted_in_timestamp_order() {
    let rig = Rig::new(FakeSourceFactory::new(clip(400)));
    rig.controller.load(&rig.files(&["a.mp4"]));
    rig.controller.play().unwrap();
    assert!(rig.wait_for_state(PlaybackState::Stopped));

    for log in [&rig.video, &rig.audio] {
        let timestamps = log.timestamps();
        assert!(!timestamps.is_empty());
        assert!(timestamps.windows(2).all(|pair| pair[0] < pair[1]));
    }
}

#[test]
fn test_seek_repositions_clock_and_streams() {
    let rig = Rig::new(FakeSourceFactory::new(clip(5_000)));
    rig.controller.load(&rig.files(&["a.mp4"]));

    rig.controller.seek(Duration::from_secs(2)).unwrap();
    assert_eq!(rig.controller.status().position_ms, 2_000);

    rig.controller.seek(Duration::from_secs(60)).unwrap();
    assert_eq!(rig.controller.status().position_ms, 5_000);

    rig.controller.seek(Duration::from_secs(3)).unwrap();
    rig.controller.play().unwrap();
    assert!(wait_until(WAIT, || rig
        .audio
        .last_timestamp()
        .is_some_and(|t| t >= Duration::from_secs(3))));
    assert!(rig.audio.timestamps().iter().all(|t| *t >= Duration::from_secs(3)));
}

#[test]
fn test_seek_without_active_entry_is_empty() {
    let rig = Rig::new(FakeSourceFactory::new(clip(5_000)));
    assert_eq!(
        rig.controller.seek(Duration::from_secs(1)),
        Err(PlaybackError::Empty)
    );
}

#[test]
fn test_seek_on_live_camera_is_not_seekable() {
    // Needs a real /dev/video* node to pass load-time validation
    let Some(camera) = devices::video_devices().into_iter().next() else {
        return;
    };
    let rig = Rig::new(FakeSourceFactory::new(FakeMedia::endless()));
    let report = rig.controller.load(&[camera.path]);
    assert_eq!(report.accepted.len(), 1);

    rig.controller.play().unwrap();
    assert_eq!(rig.controller.status().duration_ms, None);
    assert_eq!(
        rig.controller.seek(Duration::from_secs(1)),
        Err(PlaybackError::NotSeekable)
    );
    assert_eq!(rig.state(), PlaybackState::Playing);
}

#[test]
fn test_next_at_end_reports_end_of_playlist() {
    let rig = Rig::new(FakeSourceFactory::new(clip(5_000)));
    let report = rig.controller.load(&rig.files(&["a.mp4", "b.mp4"]));

    rig.controller.next().unwrap();
    assert_eq!(rig.state(), PlaybackState::Paused);
    assert_eq!(
        rig.controller.status().current.map(|c| c.id),
        Some(report.accepted[1])
    );

    assert_eq!(rig.controller.next(), Err(PlaybackError::EndOfPlaylist));
    assert_eq!(rig.state(), PlaybackState::Paused);
    assert_eq!(
        rig.controller.status().current.map(|c| c.id),
        Some(report.accepted[1])
    );

    rig.controller.previous().unwrap();
    assert_eq!(
        rig.controller.status().current.map(|c| c.id),
        Some(report.accepted[0])
    );
}

#[test]
fn test_next_keeps_playing_intent() {
    let rig = Rig::new(FakeSourceFactory::new(clip(5_000)));
    rig.controller.load(&rig.files(&["a.mp4", "b.mp4"]));
    rig.controller.play().unwrap();

    rig.controller.next().unwrap();
    assert_eq!(rig.state(), PlaybackState::Playing);
    assert_eq!(rig.factory.opens(), 2);
    // Only the new entry's two streams are open
    assert!(wait_until(WAIT, || rig.factory.open_handles() == 2));
}

#[test]
fn test_failing_audio_sink_enters_error_while_video_continues() {
    let (video_sink, video) = RecordingSink::new("video");
    let (audio_sink, attempts) = FailingSink::always("audio");
    let video_sink: VideoSink = sink::shared(video_sink);
    let audio_sink: AudioSink = sink::shared(audio_sink);
    let rig = Rig::with_sinks(
        FakeSourceFactory::new(clip(10_000)),
        Config::default(),
        video_sink,
        audio_sink,
    );
    rig.controller.load(&rig.files(&["a.mp4"]));
    rig.controller.play().unwrap();

    assert!(rig.wait_for_state(PlaybackState::Error));
    let error = rig.controller.status().error.unwrap();
    assert_eq!(error.reason, ErrorKind::DeviceUnavailable);
    assert_eq!(error.stream, Some(StreamKind::Audio));
    assert!(attempts.load(std::sync::atomic::Ordering::SeqCst) >= 3);

    let emitted = video.len();
    assert!(wait_until(WAIT, || video.len() > emitted + 3));

    assert!(matches!(
        rig.controller.play(),
        Err(PlaybackError::InvalidState(_))
    ));
}

#[test]
fn test_transient_sink_failures_are_retried() {
    let (video_sink, video) = RecordingSink::new("video");
    let (audio_sink, _attempts) = FailingSink::transient("audio", 2);
    let rig = Rig::with_sinks(
        FakeSourceFactory::new(clip(2_000)),
        Config::default(),
        sink::shared(video_sink),
        sink::shared(audio_sink),
    );
    rig.controller.load(&rig.files(&["a.mp4"]));
    rig.controller.play().unwrap();

    assert!(wait_until(WAIT, || video.len() > 10));
    assert_eq!(rig.state(), PlaybackState::Playing);
    assert!(rig.controller.status().error.is_none());
    rig.controller.stop().unwrap();
}

#[test]
fn test_decode_error_mid_stream_enters_error() {
    let rig = Rig::new(FakeSourceFactory::new(clip(10_000).with_video_error_at(5)));
    rig.controller.load(&rig.files(&["a.mp4"]));
    rig.controller.play().unwrap();

    assert!(rig.wait_for_state(PlaybackState::Error));
    let error = rig.controller.status().error.unwrap();
    assert_eq!(error.reason, ErrorKind::DecodeError);
    assert_eq!(error.stream, Some(StreamKind::Video));
    assert!(rig.video.len() <= 5);
}

#[test]
fn test_reset_only_from_error() {
    let factory = FakeSourceFactory::new(clip(5_000)).with_media(
        "broken.mp4",
        clip(5_000).with_open_error(PlaybackError::DecodeError("bad header".into())),
    );
    let rig = Rig::new(factory);

    assert!(matches!(
        rig.controller.reset(),
        Err(PlaybackError::InvalidState(_))
    ));

    let report = rig.controller.load(&rig.files(&["broken.mp4", "good.mp4"]));
    assert_eq!(report.accepted.len(), 2);
    let status = rig.controller.status();
    assert_eq!(status.state, PlaybackState::Error);
    assert_eq!(status.error.map(|e| e.reason), Some(ErrorKind::DecodeError));
    assert!(matches!(
        rig.controller.pause(),
        Err(PlaybackError::InvalidState(_))
    ));

    rig.controller.reset().unwrap();
    let status = rig.controller.status();
    assert_eq!(status.state, PlaybackState::Stopped);
    assert!(status.error.is_none());

    rig.controller.next().unwrap();
    rig.controller.play().unwrap();
    assert_eq!(rig.state(), PlaybackState::Playing);
}

#[test]
fn test_no_handle_leak_across_cycles() {
    let rig = Rig::new(FakeSourceFactory::new(FakeMedia::endless()));
    let paths = rig.files(&["a.mp4", "b.mp4"]);
    rig.controller.load(&paths);

    for _ in 0..5 {
        rig.controller.play().unwrap();
        thread::sleep(Duration::from_millis(30));
        rig.controller.next().ok();
        rig.controller.stop().unwrap();
        assert!(wait_until(WAIT, || rig.factory.open_handles() == 0));
    }
    assert!(rig.factory.opens() >= 5);
}

#[test]
fn test_video_stall_is_corrected_by_dropping() {
    let config = Config::default();
    let lag = config.sync.video_lag_threshold();
    let rig = Rig::with_config(
        FakeSourceFactory::new(clip(3_000).with_video_stall(10, Duration::from_millis(150))),
        config,
    );
    rig.controller.load(&rig.files(&["a.mp4"]));
    rig.controller.play().unwrap();

    assert!(wait_until(WAIT, || rig
        .video
        .last_timestamp()
        .is_some_and(|t| t >= Duration::from_secs(1))));
    let status = rig.controller.status();
    assert!(status.sync.corrections >= 1);
    assert!(status.sync.video_dropped >= 1);

    // Lateness of each emission relative to the first one
    let emissions = rig.video.emissions();
    let first = emissions[0];
    let late: Vec<bool> = emissions
        .iter()
        .map(|e| {
            let wall = e.at.duration_since(first.at);
            let media = e.timestamp.saturating_sub(first.timestamp);
            wall.saturating_sub(media) > lag
        })
        .collect();
    assert!(late.windows(2).all(|pair| !(pair[0] && pair[1])));
    rig.controller.stop().unwrap();
}

#[test]
fn test_drift_settles_within_tolerance_after_a_stall() {
    let config = Config::default();
    let tolerance = config.sync.drift_tolerance();
    let rig = Rig::with_config(
        FakeSourceFactory::new(clip(3_000).with_video_stall(10, Duration::from_millis(300))),
        config,
    );
    rig.controller.load(&rig.files(&["a.mp4"]));
    rig.controller.play().unwrap();

    assert!(wait_until(WAIT, || rig
        .video
        .last_timestamp()
        .is_some_and(|t| t >= Duration::from_millis(1500))));
    let status = rig.controller.status();
    rig.controller.stop().unwrap();

    assert!(status.sync.corrections >= 1);
    assert!(status.sync.last_drift_ms.unsigned_abs() <= tolerance.as_millis() as u64);

    // Block zero leaves as soon as the clock starts, so it marks the origin
    let audio = rig.audio.emissions();
    let video = rig.video.emissions();
    assert_eq!(audio[0].timestamp, Duration::ZERO);
    let origin = audio[0].at;
    let lateness = |e: &Emission| {
        e.at.saturating_duration_since(origin)
            .saturating_sub(e.timestamp)
    };

    // Pair each video emission with the audio block emitted just before it
    let over: Vec<bool> = video
        .iter()
        .filter_map(|v| {
            let a = audio.iter().rev().find(|a| a.at <= v.at)?;
            Some(lateness(v).abs_diff(lateness(a)) > tolerance)
        })
        .collect();
    assert!(!over.is_empty());
    assert!(over.windows(2).all(|pair| !(pair[0] && pair[1])));
}

#[test]
fn test_stop_interrupts_slow_reads_within_teardown() {
    let config = Config::default();
    let teardown = config.teardown_timeout();
    let rig = Rig::with_config(
        FakeSourceFactory::new(
            FakeMedia::endless().with_decode_delay(Duration::from_millis(200)),
        ),
        config,
    );
    rig.controller.load(&rig.files(&["a.mp4"]));
    rig.controller.play().unwrap();
    thread::sleep(Duration::from_millis(300));
    assert_eq!(rig.state(), PlaybackState::Playing);

    let started = Instant::now();
    rig.controller.stop().unwrap();
    let elapsed = started.elapsed();

    assert!(
        elapsed <= teardown + Duration::from_millis(50),
        "stop took {:?}",
        elapsed
    );
    assert_eq!(rig.state(), PlaybackState::Stopped);
    assert!(wait_until(teardown, || rig.factory.open_handles() == 0));
}

#[test]
fn test_stop_is_not_blocked_by_a_slow_open() {
    let teardown = Config::default().teardown_timeout();
    let factory = FakeSourceFactory::new(clip(5_000))
        .with_media("b.mp4", clip(5_000).with_open_delay(Duration::from_secs(2)));
    let rig = Rig::new(factory);
    rig.controller.load(&rig.files(&["a.mp4", "b.mp4"]));
    rig.controller.play().unwrap();

    let controller = &rig.controller;
    thread::scope(|scope| {
        let advance = scope.spawn(move || controller.next());
        assert!(wait_until(WAIT, || rig.state() == PlaybackState::Loading));
        thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        controller.stop().unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed <= teardown, "stop took {:?}", elapsed);
        assert_eq!(rig.state(), PlaybackState::Stopped);

        assert!(advance.join().unwrap().is_ok());
    });

    // The entry that finished opening after the stop is discarded
    let status = rig.controller.status();
    assert_eq!(status.state, PlaybackState::Stopped);
    assert_eq!(status.sync.video_emitted, 0);
    assert!(wait_until(WAIT, || rig.factory.open_handles() == 0));
    assert_eq!(rig.factory.opens(), 2);
}

#[test]
fn test_remove_active_entry_stops() {
    let rig = Rig::new(FakeSourceFactory::new(clip(5_000)));
    let report = rig.controller.load(&rig.files(&["a.mp4", "b.mp4"]));
    rig.controller.play().unwrap();

    rig.controller.remove(report.accepted[1]).unwrap();
    assert_eq!(rig.state(), PlaybackState::Playing);

    rig.controller.remove(report.accepted[0]).unwrap();
    let status = rig.controller.status();
    assert_eq!(status.state, PlaybackState::Stopped);
    assert_eq!(status.playlist_len, 0);

    rig.controller.load(&rig.files(&["c.mp4"]));
    rig.controller.clear();
    assert!(rig.controller.entries().is_empty());
    assert_eq!(rig.state(), PlaybackState::Stopped);
}

#[test]
fn test_subscribers_see_transitions() {
    let rig = Rig::new(FakeSourceFactory::new(clip(5_000)));
    let mut status = rig.controller.subscribe();
    rig.controller.load(&rig.files(&["a.mp4"]));
    rig.controller.play().unwrap();

    assert!(status.has_changed().unwrap());
    assert_eq!(status.borrow_and_update().state, PlaybackState::Playing);

    rig.controller.set_shuffle(true);
    assert!(status.borrow_and_update().shuffle);
    rig.controller.set_loop(true);
    assert!(status.borrow_and_update().looping);
}
