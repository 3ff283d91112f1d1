// SPDX-License-Identifier: GPL-3.0-only

//! Test doubles for the playback engine
//!
//! [`FakeSourceFactory`] produces synthetic frames and audio blocks at a
//! fixed cadence without touching GStreamer, and counts open handles so
//! tests can assert that torn-down sources are released. [`RecordingSink`]
//! and [`FailingSink`] stand in for the virtual devices.

use crate::backends::sink::DeviceSink;
use crate::errors::{PlaybackError, PlaybackResult};
use crate::media::{
    AudioBlock, AudioFormat, Frame, FrameData, MediaDescriptor, MediaSource, MediaUnit,
    OpenedMedia, PixelFormat, SourceFactory, SourceRead, VideoFormat,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const FAKE_FPS: u32 = 30;
const FAKE_AUDIO: AudioFormat = AudioFormat {
    sample_rate: 48_000,
    channels: 2,
};

/// Script for the sources of one fake entry
#[derive(Debug, Clone)]
pub struct FakeMedia {
    pub video: bool,
    pub audio: bool,
    /// `None` runs until stopped
    pub duration: Option<Duration>,
    pub frame_interval: Duration,
    pub block_duration: Duration,
    /// Time each read spends "decoding"
    pub decode_delay: Duration,
    /// Extra delay before the video unit with this index
    pub video_stall: Option<(usize, Duration)>,
    /// The video unit with this index fails to decode
    pub video_error_at: Option<usize>,
    /// `open` fails with this error
    pub open_error: Option<PlaybackError>,
    /// Time `open` spends before returning
    pub open_delay: Duration,
}

impl FakeMedia {
    /// Video at 30 fps plus 10 ms audio blocks
    pub fn clip(duration: Duration) -> Self {
        Self {
            video: true,
            audio: true,
            duration: Some(duration),
            frame_interval: Duration::from_secs(1) / FAKE_FPS,
            block_duration: Duration::from_millis(10),
            decode_delay: Duration::ZERO,
            video_stall: None,
            video_error_at: None,
            open_error: None,
            open_delay: Duration::ZERO,
        }
    }

    pub fn audio_only(duration: Duration) -> Self {
        Self {
            video: false,
            ..Self::clip(duration)
        }
    }

    pub fn endless() -> Self {
        Self {
            duration: None,
            ..Self::clip(Duration::ZERO)
        }
    }

    pub fn with_video_stall(mut self, index: usize, delay: Duration) -> Self {
        self.video_stall = Some((index, delay));
        self
    }

    pub fn with_video_error_at(mut self, index: usize) -> Self {
        self.video_error_at = Some(index);
        self
    }

    pub fn with_open_error(mut self, error: PlaybackError) -> Self {
        self.open_error = Some(error);
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn with_decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = delay;
        self
    }
}

/// Decrements the open-handle counter when released
#[derive(Debug)]
struct HandleGuard(Arc<AtomicUsize>);

impl HandleGuard {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Source factory serving [`FakeMedia`] scripts keyed by file name
#[derive(Debug)]
pub struct FakeSourceFactory {
    default: FakeMedia,
    overrides: Mutex<HashMap<String, FakeMedia>>,
    handles: Arc<AtomicUsize>,
    opens: AtomicUsize,
}

impl FakeSourceFactory {
    pub fn new(default: FakeMedia) -> Self {
        Self {
            default,
            overrides: Mutex::new(HashMap::new()),
            handles: Arc::new(AtomicUsize::new(0)),
            opens: AtomicUsize::new(0),
        }
    }

    /// Use `media` for entries whose file name is `file_name`
    pub fn with_media(self, file_name: &str, media: FakeMedia) -> Self {
        self.overrides
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(file_name.to_string(), media);
        self
    }

    /// Source handles currently open
    pub fn open_handles(&self) -> usize {
        self.handles.load(Ordering::SeqCst)
    }

    /// Successful `open` calls so far
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn script_for(&self, descriptor: &MediaDescriptor) -> FakeMedia {
        let name = descriptor
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.overrides
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&name)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

impl SourceFactory for FakeSourceFactory {
    fn open(&self, descriptor: &MediaDescriptor) -> PlaybackResult<OpenedMedia> {
        let script = self.script_for(descriptor);
        if !script.open_delay.is_zero() {
            thread::sleep(script.open_delay);
        }
        if let Some(error) = script.open_error {
            return Err(error);
        }
        let live = descriptor.kind.is_live();
        let duration = if live { None } else { script.duration };

        let video = script.video.then(|| {
            Box::new(FakeSource {
                interval: script.frame_interval,
                end: duration,
                decode_delay: script.decode_delay,
                stall: script.video_stall,
                error_at: script.video_error_at,
                live,
                next_index: 0,
                handle: Some(HandleGuard::acquire(&self.handles)),
                make: fake_frame,
            }) as Box<dyn MediaSource<Frame>>
        });
        let audio = script.audio.then(|| {
            Box::new(FakeSource {
                interval: script.block_duration,
                end: duration,
                decode_delay: script.decode_delay,
                stall: None,
                error_at: None,
                live,
                next_index: 0,
                handle: Some(HandleGuard::acquire(&self.handles)),
                make: fake_block,
            }) as Box<dyn MediaSource<AudioBlock>>
        });

        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(OpenedMedia {
            descriptor: descriptor.clone(),
            video,
            audio,
            duration,
        })
    }
}

fn fake_frame(timestamp: Duration, _interval: Duration) -> Frame {
    Frame {
        data: FrameData::from(vec![0u8; 4]),
        format: VideoFormat {
            width: 1,
            height: 1,
            fps: FAKE_FPS,
            pixel_format: PixelFormat::Rgba,
        },
        timestamp,
    }
}

fn fake_block(timestamp: Duration, interval: Duration) -> AudioBlock {
    let frames = (FAKE_AUDIO.sample_rate as u128 * interval.as_nanos() / 1_000_000_000) as usize;
    AudioBlock {
        samples: vec![0.0f32; frames * FAKE_AUDIO.channels as usize].into(),
        format: FAKE_AUDIO,
        timestamp,
    }
}

/// Scripted pull source emitting units `interval` apart
struct FakeSource<U> {
    interval: Duration,
    end: Option<Duration>,
    decode_delay: Duration,
    stall: Option<(usize, Duration)>,
    error_at: Option<usize>,
    live: bool,
    next_index: usize,
    handle: Option<HandleGuard>,
    make: fn(Duration, Duration) -> U,
}

impl<U: MediaUnit> MediaSource<U> for FakeSource<U> {
    fn read(&mut self, _timeout: Duration) -> PlaybackResult<SourceRead<U>> {
        if self.handle.is_none() {
            return Err(PlaybackError::DecodeError("source is closed".into()));
        }
        let index = self.next_index;
        let timestamp = self.interval * index as u32;
        if self.end.is_some_and(|end| timestamp >= end) {
            return Ok(SourceRead::EndOfStream);
        }
        if self.error_at == Some(index) {
            return Err(PlaybackError::DecodeError(format!(
                "corrupt {} unit {}",
                U::STREAM,
                index
            )));
        }

        let mut delay = self.decode_delay;
        if let Some((stall_index, stall)) = self.stall
            && stall_index == index
        {
            delay += stall;
        }
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        self.next_index += 1;
        Ok(SourceRead::Unit((self.make)(timestamp, self.interval)))
    }

    fn seek(&mut self, position: Duration) -> PlaybackResult<()> {
        if self.live {
            return Err(PlaybackError::NotSeekable);
        }
        let interval = self.interval.as_nanos().max(1);
        self.next_index = position.as_nanos().div_ceil(interval) as usize;
        Ok(())
    }

    fn close(&mut self) {
        self.handle = None;
    }
}

/// One unit received by a [`RecordingSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Emission {
    pub timestamp: Duration,
    pub at: Instant,
}

/// Shared view of what a [`RecordingSink`] received
#[derive(Debug, Clone, Default)]
pub struct SinkLog {
    emissions: Arc<Mutex<Vec<Emission>>>,
    closes: Arc<AtomicUsize>,
}

impl SinkLog {
    pub fn emissions(&self) -> Vec<Emission> {
        self.emissions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.emissions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn timestamps(&self) -> Vec<Duration> {
        self.emissions().iter().map(|e| e.timestamp).collect()
    }

    pub fn last_timestamp(&self) -> Option<Duration> {
        self.emissions().last().map(|e| e.timestamp)
    }

    /// Times the sink was closed
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Sink that records every unit with its arrival time
#[derive(Debug)]
pub struct RecordingSink {
    name: String,
    log: SinkLog,
}

impl RecordingSink {
    pub fn new(name: &str) -> (Self, SinkLog) {
        let log = SinkLog::default();
        (
            Self {
                name: name.to_string(),
                log: log.clone(),
            },
            log,
        )
    }
}

impl<U: MediaUnit> DeviceSink<U> for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, unit: &U) -> PlaybackResult<()> {
        self.log
            .emissions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Emission {
                timestamp: unit.timestamp(),
                at: Instant::now(),
            });
        Ok(())
    }

    fn close(&mut self) {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sink that rejects writes, optionally recovering after a number of failures
#[derive(Debug)]
pub struct FailingSink {
    name: String,
    /// `None` fails forever
    failures: Option<usize>,
    attempts: Arc<AtomicUsize>,
}

impl FailingSink {
    /// Fails every write
    pub fn always(name: &str) -> (Self, Arc<AtomicUsize>) {
        Self::build(name, None)
    }

    /// Fails the first `failures` writes, then accepts
    pub fn transient(name: &str, failures: usize) -> (Self, Arc<AtomicUsize>) {
        Self::build(name, Some(failures))
    }

    fn build(name: &str, failures: Option<usize>) -> (Self, Arc<AtomicUsize>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        (
            Self {
                name: name.to_string(),
                failures,
                attempts: Arc::clone(&attempts),
            },
            attempts,
        )
    }
}

impl<U: MediaUnit> DeviceSink<U> for FailingSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, _unit: &U) -> PlaybackResult<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.failures {
            Some(limit) if attempt >= limit => Ok(()),
            _ => Err(PlaybackError::DeviceUnavailable(format!(
                "{} disconnected",
                self.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaKind;

    fn descriptor(name: &str) -> MediaDescriptor {
        MediaDescriptor::new(format!("/media/{}", name), MediaKind::VideoFile, "qtdemux")
    }

    #[test]
    fn test_fake_source_ends_after_duration() {
        let factory = FakeSourceFactory::new(FakeMedia::clip(Duration::from_millis(90)));
        let opened = factory.open(&descriptor("a.mp4")).unwrap();
        let mut video = opened.video.unwrap();

        let mut frames = 0;
        loop {
            match video.read(Duration::from_millis(10)).unwrap() {
                SourceRead::Unit(_) => frames += 1,
                SourceRead::Pending => {}
                SourceRead::EndOfStream => break,
            }
        }
        assert_eq!(frames, 3);
    }

    #[test]
    fn test_handles_released_on_close_and_drop() {
        let factory = FakeSourceFactory::new(FakeMedia::clip(Duration::from_secs(1)));
        let opened = factory.open(&descriptor("a.mp4")).unwrap();
        assert_eq!(factory.open_handles(), 2);

        let mut video = opened.video.unwrap();
        video.close();
        video.close();
        assert_eq!(factory.open_handles(), 1);

        drop(opened.audio);
        assert_eq!(factory.open_handles(), 0);
    }

    #[test]
    fn test_live_source_is_not_seekable() {
        let factory = FakeSourceFactory::new(FakeMedia::endless());
        let camera = MediaDescriptor::new("/dev/video0", MediaKind::LiveCamera, "v4l2src");
        let opened = factory.open(&camera).unwrap();
        assert!(!opened.seekable());
        assert_eq!(
            opened.video.unwrap().seek(Duration::from_secs(1)),
            Err(PlaybackError::NotSeekable)
        );
    }

    #[test]
    fn test_transient_sink_recovers() {
        let (mut sink, attempts) = FailingSink::transient("mic", 2);
        let block = fake_block(Duration::ZERO, Duration::from_millis(10));
        assert!(DeviceSink::<AudioBlock>::write(&mut sink, &block).is_err());
        assert!(DeviceSink::<AudioBlock>::write(&mut sink, &block).is_err());
        assert!(DeviceSink::<AudioBlock>::write(&mut sink, &block).is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
