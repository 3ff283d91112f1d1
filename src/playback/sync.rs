// SPDX-License-Identifier: GPL-3.0-only

//! Clock-driven pacing of decoded units to the device sinks
//!
//! Each stream of the active entry gets its own pacing loop on a dedicated
//! thread. A loop pulls units from its source and compares every unit's
//! timestamp with the shared clock:
//!
//! ```text
//!            hold              emit           drop
//!   ───────────────────┼────────────────┼──────────────▶ lateness
//!               -deliver_window         lag_threshold
//! ```
//!
//! Early units are held, re-checking on a small interval; units later than
//! the stream's lag threshold are dropped. Video gives up sooner than audio,
//! so the audio stream stays continuous while video skips frames.
//!
//! The [`DriftMonitor`] compares how late each stream emits. When the streams
//! diverge by more than the drift tolerance, the lagging stream drops units
//! until it is back within its deliver window of the clock.

use super::state::SharedSession;
use super::worker::{LoopAction, PacingWorker};
use crate::backends::sink::SharedSink;
use crate::config::Config;
use crate::constants::timing::UNIT_LOG_INTERVAL;
use crate::errors::{PlaybackError, PlaybackResult};
use crate::media::{
    AudioBlock, Frame, MediaSource, MediaUnit, OpenedMedia, SourceRead, StreamKind,
};
use crate::playback::state::SyncStats;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Upper bound on one suspension while the clock is paused
const PAUSED_WAIT: Duration = Duration::from_millis(100);

/// Notifications from pacing loops to the controller
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A loop stopped on an error it cannot recover from
    Failed {
        generation: u64,
        stream: StreamKind,
        error: PlaybackError,
    },
    /// Every stream of the entry has ended
    Completed { generation: u64 },
    /// Stop the event supervisor
    Shutdown,
}

/// Timing bounds for one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPolicy {
    /// How early a unit may be emitted
    pub deliver_window: Duration,
    /// How late a unit may be before it is dropped
    pub lag_threshold: Duration,
}

/// Pacing parameters derived from [`Config`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTuning {
    pub video: StreamPolicy,
    pub audio: StreamPolicy,
    pub drift_tolerance: Duration,
    pub hold_recheck: Duration,
    pub read_timeout: Duration,
    pub sink_max_failures: u32,
    pub sink_retry_backoff: Duration,
}

impl SyncTuning {
    pub fn from_config(config: &Config) -> Self {
        Self {
            video: StreamPolicy {
                deliver_window: config.sync.video_deliver_window(&config.video),
                lag_threshold: config.sync.video_lag_threshold(),
            },
            audio: StreamPolicy {
                deliver_window: config.sync.audio_deliver_window(),
                lag_threshold: config.sync.audio_lag_threshold(),
            },
            drift_tolerance: config.sync.drift_tolerance(),
            hold_recheck: config.sync.hold_recheck(),
            read_timeout: config.read_timeout(),
            sink_max_failures: config.sink.max_failures,
            sink_retry_backoff: config.sink.retry_backoff(),
        }
    }

    pub fn policy(&self, stream: StreamKind) -> StreamPolicy {
        match stream {
            StreamKind::Video => self.video,
            StreamKind::Audio => self.audio,
        }
    }
}

fn slot(stream: StreamKind) -> usize {
    match stream {
        StreamKind::Video => 0,
        StreamKind::Audio => 1,
    }
}

/// Signed distance of `timestamp` behind `position`, in microseconds
fn lateness_us(position: Duration, timestamp: Duration) -> i64 {
    position.as_micros() as i64 - timestamp.as_micros() as i64
}

/// What to do with a unit given its lateness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Emit,
    /// Too early; suspend for at most this long, then look again
    Hold(Duration),
    Drop,
}

/// Pacing rule for one unit
///
/// While `resyncing`, a unit must be within the deliver window of the clock
/// to be emitted; anything later is dropped so the stream catches up.
pub fn decide(policy: StreamPolicy, lateness: i64, resyncing: bool) -> Decision {
    let window = policy.deliver_window.as_micros() as i64;
    if lateness > policy.lag_threshold.as_micros() as i64 {
        return Decision::Drop;
    }
    if resyncing && lateness > window {
        return Decision::Drop;
    }
    if -lateness > window {
        return Decision::Hold(Duration::from_micros((-lateness - window) as u64));
    }
    Decision::Emit
}

/// Pacing counters shared by both loops of an entry
#[derive(Debug, Default)]
pub struct SyncCounters {
    emitted: [AtomicU64; 2],
    dropped: [AtomicU64; 2],
    corrections: AtomicU64,
    last_drift_us: AtomicI64,
}

impl SyncCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_emit(&self, stream: StreamKind) -> u64 {
        self.emitted[slot(stream)].fetch_add(1, Ordering::Relaxed) + 1
    }

    fn record_drop(&self, stream: StreamKind) -> u64 {
        self.dropped[slot(stream)].fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reset(&self) {
        for counter in self.emitted.iter().chain(self.dropped.iter()) {
            counter.store(0, Ordering::Relaxed);
        }
        self.corrections.store(0, Ordering::Relaxed);
        self.last_drift_us.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SyncStats {
        SyncStats {
            video_emitted: self.emitted[0].load(Ordering::Relaxed),
            video_dropped: self.dropped[0].load(Ordering::Relaxed),
            audio_emitted: self.emitted[1].load(Ordering::Relaxed),
            audio_dropped: self.dropped[1].load(Ordering::Relaxed),
            corrections: self.corrections.load(Ordering::Relaxed),
            last_drift_ms: self.last_drift_us.load(Ordering::Relaxed) / 1000,
        }
    }
}

/// Tracks emission lateness of both streams and flags the lagging one
///
/// Lateness is clamped at zero: a unit emitted early within its deliver
/// window counts as on time.
#[derive(Debug)]
pub struct DriftMonitor {
    lateness_us: [AtomicI64; 2],
    active: [AtomicBool; 2],
    resync: [AtomicBool; 2],
    tolerance_us: i64,
    counters: Arc<SyncCounters>,
}

impl DriftMonitor {
    pub fn new(tolerance: Duration, counters: Arc<SyncCounters>) -> Self {
        Self {
            lateness_us: Default::default(),
            active: Default::default(),
            resync: Default::default(),
            tolerance_us: tolerance.as_micros() as i64,
            counters,
        }
    }

    /// Record an emission and return the video-minus-audio drift when both
    /// streams are emitting
    pub fn record(&self, stream: StreamKind, lateness: i64) -> Option<i64> {
        let index = slot(stream);
        self.lateness_us[index].store(lateness.max(0), Ordering::SeqCst);
        self.active[index].store(true, Ordering::SeqCst);

        if !self.active.iter().all(|a| a.load(Ordering::SeqCst)) {
            return None;
        }

        let drift = self.lateness_us[0].load(Ordering::SeqCst)
            - self.lateness_us[1].load(Ordering::SeqCst);
        self.counters.last_drift_us.store(drift, Ordering::Relaxed);

        if drift.abs() > self.tolerance_us {
            let lagging = if drift > 0 {
                StreamKind::Video
            } else {
                StreamKind::Audio
            };
            if !self.resync[slot(lagging)].swap(true, Ordering::SeqCst) {
                self.counters.corrections.fetch_add(1, Ordering::Relaxed);
                warn!(
                    drift_ms = drift / 1000,
                    lagging = %lagging,
                    "Streams drifted apart, re-anchoring lagging stream"
                );
            }
        }
        Some(drift)
    }

    pub fn resync_pending(&self, stream: StreamKind) -> bool {
        self.resync[slot(stream)].load(Ordering::SeqCst)
    }

    /// The lagging stream is back on the clock
    pub fn reanchor(&self, stream: StreamKind, lateness: i64) {
        let index = slot(stream);
        self.lateness_us[index].store(lateness.max(0), Ordering::SeqCst);
        self.resync[index].store(false, Ordering::SeqCst);
        debug!(stream = %stream, lateness_us = lateness, "Stream re-anchored to clock");
    }

    /// Stop comparing against a stream that ended or repositioned
    pub fn retire(&self, stream: StreamKind) {
        let index = slot(stream);
        self.active[index].store(false, Ordering::SeqCst);
        self.lateness_us[index].store(0, Ordering::SeqCst);
        self.resync[index].store(false, Ordering::SeqCst);
    }
}

/// Everything a [`SyncEngine`] needs besides the opened sources
#[derive(Clone)]
pub struct EngineContext {
    pub generation: u64,
    pub session: Arc<SharedSession>,
    pub video_sink: SharedSink<Frame>,
    pub audio_sink: SharedSink<AudioBlock>,
    pub events: Sender<EngineEvent>,
    pub counters: Arc<SyncCounters>,
    pub tuning: SyncTuning,
}

/// State of one stream's pacing loop
struct PacingLoop<U: MediaUnit> {
    generation: u64,
    /// Emit on arrival; live devices pace themselves
    live: bool,
    source: Box<dyn MediaSource<U>>,
    sink: SharedSink<U>,
    session: Arc<SharedSession>,
    drift: Arc<DriftMonitor>,
    counters: Arc<SyncCounters>,
    policy: StreamPolicy,
    tuning: SyncTuning,
    events: Sender<EngineEvent>,
    stop: Arc<AtomicBool>,
    /// Streams of this entry that have not ended yet
    remaining: Arc<AtomicUsize>,
    /// Unit read but not yet due
    pending: Option<U>,
    applied_seek: Option<u64>,
    consecutive_failures: u32,
}

impl<U: MediaUnit> PacingLoop<U> {
    fn stream(&self) -> StreamKind {
        U::STREAM
    }

    fn step(&mut self) -> LoopAction {
        if self.stop.load(Ordering::SeqCst) {
            return LoopAction::Stop;
        }
        let Some(view) = self.session.observe(self.generation) else {
            debug!(stream = %self.stream(), "Generation superseded, leaving pacing loop");
            return LoopAction::Stop;
        };

        if let Some(request) = view.seek
            && self.applied_seek != Some(request.seq)
        {
            self.applied_seek = Some(request.seq);
            self.pending = None;
            self.drift.retire(self.stream());
            if let Err(e) = self.source.seek(request.position) {
                warn!(stream = %self.stream(), error = %e, "Source seek failed");
            }
        }

        if !view.running() {
            self.session.wait_for_change(view.revision, PAUSED_WAIT);
            return LoopAction::Continue;
        }

        let unit = match self.pending.take() {
            Some(unit) => unit,
            None => match self.source.read(self.tuning.read_timeout) {
                Ok(SourceRead::Unit(unit)) => unit,
                Ok(SourceRead::Pending) => return LoopAction::Continue,
                Ok(SourceRead::EndOfStream) => {
                    info!(stream = %self.stream(), "Stream ended");
                    return self.finish(None);
                }
                Err(e) => {
                    error!(stream = %self.stream(), error = %e, "Source failed mid-stream");
                    return self.finish(Some(e));
                }
            },
        };

        let lateness = lateness_us(view.position(), unit.timestamp());
        let decision = if self.live {
            Decision::Emit
        } else {
            decide(self.policy, lateness, self.drift.resync_pending(self.stream()))
        };

        match decision {
            Decision::Hold(gap) => {
                self.pending = Some(unit);
                self.session
                    .wait_for_change(view.revision, gap.min(self.tuning.hold_recheck));
                LoopAction::Continue
            }
            Decision::Drop => {
                let dropped = self.counters.record_drop(self.stream());
                if dropped % UNIT_LOG_INTERVAL == 1 {
                    debug!(
                        stream = %self.stream(),
                        lateness_ms = lateness / 1000,
                        dropped,
                        "Dropping late unit"
                    );
                }
                LoopAction::Continue
            }
            Decision::Emit => {
                if self.drift.resync_pending(self.stream()) {
                    self.drift.reanchor(self.stream(), lateness);
                }
                self.emit(unit, lateness, view.revision)
            }
        }
    }

    fn emit(&mut self, unit: U, lateness: i64, revision: u64) -> LoopAction {
        let result = {
            let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
            sink.write(&unit).map_err(|e| (sink.name().to_string(), e))
        };

        match result {
            Ok(()) => {
                self.consecutive_failures = 0;
                let emitted = self.counters.record_emit(self.stream());
                if !self.live {
                    self.drift.record(self.stream(), lateness);
                }
                if emitted % UNIT_LOG_INTERVAL == 0 {
                    trace!(
                        stream = %self.stream(),
                        emitted,
                        timestamp_ms = unit.timestamp().as_millis() as u64,
                        "Pacing progress"
                    );
                }
                LoopAction::Continue
            }
            Err((sink_name, e)) => {
                self.consecutive_failures += 1;
                warn!(
                    stream = %self.stream(),
                    sink = %sink_name,
                    failures = self.consecutive_failures,
                    error = %e,
                    "Sink write failed"
                );
                if self.consecutive_failures >= self.tuning.sink_max_failures {
                    let error = PlaybackError::DeviceUnavailable(format!(
                        "{} failed {} consecutive writes: {}",
                        sink_name, self.consecutive_failures, e
                    ));
                    return self.finish(Some(error));
                }
                self.session
                    .wait_for_change(revision, self.tuning.sink_retry_backoff);
                LoopAction::Continue
            }
        }
    }

    /// Leave the loop after end of stream or a failure
    fn finish(&mut self, failure: Option<PlaybackError>) -> LoopAction {
        self.source.close();
        self.drift.retire(self.stream());

        if let Some(error) = failure {
            let _ = self.events.send(EngineEvent::Failed {
                generation: self.generation,
                stream: self.stream(),
                error,
            });
        }
        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self.events.send(EngineEvent::Completed {
                generation: self.generation,
            });
        }
        LoopAction::Stop
    }
}

impl<U: MediaUnit> Drop for PacingLoop<U> {
    fn drop(&mut self) {
        self.source.close();
    }
}

/// Pacing loops of the active entry
pub struct SyncEngine {
    generation: u64,
    workers: Vec<PacingWorker>,
    streams: Vec<StreamKind>,
}

impl SyncEngine {
    /// Spawn one pacing loop per stream of `media`
    ///
    /// Loops stay suspended until the session clock starts running.
    pub fn start(media: OpenedMedia, ctx: EngineContext) -> PlaybackResult<Self> {
        let OpenedMedia {
            descriptor,
            video,
            audio,
            ..
        } = media;
        let live = descriptor.kind.is_live();
        let drift = Arc::new(DriftMonitor::new(
            ctx.tuning.drift_tolerance,
            Arc::clone(&ctx.counters),
        ));
        let stream_count = usize::from(video.is_some()) + usize::from(audio.is_some());
        let remaining = Arc::new(AtomicUsize::new(stream_count));

        let mut engine = Self {
            generation: ctx.generation,
            workers: Vec::with_capacity(stream_count),
            streams: Vec::with_capacity(stream_count),
        };

        if let Some(source) = video {
            engine.spawn(
                source,
                Arc::clone(&ctx.video_sink),
                live,
                &ctx,
                &drift,
                &remaining,
            )?;
        }
        if let Some(source) = audio {
            engine.spawn(
                source,
                Arc::clone(&ctx.audio_sink),
                live,
                &ctx,
                &drift,
                &remaining,
            )?;
        }

        info!(
            generation = ctx.generation,
            path = %descriptor.path.display(),
            streams = ?engine.streams,
            "Sync engine started"
        );
        Ok(engine)
    }

    fn spawn<U: MediaUnit>(
        &mut self,
        source: Box<dyn MediaSource<U>>,
        sink: SharedSink<U>,
        live: bool,
        ctx: &EngineContext,
        drift: &Arc<DriftMonitor>,
        remaining: &Arc<AtomicUsize>,
    ) -> PlaybackResult<()> {
        let stop = Arc::new(AtomicBool::new(false));
        let mut pacing = PacingLoop {
            generation: ctx.generation,
            live,
            source,
            sink,
            session: Arc::clone(&ctx.session),
            drift: Arc::clone(drift),
            counters: Arc::clone(&ctx.counters),
            policy: ctx.tuning.policy(U::STREAM),
            tuning: ctx.tuning,
            events: ctx.events.clone(),
            stop: Arc::clone(&stop),
            remaining: Arc::clone(remaining),
            pending: None,
            applied_seek: None,
            consecutive_failures: 0,
        };

        let name = format!("{}-pacing", U::STREAM);
        let worker = PacingWorker::start_with_signal(&name, stop, move || pacing.step())?;
        self.workers.push(worker);
        self.streams.push(U::STREAM);
        Ok(())
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn streams(&self) -> &[StreamKind] {
        &self.streams
    }

    /// Stop every loop, waiting at most `timeout` in total
    ///
    /// Returns `false` when a loop had to be detached.
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        for worker in &self.workers {
            worker.request_stop();
        }
        let mut clean = true;
        for worker in &mut self.workers {
            clean &= worker.stop_until(deadline);
        }
        self.workers.clear();
        debug!(generation = self.generation, clean, "Sync engine shut down");
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(window_ms: u64, lag_ms: u64) -> StreamPolicy {
        StreamPolicy {
            deliver_window: Duration::from_millis(window_ms),
            lag_threshold: Duration::from_millis(lag_ms),
        }
    }

    #[test]
    fn test_decide_emits_within_window() {
        let video = policy(33, 100);
        assert_eq!(decide(video, 0, false), Decision::Emit);
        assert_eq!(decide(video, -20_000, false), Decision::Emit);
        assert_eq!(decide(video, 90_000, false), Decision::Emit);
    }

    #[test]
    fn test_decide_holds_early_units() {
        let audio = policy(10, 250);
        assert_eq!(
            decide(audio, -50_000, false),
            Decision::Hold(Duration::from_millis(40))
        );
    }

    #[test]
    fn test_decide_drops_beyond_lag_threshold() {
        assert_eq!(decide(policy(33, 100), 150_000, false), Decision::Drop);
        assert_eq!(decide(policy(10, 250), 150_000, false), Decision::Emit);
    }

    #[test]
    fn test_decide_resync_requires_unit_near_clock() {
        let video = policy(33, 100);
        assert_eq!(decide(video, 60_000, true), Decision::Drop);
        assert_eq!(decide(video, 20_000, true), Decision::Emit);
    }

    #[test]
    fn test_drift_needs_both_streams() {
        let monitor = DriftMonitor::new(Duration::from_millis(40), Arc::new(SyncCounters::new()));
        assert_eq!(monitor.record(StreamKind::Video, 80_000), None);
        assert!(!monitor.resync_pending(StreamKind::Video));
    }

    #[test]
    fn test_drift_flags_lagging_video_once() {
        let counters = Arc::new(SyncCounters::new());
        let monitor = DriftMonitor::new(Duration::from_millis(40), Arc::clone(&counters));

        monitor.record(StreamKind::Audio, 2_000);
        assert_eq!(monitor.record(StreamKind::Video, 70_000), Some(68_000));
        assert!(monitor.resync_pending(StreamKind::Video));
        assert!(!monitor.resync_pending(StreamKind::Audio));

        // Still out of tolerance until video re-anchors; counted once
        monitor.record(StreamKind::Audio, 1_000);
        assert_eq!(counters.snapshot().corrections, 1);

        monitor.reanchor(StreamKind::Video, 5_000);
        assert!(!monitor.resync_pending(StreamKind::Video));
        assert_eq!(monitor.record(StreamKind::Audio, 1_000), Some(4_000));
        assert_eq!(counters.snapshot().corrections, 1);
    }

    #[test]
    fn test_early_emission_counts_as_on_time() {
        let monitor = DriftMonitor::new(Duration::from_millis(40), Arc::new(SyncCounters::new()));
        monitor.record(StreamKind::Video, -33_000);
        assert_eq!(monitor.record(StreamKind::Audio, 0), Some(0));
    }

    #[test]
    fn test_retired_stream_is_not_compared() {
        let monitor = DriftMonitor::new(Duration::from_millis(40), Arc::new(SyncCounters::new()));
        monitor.record(StreamKind::Video, 0);
        monitor.retire(StreamKind::Video);
        assert_eq!(monitor.record(StreamKind::Audio, 200_000), None);
        assert!(!monitor.resync_pending(StreamKind::Audio));
    }
}
