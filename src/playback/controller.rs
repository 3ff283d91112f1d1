// SPDX-License-Identifier: GPL-3.0-only

//! Playback command surface and state machine
//!
//! ```text
//! Stopped ──load/play──▶ Loading ──opened──▶ Paused ◀──pause/play──▶ Playing
//!    ▲                      ▲                  │                        │
//!    │                      └──── next/prev ───┴────── completed ───────┘
//!    └──── stop (any) / reset (Error) ◀──── Error ◀── open or stream failure
//! ```
//!
//! Commands that swap the active entry are serialized by the engine slot
//! lock. The slot is released while a decoder opens, so `stop()` and the
//! other commands never wait behind a slow open; an open that returns after
//! its generation was superseded is discarded. `status()` and `pause()`
//! touch only the session lock.

use super::playlist::{EntryId, LoadReport, PlaylistEntry};
use super::state::{
    ActiveEntry, ErrorReport, PlaybackState, SeekRequest, Session, SharedSession, StatusSnapshot,
};
use super::sync::{EngineContext, EngineEvent, SyncCounters, SyncEngine, SyncTuning};
use crate::backends::sink::{AudioSink, VideoSink};
use crate::config::Config;
use crate::constants::timing::STATUS_REFRESH_INTERVAL;
use crate::errors::{PlaybackError, PlaybackResult};
use crate::media::{SourceFactory, StreamKind};
use crate::playback::playlist::Playlist;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Front-end facing playback engine
///
/// Owns the playlist, the clock and the pacing loops of the active entry.
/// All methods take `&self` and may be called from any thread.
pub struct PlaybackController {
    inner: Arc<ControllerInner>,
    supervisor: Option<JoinHandle<()>>,
}

struct ControllerInner {
    config: Config,
    tuning: SyncTuning,
    shared: Arc<SharedSession>,
    /// Pacing loops of the active entry; held while a command tears down or
    /// installs them, but not across a source open
    engine: Mutex<Option<SyncEngine>>,
    factory: Arc<dyn SourceFactory>,
    video_sink: VideoSink,
    audio_sink: AudioSink,
    events: Sender<EngineEvent>,
    counters: Arc<SyncCounters>,
    status: watch::Sender<StatusSnapshot>,
}

impl PlaybackController {
    /// Create a stopped controller with an empty playlist
    pub fn new(
        config: Config,
        factory: Arc<dyn SourceFactory>,
        video_sink: VideoSink,
        audio_sink: AudioSink,
    ) -> PlaybackResult<Self> {
        config.validate()?;

        let playlist = Playlist::new(config.playlist.looping, config.playlist.shuffle);
        let session = Session::new(playlist);
        let counters = Arc::new(SyncCounters::new());
        let (status, _) = watch::channel(session.snapshot(counters.snapshot()));
        let (events, receiver) = mpsc::channel();

        let inner = Arc::new(ControllerInner {
            tuning: SyncTuning::from_config(&config),
            config,
            shared: Arc::new(SharedSession::new(session)),
            engine: Mutex::new(None),
            factory,
            video_sink,
            audio_sink,
            events,
            counters,
            status,
        });

        let supervisor_inner = Arc::clone(&inner);
        let supervisor = thread::Builder::new()
            .name("playback-supervisor".into())
            .spawn(move || supervise(supervisor_inner, receiver))?;

        info!("Playback controller ready");
        Ok(Self {
            inner,
            supervisor: Some(supervisor),
        })
    }

    /// Validate and append paths to the playlist
    ///
    /// From `Stopped`, the current entry is opened and the session settles in
    /// `Paused`. Rejected paths never change the playback state.
    pub fn load<P: AsRef<Path>>(&self, paths: &[P]) -> LoadReport {
        self.inner.load(paths)
    }

    /// Start or resume playback
    pub fn play(&self) -> PlaybackResult<()> {
        self.inner.play()
    }

    /// Freeze the clock; idempotent
    pub fn pause(&self) -> PlaybackResult<()> {
        self.inner.pause()
    }

    /// Tear down the active entry and return to `Stopped`
    pub fn stop(&self) -> PlaybackResult<()> {
        self.inner.stop();
        Ok(())
    }

    /// Advance to the next entry, keeping the play/pause intent
    pub fn next(&self) -> PlaybackResult<()> {
        self.inner.step(|playlist| playlist.next().map(|_| ()))
    }

    /// Step back to the previous entry, keeping the play/pause intent
    pub fn previous(&self) -> PlaybackResult<()> {
        self.inner.step(|playlist| playlist.previous().map(|_| ()))
    }

    /// Jump to a specific entry
    pub fn select(&self, id: EntryId) -> PlaybackResult<()> {
        self.inner.step(|playlist| playlist.select(id).map(|_| ()))
    }

    /// Reposition the active entry
    pub fn seek(&self, position: Duration) -> PlaybackResult<()> {
        self.inner.seek(position)
    }

    /// Leave `Error` for `Stopped`
    pub fn reset(&self) -> PlaybackResult<()> {
        self.inner.reset()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.inner.snapshot()
    }

    /// Receiver updated on every state transition and periodically while
    /// playing
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.inner.status.subscribe()
    }

    pub fn set_loop(&self, looping: bool) {
        self.inner.update_playlist(|playlist| {
            playlist.set_looping(looping);
            Ok(())
        })
        .ok();
        info!(looping, "Loop policy changed");
    }

    pub fn set_shuffle(&self, shuffle: bool) {
        self.inner.update_playlist(|playlist| {
            playlist.set_shuffle(shuffle);
            Ok(())
        })
        .ok();
        info!(shuffle, "Shuffle policy changed");
    }

    pub fn set_entry_flags(&self, id: EntryId, repeat: bool, skip: bool) -> PlaybackResult<()> {
        self.inner
            .update_playlist(|playlist| playlist.set_flags(id, repeat, skip))
    }

    /// Entries in the order the current pass plays them
    pub fn entries(&self) -> Vec<PlaylistEntry> {
        self.inner.shared.lock().playlist.upcoming().cloned().collect()
    }

    /// Remove an entry; removing the active entry stops playback
    pub fn remove(&self, id: EntryId) -> PlaybackResult<()> {
        self.inner.remove(id)
    }

    /// Empty the playlist and stop playback
    pub fn clear(&self) {
        self.inner.clear();
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        debug!("PlaybackController dropped, shutting down");
        self.inner.stop();
        let _ = self.inner.events.send(EngineEvent::Shutdown);
        if let Some(handle) = self.supervisor.take()
            && let Err(e) = handle.join()
        {
            warn!("Playback supervisor panicked: {:?}", e);
        }
    }
}

/// Route pacing loop events back into the state machine
fn supervise(inner: Arc<ControllerInner>, events: Receiver<EngineEvent>) {
    debug!("Playback supervisor started");
    loop {
        match events.recv_timeout(STATUS_REFRESH_INTERVAL) {
            Ok(EngineEvent::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(EngineEvent::Failed {
                generation,
                stream,
                error,
            }) => inner.on_stream_failed(generation, stream, error),
            Ok(EngineEvent::Completed { generation }) => inner.on_entry_completed(generation),
            Err(RecvTimeoutError::Timeout) => {
                let session = inner.shared.lock();
                if session.state.is_playing() {
                    inner.publish(&session);
                }
            }
        }
    }
    debug!("Playback supervisor exiting");
}

impl ControllerInner {
    fn engine_slot(&self) -> MutexGuard<'_, Option<SyncEngine>> {
        self.engine.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, session: &Session) {
        self.status
            .send_replace(session.snapshot(self.counters.snapshot()));
    }

    fn snapshot(&self) -> StatusSnapshot {
        self.shared.lock().snapshot(self.counters.snapshot())
    }

    fn engine_context(&self, generation: u64) -> EngineContext {
        EngineContext {
            generation,
            session: Arc::clone(&self.shared),
            video_sink: Arc::clone(&self.video_sink),
            audio_sink: Arc::clone(&self.audio_sink),
            events: self.events.clone(),
            counters: Arc::clone(&self.counters),
            tuning: self.tuning,
        }
    }

    fn teardown(&self, slot: &mut Option<SyncEngine>) {
        if let Some(mut engine) = slot.take()
            && !engine.shutdown(self.config.teardown_timeout())
        {
            warn!(
                generation = engine.generation(),
                "Pacing loops outlived the teardown timeout"
            );
        }
    }

    fn close_sinks(&self) {
        self.video_sink
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .close();
        self.audio_sink
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .close();
    }

    /// Open the playlist's current entry, replacing whatever was active
    ///
    /// Ends in `Playing` when `resume` (or a `play` received while loading)
    /// asks for it, otherwise in `Paused`. Open failures end in `Error`.
    /// The slot guard is given up for the duration of the open.
    fn activate(
        &self,
        mut slot: MutexGuard<'_, Option<SyncEngine>>,
        resume: bool,
    ) -> PlaybackResult<()> {
        let (generation, current) = {
            let mut session = self.shared.lock();
            session.generation += 1;
            session.state = PlaybackState::Loading;
            session.error = None;
            session.clock.reset();
            session.seek = None;
            session.active = None;
            session.resume_after_load = resume;
            self.shared.notify(&mut session);
            self.publish(&session);
            let current = session
                .playlist
                .current()
                .map(|entry| (entry.id, entry.descriptor.clone()));
            (session.generation, current)
        };
        debug!(generation, resume, "Entering Loading");

        self.teardown(&mut slot);
        self.counters.reset();
        drop(slot);

        let (id, descriptor) = match current {
            Ok(current) => current,
            Err(e) => {
                self.settle_stopped(generation);
                return Err(e);
            }
        };

        info!(
            generation,
            path = %descriptor.path.display(),
            kind = %descriptor.kind,
            decoder = descriptor.decoder_hint,
            "Opening entry"
        );
        let opened = match self.factory.open(&descriptor) {
            Ok(opened) if opened.has_streams() => opened,
            Ok(_) => {
                return Err(self.fail_load(
                    generation,
                    PlaybackError::DecodeError(format!(
                        "{} has no decodable streams",
                        descriptor.path.display()
                    )),
                ));
            }
            Err(e) => return Err(self.fail_load(generation, e)),
        };

        // Generations only move under the slot lock, so this check holds
        // until the engine is installed
        let mut slot = self.engine_slot();
        if self.shared.lock().generation != generation {
            debug!(generation, "Entry superseded while opening, discarding it");
            return Ok(());
        }

        let duration = opened.duration;
        let seekable = opened.seekable();
        let engine = match SyncEngine::start(opened, self.engine_context(generation)) {
            Ok(engine) => engine,
            Err(e) => return Err(self.fail_load(generation, e)),
        };
        *slot = Some(engine);

        let mut session = self.shared.lock();
        session.active = Some(ActiveEntry {
            id,
            descriptor,
            duration,
            seekable,
        });
        session.state = if session.resume_after_load {
            session.clock.resume();
            PlaybackState::Playing
        } else {
            PlaybackState::Paused
        };
        session.resume_after_load = false;
        self.shared.notify(&mut session);
        self.publish(&session);
        info!(generation, state = %session.state, "Entry ready");
        Ok(())
    }

    fn fail_load(&self, generation: u64, error: PlaybackError) -> PlaybackError {
        error!(generation, error = %error, "Failed to open entry");
        let mut session = self.shared.lock();
        if session.generation == generation {
            session.state = PlaybackState::Error;
            session.error = Some(ErrorReport::new(&error, None));
            self.shared.notify(&mut session);
            self.publish(&session);
        }
        error
    }

    fn settle_stopped(&self, generation: u64) {
        let mut session = self.shared.lock();
        if session.generation == generation {
            session.state = PlaybackState::Stopped;
            self.shared.notify(&mut session);
            self.publish(&session);
        }
    }

    /// Bump the generation and clear everything tied to the active entry
    fn halt(&self, session: &mut Session) {
        session.generation += 1;
        session.state = PlaybackState::Stopped;
        session.clock.reset();
        session.active = None;
        session.error = None;
        session.seek = None;
        session.resume_after_load = false;
        self.shared.notify(session);
        self.publish(session);
    }

    fn stop_with(&self, slot: &mut Option<SyncEngine>) {
        {
            let mut session = self.shared.lock();
            self.halt(&mut session);
        }
        self.teardown(slot);
        self.close_sinks();
        info!("Playback stopped");
    }

    fn stop(&self) {
        let mut slot = self.engine_slot();
        self.stop_with(&mut slot);
    }

    fn load<P: AsRef<Path>>(&self, paths: &[P]) -> LoadReport {
        let slot = self.engine_slot();
        let (report, activate) = {
            let mut session = self.shared.lock();
            let report = session.playlist.load(paths);
            let activate = session.state.is_stopped() && !report.accepted.is_empty();
            self.publish(&session);
            (report, activate)
        };

        if activate && let Err(e) = self.activate(slot, false) {
            warn!(error = %e, "Loaded entries but the current one failed to open");
        }
        report
    }

    /// Apply `play` to a session that already has a source
    ///
    /// Returns `Ok(false)` when the session is stopped and needs activation.
    fn resume_session(&self) -> PlaybackResult<bool> {
        let mut session = self.shared.lock();
        match session.state {
            PlaybackState::Playing => Ok(true),
            PlaybackState::Paused => {
                session.clock.resume();
                session.state = PlaybackState::Playing;
                self.shared.notify(&mut session);
                self.publish(&session);
                info!(position_ms = session.clock.position().as_millis() as u64, "Playing");
                Ok(true)
            }
            PlaybackState::Loading => {
                session.resume_after_load = true;
                Ok(true)
            }
            PlaybackState::Error => Err(PlaybackError::InvalidState(
                "playback failed; reset or stop first".into(),
            )),
            PlaybackState::Stopped if session.playlist.is_empty() => Err(PlaybackError::Empty),
            PlaybackState::Stopped => Ok(false),
        }
    }

    fn play(&self) -> PlaybackResult<()> {
        if self.resume_session()? {
            return Ok(());
        }
        let slot = self.engine_slot();
        if self.resume_session()? {
            return Ok(());
        }
        self.activate(slot, true)
    }

    fn pause(&self) -> PlaybackResult<()> {
        let mut session = self.shared.lock();
        match session.state {
            PlaybackState::Playing => {
                session.clock.pause();
                session.state = PlaybackState::Paused;
                self.shared.notify(&mut session);
                self.publish(&session);
                info!(position_ms = session.clock.position().as_millis() as u64, "Paused");
                Ok(())
            }
            PlaybackState::Loading => {
                session.resume_after_load = false;
                Ok(())
            }
            PlaybackState::Paused | PlaybackState::Stopped => Ok(()),
            PlaybackState::Error => Err(PlaybackError::InvalidState(
                "playback failed; reset or stop first".into(),
            )),
        }
    }

    /// Move the cursor with `movement` and open the new entry
    ///
    /// From `Stopped` only the cursor moves. A failed movement (for example
    /// `EndOfPlaylist`) leaves the session untouched.
    fn step<F>(&self, movement: F) -> PlaybackResult<()>
    where
        F: FnOnce(&mut Playlist) -> PlaybackResult<()>,
    {
        let slot = self.engine_slot();
        let resume = {
            let mut session = self.shared.lock();
            movement(&mut session.playlist)?;
            match session.state {
                PlaybackState::Stopped => {
                    self.publish(&session);
                    return Ok(());
                }
                PlaybackState::Playing => true,
                PlaybackState::Paused => false,
                PlaybackState::Loading => session.resume_after_load,
                PlaybackState::Error => session.clock.is_running(),
            }
        };
        self.activate(slot, resume)
    }

    fn seek(&self, position: Duration) -> PlaybackResult<()> {
        let mut session = self.shared.lock();
        let Some(active) = session.active.as_ref() else {
            return Err(PlaybackError::Empty);
        };
        if !active.seekable {
            return Err(PlaybackError::NotSeekable);
        }
        if !matches!(
            session.state,
            PlaybackState::Playing | PlaybackState::Paused
        ) {
            return Err(PlaybackError::InvalidState(format!(
                "cannot seek while {}",
                session.state
            )));
        }

        let target = active
            .duration
            .map_or(position, |duration| position.min(duration));
        let seq = session.seek.map_or(1, |request| request.seq + 1);
        session.clock.seek(target);
        session.seek = Some(SeekRequest {
            seq,
            position: target,
        });
        self.shared.notify(&mut session);
        self.publish(&session);
        info!(position_ms = target.as_millis() as u64, "Seeked");
        Ok(())
    }

    fn reset(&self) -> PlaybackResult<()> {
        let mut slot = self.engine_slot();
        let state = self.shared.lock().state;
        if state != PlaybackState::Error {
            return Err(PlaybackError::InvalidState(format!(
                "reset is only valid after an error, state is {}",
                state
            )));
        }
        self.stop_with(&mut slot);
        Ok(())
    }

    fn update_playlist<F>(&self, update: F) -> PlaybackResult<()>
    where
        F: FnOnce(&mut Playlist) -> PlaybackResult<()>,
    {
        let mut session = self.shared.lock();
        update(&mut session.playlist)?;
        self.publish(&session);
        Ok(())
    }

    fn remove(&self, id: EntryId) -> PlaybackResult<()> {
        let mut slot = self.engine_slot();
        let was_active = {
            let mut session = self.shared.lock();
            session.playlist.remove(id)?;
            let was_active = session.active.as_ref().is_some_and(|a| a.id == id);
            self.publish(&session);
            was_active
        };
        if was_active {
            info!(%id, "Removed the active entry");
            self.stop_with(&mut slot);
        }
        Ok(())
    }

    fn clear(&self) {
        let mut slot = self.engine_slot();
        self.shared.lock().playlist.clear();
        self.stop_with(&mut slot);
    }

    fn on_stream_failed(&self, generation: u64, stream: StreamKind, error: PlaybackError) {
        let mut session = self.shared.lock();
        if session.generation != generation || session.state.is_stopped() {
            debug!(generation, stream = %stream, "Ignoring failure from a stale stream");
            return;
        }
        error!(generation, stream = %stream, error = %error, "Stream failed, entering Error");
        if session.state != PlaybackState::Error {
            session.state = PlaybackState::Error;
            session.error = Some(ErrorReport::new(&error, Some(stream)));
        }
        self.shared.notify(&mut session);
        self.publish(&session);
    }

    /// Every stream of the active entry has ended: repeat, advance or stop
    fn on_entry_completed(&self, generation: u64) {
        let mut slot = self.engine_slot();
        let resume = {
            let mut session = self.shared.lock();
            if session.generation != generation {
                return;
            }
            let resume = match session.state {
                PlaybackState::Playing => true,
                PlaybackState::Paused => false,
                _ => return,
            };

            let active_id = session.active.as_ref().map(|a| a.id);
            let repeat = session
                .playlist
                .entries()
                .iter()
                .any(|e| Some(e.id) == active_id && e.repeat);

            let advanced = if repeat {
                Ok(())
            } else {
                session.playlist.next().map(|_| ())
            };
            match advanced {
                Ok(()) if repeat => info!(generation, "Entry completed, repeating"),
                Ok(()) => info!(generation, "Entry completed, advancing"),
                Err(e) => {
                    info!(generation, reason = %e, "Playlist finished");
                    session.playlist.rewind();
                    drop(session);
                    self.stop_with(&mut slot);
                    return;
                }
            }
            resume
        };

        if let Err(e) = self.activate(slot, resume) {
            warn!(error = %e, "Failed to open the next entry");
        }
    }
}
