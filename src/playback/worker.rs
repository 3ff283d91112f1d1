// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle for pacing loops
//!
//! Each stream of the active entry runs its pacing loop on a dedicated
//! thread. The worker owns the thread handle and a stop signal; shutdown
//! waits at most a bounded time so a wedged decoder can never block a
//! playback command.

use crate::errors::PlaybackResult;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Interval at which a bounded join polls the thread
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Action returned by the loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Run another iteration
    Continue,
    /// Exit the thread
    Stop,
}

/// A pacing loop running on its own thread
///
/// # Example
///
/// ```ignore
/// let mut worker = PacingWorker::start("video-pacing", move || pacing.step())?;
///
/// // Later, stop the loop without waiting longer than 250 ms
/// worker.stop_within(Duration::from_millis(250));
/// ```
pub struct PacingWorker {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl PacingWorker {
    /// Spawn a thread calling `loop_fn` until it returns [`LoopAction::Stop`]
    /// or the stop signal is raised
    pub fn start<F>(name: &str, loop_fn: F) -> PlaybackResult<Self>
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        Self::start_with_signal(name, Arc::new(AtomicBool::new(false)), loop_fn)
    }

    /// Like [`PacingWorker::start`], with a stop signal the loop body also
    /// observes
    pub fn start_with_signal<F>(
        name: &str,
        stop_signal: Arc<AtomicBool>,
        mut loop_fn: F,
    ) -> PlaybackResult<Self>
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        let stop_signal_clone = Arc::clone(&stop_signal);
        let name_clone = name.to_string();

        info!(name = %name, "Starting pacing loop");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(name = %name_clone, "Pacing loop thread started");

                loop {
                    if stop_signal_clone.load(Ordering::SeqCst) {
                        debug!(name = %name_clone, "Stop signal received");
                        break;
                    }

                    match loop_fn() {
                        LoopAction::Continue => {}
                        LoopAction::Stop => {
                            debug!(name = %name_clone, "Loop requested stop");
                            break;
                        }
                    }
                }

                info!(name = %name_clone, "Pacing loop thread exiting");
            })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop without waiting
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting pacing loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Signal the loop and wait until `deadline` for the thread to finish
    ///
    /// Returns `false` when the thread was still running at the deadline; it
    /// is then detached and exits on its own once its current read returns.
    pub fn stop_until(&mut self, deadline: Instant) -> bool {
        self.request_stop();
        let Some(handle) = self.thread_handle.take() else {
            return true;
        };

        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(name = %self.name, "Pacing loop did not exit in time, detaching");
                return false;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }

        if let Err(e) = handle.join() {
            warn!(name = %self.name, "Pacing loop thread panicked: {:?}", e);
        } else {
            debug!(name = %self.name, "Pacing loop thread finished");
        }
        true
    }

    /// Signal the loop and wait at most `timeout`
    pub fn stop_within(&mut self, timeout: Duration) -> bool {
        self.stop_until(Instant::now() + timeout)
    }
}

impl Drop for PacingWorker {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "PacingWorker dropped, stopping loop");
            self.stop_within(crate::constants::timing::TEARDOWN_TIMEOUT);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_loop_stops_itself() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut worker = PacingWorker::start("test-loop", move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            if count >= 10 {
                LoopAction::Stop
            } else {
                LoopAction::Continue
            }
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while worker.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        assert!(!worker.is_running());
        assert_eq!(counter.load(Ordering::SeqCst), 11);
        assert!(worker.stop_within(Duration::from_millis(10)));
    }

    #[test]
    fn test_stop_signal() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut worker = PacingWorker::start("test-loop", move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            LoopAction::Continue
        })
        .unwrap();

        thread::sleep(Duration::from_millis(30));
        assert!(worker.stop_within(Duration::from_secs(1)));
        assert!(counter.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn test_bounded_join_detaches_wedged_loop() {
        let release = Arc::new(AtomicBool::new(false));
        let release_clone = Arc::clone(&release);

        let mut worker = PacingWorker::start("wedged-loop", move || {
            while !release_clone.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
            LoopAction::Stop
        })
        .unwrap();

        let started = Instant::now();
        assert!(!worker.stop_within(Duration::from_millis(50)));
        assert!(started.elapsed() < Duration::from_secs(1));
        release.store(true, Ordering::SeqCst);
    }

    #[test]
    fn test_shared_stop_signal_is_visible_to_loop() {
        let signal = Arc::new(AtomicBool::new(false));
        let observed = Arc::clone(&signal);
        let mut worker = PacingWorker::start_with_signal("signal-loop", Arc::clone(&signal), move || {
            if observed.load(Ordering::SeqCst) {
                LoopAction::Stop
            } else {
                thread::sleep(Duration::from_millis(1));
                LoopAction::Continue
            }
        })
        .unwrap();

        worker.request_stop();
        assert!(signal.load(Ordering::SeqCst));
        assert!(worker.stop_within(Duration::from_secs(1)));
    }
}
