// SPDX-License-Identifier: GPL-3.0-only

//! Shared GStreamer plumbing for the decoder and sink backends
//!
//! Helpers return plain `String` errors; each caller maps them onto the
//! error kind that fits its side (`DecodeError` for sources,
//! `DeviceUnavailable` for sinks).

use gstreamer::prelude::*;
use gstreamer_app::{AppSink, AppSrc};
use std::time::{Duration, Instant};

/// Poll slice used while waiting on bus messages
const BUS_POLL_MS: u64 = 100;

pub fn init() -> Result<(), String> {
    gstreamer::init().map_err(|e| format!("GStreamer init failed: {}", e))
}

/// Build a pipeline from launch syntax
pub fn launch(description: &str) -> Result<gstreamer::Pipeline, String> {
    gstreamer::parse::launch(description)
        .map_err(|e| format!("Failed to create pipeline: {}", e))?
        .downcast::<gstreamer::Pipeline>()
        .map_err(|_| "Failed to downcast to Pipeline".to_string())
}

pub fn element(pipeline: &gstreamer::Pipeline, name: &str) -> Result<gstreamer::Element, String> {
    pipeline
        .by_name(name)
        .ok_or_else(|| format!("Pipeline has no element named {}", name))
}

pub fn app_sink(pipeline: &gstreamer::Pipeline, name: &str) -> Result<AppSink, String> {
    element(pipeline, name)?
        .downcast::<AppSink>()
        .map_err(|_| format!("{} is not an appsink", name))
}

pub fn app_src(pipeline: &gstreamer::Pipeline, name: &str) -> Result<AppSrc, String> {
    element(pipeline, name)?
        .downcast::<AppSrc>()
        .map_err(|_| format!("{} is not an appsrc", name))
}

/// Move to `state` and wait for the pipeline to settle
///
/// Fails on a bus error or when nothing settles before `timeout`.
pub fn set_state_and_wait(
    pipeline: &gstreamer::Pipeline,
    state: gstreamer::State,
    timeout: Duration,
) -> Result<(), String> {
    let change = pipeline
        .set_state(state)
        .map_err(|e| bus_error(pipeline).unwrap_or_else(|| format!("State change failed: {:?}", e)))?;
    if change == gstreamer::StateChangeSuccess::Success {
        return Ok(());
    }

    let bus = pipeline
        .bus()
        .ok_or_else(|| "No bus on pipeline".to_string())?;
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        if let Some(msg) = bus.timed_pop(gstreamer::ClockTime::from_mseconds(BUS_POLL_MS)) {
            use gstreamer::MessageView;
            match msg.view() {
                MessageView::Error(err) => {
                    return Err(format!("Pipeline error: {}", err.error()));
                }
                MessageView::AsyncDone(_) => return Ok(()),
                _ => {}
            }
        }
        let (result, current, _pending) = pipeline.state(gstreamer::ClockTime::ZERO);
        if result.is_ok() && current == state {
            return Ok(());
        }
    }
    Err(format!("Timed out waiting for {:?}", state))
}

/// Pending error message on the pipeline bus, if any
pub fn bus_error(pipeline: &gstreamer::Pipeline) -> Option<String> {
    let bus = pipeline.bus()?;
    let msg = bus.pop_filtered(&[gstreamer::MessageType::Error])?;
    match msg.view() {
        gstreamer::MessageView::Error(err) => Some(match err.debug() {
            Some(debug) => format!("{} ({})", err.error(), debug),
            None => err.error().to_string(),
        }),
        _ => None,
    }
}

pub fn clock_time(duration: Duration) -> gstreamer::ClockTime {
    gstreamer::ClockTime::from_nseconds(duration.as_nanos() as u64)
}

pub fn duration(time: gstreamer::ClockTime) -> Duration {
    Duration::from_nanos(time.nseconds())
}
