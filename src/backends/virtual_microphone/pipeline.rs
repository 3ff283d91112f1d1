// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer pipeline for virtual microphone output
//!
//! ```text
//! appsrc (F32LE) ─▶ audioconvert ─▶ audioresample ─▶ pipewiresink (Audio/Source)
//! ```

use crate::backends::gst_utils;
use crate::constants::{nodes, output, timing};
use crate::errors::{PlaybackError, PlaybackResult};
use crate::media::{AudioBlock, AudioFormat};
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use std::time::Duration;
use tracing::{debug, info, warn};

fn unavailable(msg: String) -> PlaybackError {
    PlaybackError::DeviceUnavailable(msg)
}

/// Launch description for a microphone node in the given format
fn description(format: AudioFormat) -> String {
    format!(
        "appsrc name=src is-live=true do-timestamp=true format=time \
         caps=audio/x-raw,format={},rate={},channels={},layout=interleaved ! \
         audioconvert ! audioresample ! \
         pipewiresink name=sink mode=provide",
        output::SAMPLE_FORMAT,
        format.sample_rate,
        format.channels
    )
}

pub struct VirtualMicrophonePipeline {
    pipeline: gstreamer::Pipeline,
    appsrc: AppSrc,
    format: AudioFormat,
}

impl VirtualMicrophonePipeline {
    pub fn new(format: AudioFormat) -> PlaybackResult<Self> {
        info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            "Creating virtual microphone pipeline"
        );
        gst_utils::init().map_err(unavailable)?;

        let pipeline = gst_utils::launch(&description(format)).map_err(unavailable)?;
        let appsrc = gst_utils::app_src(&pipeline, "src").map_err(unavailable)?;
        let sink = gst_utils::element(&pipeline, "sink").map_err(unavailable)?;

        let stream_props = gstreamer::Structure::builder("props")
            .field("media.class", "Audio/Source")
            .field("node.name", nodes::MICROPHONE_NODE_NAME)
            .field("node.description", nodes::MICROPHONE_DESCRIPTION)
            .build();
        sink.set_property("stream-properties", &stream_props);

        Ok(Self {
            pipeline,
            appsrc,
            format,
        })
    }

    pub fn start(&self) -> PlaybackResult<()> {
        gst_utils::set_state_and_wait(
            &self.pipeline,
            gstreamer::State::Playing,
            Duration::from_secs(timing::SINK_START_TIMEOUT_SECS),
        )
        .map_err(unavailable)?;
        info!("Virtual microphone pipeline started");
        Ok(())
    }

    pub fn stop(&self) {
        if let Err(e) = self.appsrc.end_of_stream() {
            debug!(?e, "Failed to send EOS to virtual microphone");
        }
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!(?e, "Failed to stop virtual microphone pipeline");
        }
        info!("Virtual microphone pipeline stopped");
    }

    pub fn push_block(&self, block: &AudioBlock) -> PlaybackResult<()> {
        if block.format != self.format {
            return Err(PlaybackError::UnsupportedFormat(format!(
                "Block format {}Hz/{}ch doesn't match pipeline {}Hz/{}ch",
                block.format.sample_rate,
                block.format.channels,
                self.format.sample_rate,
                self.format.channels
            )));
        }
        if let Some(message) = gst_utils::bus_error(&self.pipeline) {
            return Err(unavailable(message));
        }

        let buffer = gstreamer::Buffer::from_slice(block.as_bytes().to_vec());
        self.appsrc
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| unavailable(format!("Failed to push audio block: {:?}", e)))
    }
}

impl Drop for VirtualMicrophonePipeline {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_carries_format() {
        let desc = description(AudioFormat {
            sample_rate: 44_100,
            channels: 1,
        });
        assert!(desc.contains("format=F32LE,rate=44100,channels=1"));
        assert!(desc.contains("pipewiresink name=sink mode=provide"));
    }
}
