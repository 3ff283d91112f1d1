// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer pipeline for virtual camera output
//!
//! Creates a pipeline that:
//! 1. Receives RGBA frames from the sync engine (via appsrc)
//! 2. Converts format as needed (via videoconvert)
//! 3. Outputs to a PipeWire `Video/Source` node or a v4l2loopback device

use crate::constants::{VirtualCameraOutput, nodes, output};
use crate::errors::{PlaybackError, PlaybackResult};
use crate::media::{Frame, VideoFormat};
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

static FRAME_COUNTER: AtomicU64 = AtomicU64::new(0);

fn unavailable(msg: String) -> PlaybackError {
    PlaybackError::DeviceUnavailable(msg)
}

fn make(factory: &str, name: &str) -> PlaybackResult<gstreamer::Element> {
    gstreamer::ElementFactory::make(factory)
        .name(name)
        .build()
        .map_err(|e| unavailable(format!("Failed to create {}: {}", factory, e)))
}

/// Virtual camera GStreamer pipeline
///
/// With [`VirtualCameraOutput::PipeWire`] the pipewiresink runs in provide
/// mode, creating a camera node other applications can select. With
/// [`VirtualCameraOutput::V4L2Loopback`] frames are written to a loopback
/// device node instead.
pub struct VirtualCameraPipeline {
    pipeline: gstreamer::Pipeline,
    appsrc: AppSrc,
    format: VideoFormat,
}

impl VirtualCameraPipeline {
    pub fn new(
        format: VideoFormat,
        output: VirtualCameraOutput,
        device: Option<&str>,
    ) -> PlaybackResult<Self> {
        info!(
            width = format.width,
            height = format.height,
            fps = format.fps,
            output = output.display_name(),
            "Creating virtual camera pipeline (RGBA)"
        );

        gstreamer::init().map_err(|e| unavailable(format!("GStreamer init failed: {}", e)))?;

        let pipeline = gstreamer::Pipeline::new();
        let appsrc = make("appsrc", "virtual_camera_src")?
            .downcast::<AppSrc>()
            .map_err(|_| unavailable("Failed to downcast to AppSrc".into()))?;
        let videoconvert = make("videoconvert", "virtual_camera_convert")?;

        let sink = match output {
            VirtualCameraOutput::PipeWire => {
                let sink = make("pipewiresink", "virtual_camera_sink")?;
                // "provide" mode exposes a source node; media.role = "Camera" is
                // what xdg-desktop-portal looks for
                sink.set_property_from_str("mode", "provide");
                let stream_props = gstreamer::Structure::builder("props")
                    .field("media.class", "Video/Source")
                    .field("media.role", "Camera")
                    .field("node.name", nodes::CAMERA_NODE_NAME)
                    .field("node.description", nodes::CAMERA_DESCRIPTION)
                    .build();
                sink.set_property("stream-properties", &stream_props);
                sink
            }
            VirtualCameraOutput::V4L2Loopback => {
                let device = device
                    .map(str::to_string)
                    .or_else(crate::backends::devices::find_v4l2loopback_device)
                    .ok_or_else(|| unavailable("no v4l2loopback device found".into()))?;
                let sink = make("v4l2sink", "virtual_camera_sink")?;
                sink.set_property("device", device.as_str());
                sink.set_property("sync", false);
                debug!(device = %device, "Using v4l2loopback device");
                sink
            }
        };

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", output::PIXEL_FORMAT)
            .field("width", format.width as i32)
            .field("height", format.height as i32)
            .field("framerate", gstreamer::Fraction::new(format.fps as i32, 1))
            .build();
        appsrc.set_caps(Some(&caps));
        appsrc.set_format(gstreamer::Format::Time);
        appsrc.set_is_live(true);
        appsrc.set_do_timestamp(true);
        appsrc.set_max_bytes((format.frame_size() * 2) as u64);

        pipeline
            .add_many([appsrc.upcast_ref(), &videoconvert, &sink])
            .map_err(|e| unavailable(format!("Failed to add elements: {}", e)))?;
        gstreamer::Element::link_many([appsrc.upcast_ref(), &videoconvert, &sink])
            .map_err(|e| unavailable(format!("Failed to link elements: {}", e)))?;

        Ok(Self {
            pipeline,
            appsrc,
            format,
        })
    }

    pub fn start(&self) -> PlaybackResult<()> {
        debug!("Starting virtual camera pipeline");
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| unavailable(format!("Failed to start pipeline: {}", e)))?;

        let (result, _state, _pending) = self.pipeline.state(gstreamer::ClockTime::from_seconds(
            crate::constants::timing::SINK_START_TIMEOUT_SECS,
        ));
        if result.is_err() {
            return Err(unavailable(
                "Virtual camera pipeline failed to reach Playing".into(),
            ));
        }

        info!("Virtual camera pipeline started");
        Ok(())
    }

    pub fn stop(&self) {
        debug!("Stopping virtual camera pipeline");
        if let Err(e) = self.appsrc.end_of_stream() {
            debug!(?e, "Failed to send EOS to virtual camera");
        }
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!(?e, "Failed to stop virtual camera pipeline");
        }
        info!("Virtual camera pipeline stopped");
    }

    /// Push an RGBA frame at the pipeline's output size
    pub fn push_frame(&self, frame: &Frame) -> PlaybackResult<()> {
        if frame.format.width != self.format.width || frame.format.height != self.format.height {
            return Err(PlaybackError::UnsupportedFormat(format!(
                "Frame size {}x{} doesn't match pipeline {}x{}",
                frame.format.width, frame.format.height, self.format.width, self.format.height
            )));
        }
        if frame.data.len() != self.format.frame_size() {
            return Err(PlaybackError::UnsupportedFormat(format!(
                "Frame data size {} doesn't match expected {}",
                frame.data.len(),
                self.format.frame_size()
            )));
        }

        // The buffer keeps the frame data alive; no copy
        let buffer = gstreamer::Buffer::from_slice(frame.data.clone());
        match self.appsrc.push_buffer(buffer) {
            Ok(_) => {
                let count = FRAME_COUNTER.fetch_add(1, Ordering::Relaxed);
                if count % 100 == 0 {
                    debug!(frame = count, "Virtual camera frames pushed");
                }
                Ok(())
            }
            Err(e) => Err(unavailable(format!("Failed to push frame: {:?}", e))),
        }
    }

    /// Whether the sink reported an error since the last check
    pub fn has_failed(&self) -> Option<String> {
        crate::backends::gst_utils::bus_error(&self.pipeline)
    }

    pub fn state(&self) -> gstreamer::State {
        let (_success, state, _pending) = self.pipeline.state(gstreamer::ClockTime::ZERO);
        state
    }
}

impl Drop for VirtualCameraPipeline {
    fn drop(&mut self) {
        debug!("Dropping virtual camera pipeline");
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            error!(?e, "Failed to set pipeline to Null on drop");
        }
    }
}
