// SPDX-License-Identifier: GPL-3.0-only

//! Virtual microphone backend
//!
//! Publishes paced audio blocks as a PipeWire `Audio/Source` node that
//! other applications can pick as an input device.

mod pipeline;

pub use pipeline::VirtualMicrophonePipeline;

use crate::backends::sink::DeviceSink;
use crate::config::Config;
use crate::errors::{PlaybackError, PlaybackResult};
use crate::media::{AudioBlock, AudioFormat};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

static BLOCK_COUNTER: AtomicU64 = AtomicU64::new(0);

pub struct VirtualMicrophoneSink {
    format: AudioFormat,
    pipeline: Option<VirtualMicrophonePipeline>,
}

impl VirtualMicrophoneSink {
    pub fn new(config: &Config) -> Self {
        Self {
            format: config.audio.format(),
            pipeline: None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.pipeline.is_some()
    }
}

impl DeviceSink<AudioBlock> for VirtualMicrophoneSink {
    fn name(&self) -> &str {
        "virtual-microphone"
    }

    fn write(&mut self, block: &AudioBlock) -> PlaybackResult<()> {
        if self.pipeline.is_none() {
            let pipeline = VirtualMicrophonePipeline::new(self.format)?;
            pipeline.start()?;
            info!("Virtual microphone started");
            self.pipeline = Some(pipeline);
        }
        let Some(pipeline) = self.pipeline.as_ref() else {
            return Err(PlaybackError::DeviceUnavailable(
                "Virtual microphone not started".into(),
            ));
        };

        match pipeline.push_block(block) {
            Ok(()) => {
                let count = BLOCK_COUNTER.fetch_add(1, Ordering::Relaxed);
                if count % 500 == 0 {
                    debug!(block = count, "Virtual microphone blocks pushed");
                }
                Ok(())
            }
            Err(e @ PlaybackError::DeviceUnavailable(_)) => {
                warn!(error = %e, "Virtual microphone write failed, dropping pipeline");
                self.pipeline = None;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.stop();
        }
    }
}

impl Drop for VirtualMicrophoneSink {
    fn drop(&mut self) {
        self.close();
    }
}
