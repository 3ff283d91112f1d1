// SPDX-License-Identifier: GPL-3.0-only

//! Pull sources backed by a GStreamer `appsink`

use super::rechunk::AudioRechunker;
use crate::backends::gst_utils;
use crate::errors::{PlaybackError, PlaybackResult};
use crate::media::{
    AudioBlock, AudioFormat, Frame, FrameData, MediaSource, PixelFormat, SourceRead, VideoFormat,
};
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of one bounded pull
enum Pulled {
    Sample(gstreamer::Sample, Duration),
    Pending,
    EndOfStream,
}

/// Sample timestamp in nanoseconds from zero
///
/// Prefers the segment's stream time; otherwise the raw PTS is shifted so
/// the first one seen becomes zero.
fn normalize(stream_time: Option<u64>, pts: Option<u64>, base: &mut Option<u64>) -> u64 {
    if let Some(time) = stream_time {
        return time;
    }
    let pts = pts.unwrap_or(0);
    pts.saturating_sub(*base.get_or_insert(pts))
}

/// A running pipeline ending in an appsink
pub struct SamplePipeline {
    label: String,
    pipeline: Option<gstreamer::Pipeline>,
    appsink: AppSink,
    live: bool,
    /// First timestamp seen when the segment cannot place a sample
    base_pts: Option<u64>,
}

impl SamplePipeline {
    pub fn new(label: String, pipeline: gstreamer::Pipeline, appsink: AppSink, live: bool) -> Self {
        Self {
            label,
            pipeline: Some(pipeline),
            appsink,
            live,
            base_pts: None,
        }
    }

    fn pull(&mut self, timeout: Duration) -> PlaybackResult<Pulled> {
        let Some(pipeline) = self.pipeline.as_ref() else {
            return Err(PlaybackError::DecodeError(format!("{} is closed", self.label)));
        };
        if let Some(message) = gst_utils::bus_error(pipeline) {
            return Err(PlaybackError::DecodeError(format!(
                "{}: {}",
                self.label, message
            )));
        }

        let Some(sample) = self.appsink.try_pull_sample(gst_utils::clock_time(timeout)) else {
            return Ok(if self.appsink.is_eos() {
                Pulled::EndOfStream
            } else {
                Pulled::Pending
            });
        };

        let pts = sample.buffer().and_then(|buffer| buffer.pts());
        // Segment stream time is zero at the start of a file and follows seeks
        let stream_time = if self.live {
            None
        } else {
            sample
                .segment()
                .and_then(|segment| segment.downcast_ref::<gstreamer::ClockTime>())
                .zip(pts)
                .and_then(|(segment, pts)| segment.to_stream_time(pts))
        };
        let timestamp = normalize(
            stream_time.map(|time| time.nseconds()),
            pts.map(|pts| pts.nseconds()),
            &mut self.base_pts,
        );
        Ok(Pulled::Sample(sample, Duration::from_nanos(timestamp)))
    }

    fn seek(&mut self, position: Duration) -> PlaybackResult<()> {
        if self.live {
            return Err(PlaybackError::NotSeekable);
        }
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or_else(|| PlaybackError::DecodeError(format!("{} is closed", self.label)))?;
        pipeline
            .seek_simple(
                gstreamer::SeekFlags::FLUSH | gstreamer::SeekFlags::ACCURATE,
                gst_utils::clock_time(position),
            )
            .map_err(|e| PlaybackError::DecodeError(format!("{} seek failed: {}", self.label, e)))?;
        debug!(label = %self.label, position_ms = position.as_millis() as u64, "Pipeline seeked");
        Ok(())
    }

    fn close(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            debug!(label = %self.label, "Closing decoder pipeline");
            if let Err(e) = pipeline.set_state(gstreamer::State::Null) {
                warn!(label = %self.label, ?e, "Failed to set decoder pipeline to Null");
            }
        }
    }
}

impl Drop for SamplePipeline {
    fn drop(&mut self) {
        self.close();
    }
}

/// Decoded RGBA frames at the configured output size
pub struct GstVideoSource {
    pipeline: SamplePipeline,
    fps: u32,
}

impl GstVideoSource {
    pub fn new(pipeline: SamplePipeline, fps: u32) -> Self {
        Self { pipeline, fps }
    }

    fn frame_from_sample(&self, sample: &gstreamer::Sample, timestamp: Duration) -> PlaybackResult<Frame> {
        let caps = sample
            .caps()
            .ok_or_else(|| PlaybackError::DecodeError("No caps on sample".into()))?;
        let info = gstreamer_video::VideoInfo::from_caps(caps)
            .map_err(|e| PlaybackError::DecodeError(format!("Invalid video caps: {}", e)))?;
        let format = VideoFormat {
            width: info.width(),
            height: info.height(),
            fps: self.fps,
            pixel_format: PixelFormat::Rgba,
        };
        let row_bytes = format.width as usize * format.pixel_format.bytes_per_pixel();
        let stride = info.stride()[0] as usize;

        let buffer = sample
            .buffer_owned()
            .ok_or_else(|| PlaybackError::DecodeError("No buffer in sample".into()))?;

        let data = if stride == row_bytes {
            let mapped = buffer
                .into_mapped_buffer_readable()
                .map_err(|_| PlaybackError::DecodeError("Failed to map buffer".into()))?;
            FrameData::from_mapped_buffer(mapped)
        } else {
            // Padded rows; repack tightly
            let map = buffer
                .map_readable()
                .map_err(|_| PlaybackError::DecodeError("Failed to map buffer".into()))?;
            let mut packed = Vec::with_capacity(format.frame_size());
            for row in map.as_slice().chunks(stride).take(format.height as usize) {
                packed.extend_from_slice(&row[..row_bytes.min(row.len())]);
            }
            FrameData::from(packed)
        };

        Ok(Frame {
            data,
            format,
            timestamp,
        })
    }
}

impl MediaSource<Frame> for GstVideoSource {
    fn read(&mut self, timeout: Duration) -> PlaybackResult<SourceRead<Frame>> {
        match self.pipeline.pull(timeout)? {
            Pulled::Sample(sample, timestamp) => {
                Ok(SourceRead::Unit(self.frame_from_sample(&sample, timestamp)?))
            }
            Pulled::Pending => Ok(SourceRead::Pending),
            Pulled::EndOfStream => Ok(SourceRead::EndOfStream),
        }
    }

    fn seek(&mut self, position: Duration) -> PlaybackResult<()> {
        self.pipeline.seek(position)
    }

    fn close(&mut self) {
        self.pipeline.close();
    }
}

/// Interleaved F32LE blocks of a fixed size
pub struct GstAudioSource {
    pipeline: SamplePipeline,
    rechunker: AudioRechunker,
}

impl GstAudioSource {
    pub fn new(pipeline: SamplePipeline, format: AudioFormat, block_frames: u32) -> Self {
        Self {
            pipeline,
            rechunker: AudioRechunker::new(format, block_frames),
        }
    }
}

fn samples_from_bytes(bytes: &[u8]) -> Vec<f32> {
    match bytemuck::try_cast_slice::<u8, f32>(bytes) {
        Ok(samples) => samples.to_vec(),
        Err(_) => bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    }
}

impl MediaSource<AudioBlock> for GstAudioSource {
    fn read(&mut self, timeout: Duration) -> PlaybackResult<SourceRead<AudioBlock>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(block) = self.rechunker.pop() {
                return Ok(SourceRead::Unit(block));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.pipeline.pull(remaining)? {
                Pulled::Sample(sample, timestamp) => {
                    let buffer = sample
                        .buffer()
                        .ok_or_else(|| PlaybackError::DecodeError("No buffer in sample".into()))?;
                    let map = buffer
                        .map_readable()
                        .map_err(|_| PlaybackError::DecodeError("Failed to map buffer".into()))?;
                    self.rechunker
                        .push(&samples_from_bytes(map.as_slice()), timestamp);
                }
                Pulled::Pending => return Ok(SourceRead::Pending),
                Pulled::EndOfStream => {
                    return Ok(match self.rechunker.flush() {
                        Some(block) => SourceRead::Unit(block),
                        None => SourceRead::EndOfStream,
                    });
                }
            }
        }
    }

    fn seek(&mut self, position: Duration) -> PlaybackResult<()> {
        self.rechunker.clear();
        self.pipeline.seek(position)
    }

    fn close(&mut self) {
        self.pipeline.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_from_unaligned_bytes() {
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&1.5f32.to_le_bytes());
        bytes.extend_from_slice(&(-0.25f32).to_le_bytes());
        assert_eq!(samples_from_bytes(&bytes[1..]), vec![1.5, -0.25]);
    }

    #[test]
    fn test_raw_pts_is_rebased_to_first_sample() {
        let mut base = None;
        assert_eq!(normalize(None, Some(1_400_000_000), &mut base), 0);
        assert_eq!(normalize(None, Some(1_440_000_000), &mut base), 40_000_000);
        assert_eq!(normalize(None, Some(900_000_000), &mut base), 0);
    }

    #[test]
    fn test_stream_time_wins_over_raw_pts() {
        let mut base = None;
        assert_eq!(normalize(Some(0), Some(1_400_000_000), &mut base), 0);
        assert_eq!(
            normalize(Some(10_000_000_000), Some(11_400_000_000), &mut base),
            10_000_000_000
        );
        assert_eq!(base, None);
    }
}
