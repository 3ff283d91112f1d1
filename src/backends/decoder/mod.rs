// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer decoder adapter
//!
//! Each stream of an entry gets its own pipeline so it can be pulled,
//! seeked and closed independently by its pacing loop:
//!
//! ```text
//! filesrc ─▶ decodebin ─▶ videoconvert ─▶ videoscale ─▶ videorate ─▶ RGBA appsink
//! filesrc ─▶ decodebin ─▶ audioconvert ─▶ audioresample ──────────▶ F32LE appsink
//! v4l2src ─▶ videoconvert ─▶ videoscale ─▶ videorate ─────────────▶ RGBA appsink
//! ```
//!
//! Appsinks run with `sync=false`; pacing is the sync engine's job.

mod rechunk;
mod stream;

pub use rechunk::AudioRechunker;
pub use stream::{GstAudioSource, GstVideoSource, SamplePipeline};

use crate::backends::{devices, gst_utils};
use crate::config::Config;
use crate::constants::output;
use crate::constants::timing::OPEN_TIMEOUT_SECS;
use crate::errors::{PlaybackError, PlaybackResult};
use crate::media::{
    AudioFormat, AudioSource, MediaDescriptor, MediaKind, OpenedMedia, SourceFactory,
    VideoFormat, VideoSource,
};
use gstreamer::prelude::*;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Opens playlist entries as GStreamer pipelines
#[derive(Debug, Clone)]
pub struct GstSourceFactory {
    video: VideoFormat,
    audio: AudioFormat,
    block_frames: u32,
    open_timeout: Duration,
}

impl GstSourceFactory {
    pub fn new(config: &Config) -> Self {
        Self {
            video: config.video,
            audio: config.audio.format(),
            block_frames: config.audio.block_frames,
            open_timeout: Duration::from_secs(OPEN_TIMEOUT_SECS),
        }
    }

    fn video_caps(&self) -> String {
        format!(
            "video/x-raw,format={},width={},height={},framerate={}/1,pixel-aspect-ratio=1/1",
            output::PIXEL_FORMAT,
            self.video.width,
            self.video.height,
            self.video.fps
        )
    }

    fn audio_caps(&self) -> String {
        format!(
            "audio/x-raw,format={},rate={},channels={},layout=interleaved",
            output::SAMPLE_FORMAT,
            self.audio.sample_rate,
            self.audio.channels
        )
    }

    /// Build, configure and preroll one stream pipeline
    fn prepare(
        &self,
        label: String,
        description: &str,
        source_property: (&str, &str),
        live: bool,
    ) -> PlaybackResult<(SamplePipeline, Option<Duration>)> {
        let decode_err = |msg: String| PlaybackError::DecodeError(format!("{}: {}", label, msg));

        let pipeline = gst_utils::launch(description).map_err(decode_err)?;
        let (property, value) = source_property;
        gst_utils::element(&pipeline, "src")
            .map_err(decode_err)?
            .set_property(property, value);
        let appsink = gst_utils::app_sink(&pipeline, "sink").map_err(decode_err)?;

        // Live sources do not preroll; go straight to Playing
        let target = if live {
            gstreamer::State::Playing
        } else {
            gstreamer::State::Paused
        };
        if let Err(e) = gst_utils::set_state_and_wait(&pipeline, target, self.open_timeout) {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(decode_err(e));
        }

        let duration = pipeline
            .query_duration::<gstreamer::ClockTime>()
            .map(gst_utils::duration);

        if !live
            && let Err(e) =
                gst_utils::set_state_and_wait(&pipeline, gstreamer::State::Playing, self.open_timeout)
        {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(decode_err(e));
        }

        debug!(label = %label, ?duration, "Stream pipeline ready");
        Ok((SamplePipeline::new(label, pipeline, appsink, live), duration))
    }

    fn open_video_file(&self, path: &str) -> PlaybackResult<(VideoSource, Option<Duration>)> {
        let description = format!(
            "filesrc name=src ! decodebin ! queue ! videoconvert ! videoscale ! videorate ! {} ! \
             appsink name=sink sync=false max-buffers=4 drop=false",
            self.video_caps()
        );
        let (pipeline, duration) =
            self.prepare(format!("video {}", path), &description, ("location", path), false)?;
        Ok((
            Box::new(GstVideoSource::new(pipeline, self.video.fps)),
            duration,
        ))
    }

    fn open_audio_file(&self, path: &str) -> PlaybackResult<(AudioSource, Option<Duration>)> {
        let description = format!(
            "filesrc name=src ! decodebin ! queue ! audioconvert ! audioresample ! {} ! \
             appsink name=sink sync=false max-buffers=8 drop=false",
            self.audio_caps()
        );
        let (pipeline, duration) =
            self.prepare(format!("audio {}", path), &description, ("location", path), false)?;
        Ok((
            Box::new(GstAudioSource::new(pipeline, self.audio, self.block_frames)),
            duration,
        ))
    }

    fn open_camera(&self, path: &str) -> PlaybackResult<VideoSource> {
        let description = format!(
            "v4l2src name=src ! videoconvert ! videoscale ! videorate ! {} ! \
             appsink name=sink sync=false max-buffers=1 drop=true",
            self.video_caps()
        );
        let (pipeline, _) =
            self.prepare(format!("camera {}", path), &description, ("device", path), true)?;
        Ok(Box::new(GstVideoSource::new(pipeline, self.video.fps)))
    }
}

fn path_str(path: &Path) -> PlaybackResult<&str> {
    path.to_str().ok_or_else(|| {
        PlaybackError::UnsupportedFormat(format!("{} is not valid UTF-8", path.display()))
    })
}

impl SourceFactory for GstSourceFactory {
    fn open(&self, descriptor: &MediaDescriptor) -> PlaybackResult<OpenedMedia> {
        gst_utils::init().map_err(PlaybackError::DecodeError)?;
        let path = path_str(&descriptor.path)?;

        let media = match descriptor.kind {
            MediaKind::VideoFile => {
                let (video, duration) = self.open_video_file(path)?;
                // A video without an audio track is still playable
                let audio = match self.open_audio_file(path) {
                    Ok((audio, _)) => Some(audio),
                    Err(e) => {
                        debug!(path, error = %e, "No audio stream");
                        None
                    }
                };
                OpenedMedia {
                    descriptor: descriptor.clone(),
                    video: Some(video),
                    audio,
                    duration,
                }
            }
            MediaKind::AudioFile => {
                let (audio, duration) = self.open_audio_file(path)?;
                OpenedMedia {
                    descriptor: descriptor.clone(),
                    video: None,
                    audio: Some(audio),
                    duration,
                }
            }
            MediaKind::LiveCamera => {
                devices::validate_camera(&descriptor.path)?;
                OpenedMedia {
                    descriptor: descriptor.clone(),
                    video: Some(self.open_camera(path)?),
                    audio: None,
                    duration: None,
                }
            }
        };

        info!(
            path,
            kind = %descriptor.kind,
            video = media.video.is_some(),
            audio = media.audio.is_some(),
            duration_ms = media.duration.map(|d| d.as_millis() as u64),
            "Opened entry"
        );
        Ok(media)
    }
}
