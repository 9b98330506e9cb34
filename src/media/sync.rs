//! # Track Synchronizer
//!
//! Browsers send audio and video with independent RTP clocks and arbitrary
//! start offsets. To get files that line up, every recorded track is read
//! through a [`TrackSynchronizer`], which discards the producer's timestamps
//! and counts instead:
//!
//! - **Video**: one unit per frame. At 30 fps on a 90 kHz base each frame
//!   advances the clock by 3000 ticks.
//! - **Audio**: one unit per sample. Each frame advances the clock by its
//!   sample count, or by the configured default when the count is unknown.
//!
//! The first frame of every track is stamped 0 and arrival time never enters
//! the computation, so all files of a session share the same origin.

use crate::config::{AudioRecordingConfig, VideoRecordingConfig};
use crate::error::TrackError;
use crate::media::frame::{MediaCodec, MediaFrame, MediaTrack, TrackKind};
use std::sync::Arc;

/// How a synchronizer advances its counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockConfig {
    Video { ticks_per_frame: u64, clock_rate: u32 },
    Audio { sample_rate: u32, default_frame_samples: u32 },
}

impl ClockConfig {
    pub fn video(framerate: u32, clock_rate: u32) -> Self {
        ClockConfig::Video {
            ticks_per_frame: u64::from(clock_rate / framerate.max(1)),
            clock_rate,
        }
    }

    pub fn audio(sample_rate: u32, default_frame_samples: u32) -> Self {
        ClockConfig::Audio {
            sample_rate,
            default_frame_samples,
        }
    }

    pub fn for_kind(
        kind: TrackKind,
        audio: &AudioRecordingConfig,
        video: &VideoRecordingConfig,
    ) -> Self {
        match kind {
            TrackKind::Audio => Self::audio(audio.sample_rate, audio.default_frame_samples),
            TrackKind::Video => Self::video(video.framerate, video.clock_rate),
        }
    }

    /// Ticks per second of the synthetic clock.
    pub fn rate(&self) -> u32 {
        match self {
            ClockConfig::Video { clock_rate, .. } => *clock_rate,
            ClockConfig::Audio { sample_rate, .. } => *sample_rate,
        }
    }
}

/// Wraps one inbound track and restamps every frame it yields.
pub struct TrackSynchronizer {
    track: Arc<dyn MediaTrack>,
    clock: ClockConfig,
    counter: u64,
}

impl TrackSynchronizer {
    pub fn new(track: Arc<dyn MediaTrack>, clock: ClockConfig) -> Self {
        Self {
            track,
            clock,
            counter: 0,
        }
    }

    pub fn codec(&self) -> MediaCodec {
        self.track.codec()
    }

    pub fn clock(&self) -> ClockConfig {
        self.clock
    }

    /// Receive the next frame from the underlying track with a synthetic PTS.
    pub async fn recv(&mut self) -> Result<MediaFrame, TrackError> {
        let frame = self.track.recv().await?;
        Ok(self.stamp(frame))
    }

    fn stamp(&mut self, mut frame: MediaFrame) -> MediaFrame {
        match self.clock {
            ClockConfig::Video { ticks_per_frame, .. } => {
                frame.pts = self.counter * ticks_per_frame;
                self.counter += 1;
            }
            ClockConfig::Audio {
                default_frame_samples,
                ..
            } => {
                let samples = frame.samples.unwrap_or(default_frame_samples);
                frame.pts = self.counter;
                frame.samples = Some(samples);
                self.counter += u64::from(samples);
            }
        }
        frame
    }
}
