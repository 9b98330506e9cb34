//! # WAV Sink
//!
//! Decodes Opus packets and streams 16-bit PCM into a WAV file with `hound`.
//!
//! ## Alignment:
//! Incoming frames carry the synthetic PTS of the synchronizer, expressed in
//! samples. When the PTS runs ahead of what has been written (a lost packet,
//! an undecodable one) the gap is filled with silence, so sample `n` of the
//! file is always at synthetic time `n`.

use crate::error::RecorderError;
use crate::media::MediaFrame;
use crate::recording::recorder::MediaSink;
use async_trait::async_trait;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Longest Opus frame is 120 ms.
const MAX_FRAME_MS: usize = 120;

pub struct WavSink {
    path: PathBuf,
    writer: WavWriter<BufWriter<File>>,
    decoder: opus::Decoder,
    channels: u16,
    written: u64,
    pcm: Vec<i16>,
}

impl WavSink {
    pub fn create(path: &Path, sample_rate: u32, channels: u16) -> Result<Self, RecorderError> {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let writer = WavWriter::create(path, spec).map_err(|e| encode_error(path, e))?;

        let opus_channels = if channels == 1 {
            opus::Channels::Mono
        } else {
            opus::Channels::Stereo
        };
        let decoder =
            opus::Decoder::new(sample_rate, opus_channels).map_err(|e| encode_error(path, e))?;

        let max_samples = sample_rate as usize * MAX_FRAME_MS / 1000;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            decoder,
            channels,
            written: 0,
            pcm: vec![0; max_samples * channels as usize],
        })
    }

    fn pad_to(&mut self, pts: u64) -> Result<(), RecorderError> {
        while self.written < pts {
            for _ in 0..self.channels {
                self.writer
                    .write_sample(0i16)
                    .map_err(|e| encode_error(&self.path, e))?;
            }
            self.written += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl MediaSink for WavSink {
    async fn write(&mut self, frame: &MediaFrame) -> Result<(), RecorderError> {
        self.pad_to(frame.pts)?;

        // libopus treats an empty packet as loss and synthesizes a full frame.
        if frame.data.is_empty() {
            return Ok(());
        }

        let decoded = match self.decoder.decode(&frame.data, &mut self.pcm, false) {
            Ok(samples) => samples,
            Err(err) => {
                // Leave the gap; the next frame pads it with silence.
                warn!(path = %self.path.display(), error = %err, "Dropping undecodable Opus packet");
                return Ok(());
            }
        };

        let interleaved = decoded * self.channels as usize;
        for sample in &self.pcm[..interleaved] {
            self.writer
                .write_sample(*sample)
                .map_err(|e| encode_error(&self.path, e))?;
        }
        self.written += decoded as u64;

        Ok(())
    }

    async fn finalize(self: Box<Self>) -> Result<PathBuf, RecorderError> {
        let path = self.path;
        self.writer.finalize().map_err(|e| encode_error(&path, e))?;
        Ok(path)
    }
}

fn encode_error(path: &Path, err: impl std::fmt::Display) -> RecorderError {
    RecorderError::Encode {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
