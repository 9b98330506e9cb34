//! # Video Sink
//!
//! Re-encodes the candidate's camera into MP4 by streaming it into an `ffmpeg`
//! child process.
//!
//! - VP8/VP9 frames are wrapped in IVF. The synthetic PTS goes into every
//!   frame header so ffmpeg sees the synchronized clock, not arrival time.
//! - H.264 arrives as an Annex-B elementary stream and is piped as-is with an
//!   explicit input frame rate.
//!
//! Output is always encoded with the configured encoder, bitrate and frame
//! rate, so file properties do not depend on what the browser negotiated.

use crate::config::VideoRecordingConfig;
use crate::error::RecorderError;
use crate::media::{MediaCodec, MediaFrame};
use crate::recording::recorder::MediaSink;
use async_trait::async_trait;
use byteorder::{LittleEndian, WriteBytesExt};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const IVF_HEADER_LEN: u16 = 32;
const DEFAULT_WIDTH: u16 = 640;
const DEFAULT_HEIGHT: u16 = 480;
/// Bytes of ffmpeg stderr kept for the error report.
const STDERR_TAIL_LEN: usize = 4096;

pub struct FfmpegVideoSink {
    path: PathBuf,
    codec: MediaCodec,
    clock_rate: u32,
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_tail: JoinHandle<String>,
    header_written: bool,
}

impl FfmpegVideoSink {
    pub fn spawn(
        ffmpeg_path: &str,
        config: &VideoRecordingConfig,
        codec: MediaCodec,
        clock_rate: u32,
        path: &Path,
    ) -> Result<Self, RecorderError> {
        let args = ffmpeg_args(config, codec, path)?;
        debug!(ffmpeg = ffmpeg_path, ?args, "Spawning video encoder");

        let mut child = Command::new(ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RecorderError::Spawn(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RecorderError::Spawn("Failed to capture ffmpeg stdin".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RecorderError::Spawn("Failed to capture ffmpeg stderr".to_string()))?;

        // stderr is drained while encoding so a full pipe never stalls ffmpeg.
        let stderr_tail = tokio::spawn(read_tail(stderr, STDERR_TAIL_LEN));

        Ok(Self {
            path: path.to_path_buf(),
            codec,
            clock_rate,
            child,
            stdin: Some(stdin),
            stderr_tail,
            header_written: false,
        })
    }

    async fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), RecorderError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| RecorderError::Task("ffmpeg stdin already closed".to_string()))?;
        stdin.write_all(bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl MediaSink for FfmpegVideoSink {
    async fn write(&mut self, frame: &MediaFrame) -> Result<(), RecorderError> {
        if frame.data.is_empty() {
            return Ok(());
        }

        match self.codec {
            MediaCodec::Vp8 | MediaCodec::Vp9 => {
                if !self.header_written {
                    let (width, height) = match self.codec {
                        MediaCodec::Vp8 => vp8_dimensions(&frame.data),
                        _ => None,
                    }
                    .unwrap_or((DEFAULT_WIDTH, DEFAULT_HEIGHT));
                    let header = ivf_file_header(self.codec, width, height, self.clock_rate)?;
                    self.write_bytes(&header).await?;
                    self.header_written = true;
                }

                let header = ivf_frame_header(frame.data.len() as u32, frame.pts)?;
                self.write_bytes(&header).await?;
                self.write_bytes(&frame.data).await
            }
            MediaCodec::H264 => self.write_bytes(&frame.data).await,
            MediaCodec::Opus => Err(RecorderError::UnsupportedCodec {
                role: "video".to_string(),
                codec: self.codec.to_string(),
            }),
        }
    }

    async fn finalize(mut self: Box<Self>) -> Result<PathBuf, RecorderError> {
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(err) = stdin.shutdown().await {
                warn!(path = %self.path.display(), error = %err, "Failed to close ffmpeg stdin");
            }
        }

        let status = self.child.wait().await?;
        let stderr = self.stderr_tail.await.unwrap_or_default();
        if !status.success() {
            return Err(RecorderError::Ffmpeg {
                status: status.to_string(),
                stderr,
            });
        }

        Ok(self.path)
    }
}

/// Read `reader` to the end, keeping only the last `limit` bytes.
async fn read_tail<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> String {
    let mut tail = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > limit {
                    tail.drain(..tail.len() - limit);
                }
            }
        }
    }
    String::from_utf8_lossy(&tail).trim().to_string()
}

fn ffmpeg_args(
    config: &VideoRecordingConfig,
    codec: MediaCodec,
    path: &Path,
) -> Result<Vec<String>, RecorderError> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-y"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    match codec {
        MediaCodec::Vp8 | MediaCodec::Vp9 => {
            args.extend(["-f", "ivf"].map(String::from));
        }
        MediaCodec::H264 => {
            args.extend(["-f".to_string(), "h264".to_string()]);
            args.extend(["-framerate".to_string(), config.framerate.to_string()]);
        }
        MediaCodec::Opus => {
            return Err(RecorderError::UnsupportedCodec {
                role: "video".to_string(),
                codec: codec.to_string(),
            })
        }
    }

    args.extend(["-i", "pipe:0"].map(String::from));
    args.extend([
        "-c:v".to_string(),
        config.encoder.clone(),
        "-b:v".to_string(),
        config.bitrate.clone(),
        "-r".to_string(),
        config.framerate.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        path.to_string_lossy().into_owned(),
    ]);

    Ok(args)
}

/// 32-byte IVF file header.
///
/// The timebase is `1 / clock_rate`, so frame PTS values are synthetic clock
/// ticks. The frame count is left at 0 since the stream length is unknown.
fn ivf_file_header(
    codec: MediaCodec,
    width: u16,
    height: u16,
    clock_rate: u32,
) -> std::io::Result<Vec<u8>> {
    let fourcc: &[u8; 4] = match codec {
        MediaCodec::Vp9 => b"VP90",
        _ => b"VP80",
    };

    let mut header = Vec::with_capacity(IVF_HEADER_LEN as usize);
    header.extend_from_slice(b"DKIF");
    WriteBytesExt::write_u16::<LittleEndian>(&mut header, 0)?;
    WriteBytesExt::write_u16::<LittleEndian>(&mut header, IVF_HEADER_LEN)?;
    header.extend_from_slice(fourcc);
    WriteBytesExt::write_u16::<LittleEndian>(&mut header, width)?;
    WriteBytesExt::write_u16::<LittleEndian>(&mut header, height)?;
    WriteBytesExt::write_u32::<LittleEndian>(&mut header, clock_rate)?;
    WriteBytesExt::write_u32::<LittleEndian>(&mut header, 1)?;
    WriteBytesExt::write_u32::<LittleEndian>(&mut header, 0)?;
    WriteBytesExt::write_u32::<LittleEndian>(&mut header, 0)?;
    Ok(header)
}

fn ivf_frame_header(size: u32, pts: u64) -> std::io::Result<Vec<u8>> {
    let mut header = Vec::with_capacity(12);
    WriteBytesExt::write_u32::<LittleEndian>(&mut header, size)?;
    WriteBytesExt::write_u64::<LittleEndian>(&mut header, pts)?;
    Ok(header)
}

/// Width and height from a VP8 keyframe, `None` for interframes.
fn vp8_dimensions(frame: &[u8]) -> Option<(u16, u16)> {
    if frame.len() < 10 {
        return None;
    }
    let is_keyframe = frame[0] & 0x01 == 0;
    if !is_keyframe || frame[3..6] != [0x9d, 0x01, 0x2a] {
        return None;
    }
    let width = u16::from_le_bytes([frame[6], frame[7]]) & 0x3fff;
    let height = u16::from_le_bytes([frame[8], frame[9]]) & 0x3fff;
    Some((width, height))
}
