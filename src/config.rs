//! # Configuration Management
//!
//! Loads the server configuration from several layered sources:
//! - Built-in defaults (the `Default` impl below)
//! - An optional `config.toml` next to the binary
//! - Environment variables prefixed with `APP__` (nesting separated by `__`)
//! - The bare `HOST` / `PORT` variables used by most deployment platforms
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT`
//! 2. `APP__SERVER__PORT`, `APP__RECORDING__OUTPUT_DIR`, ...
//! 3. `config.toml`
//! 4. Defaults

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Rates the Opus decoder can produce directly.
const OPUS_SAMPLE_RATES: [u32; 5] = [8_000, 12_000, 16_000, 24_000, 48_000];

/// Complete application configuration.
///
/// Split into logical groups so each subsystem only receives the part it needs:
/// the HTTP layer reads `server`, the hub reads `signaling`, the recording
/// coordinator reads `recording`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub signaling: SignalingConfig,
    pub recording: RecordingConfig,
}

/// Where the HTTP/WebSocket server listens.
///
/// - `host = "127.0.0.1"`: local browsers only (development)
/// - `host = "0.0.0.0"`: reachable from other machines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Control-channel and negotiation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// Deadline for one offer/answer exchange, in seconds
    pub negotiation_timeout_secs: u64,

    /// How often the server pings each WebSocket client
    pub heartbeat_interval_secs: u64,

    /// A client that has not answered a ping for this long is dropped
    pub client_timeout_secs: u64,

    /// STUN/TURN URLs handed to every peer connection
    pub ice_servers: Vec<String>,
}

impl SignalingConfig {
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}

/// Output location and per-kind media settings for recorded sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Directory that receives `{sequence}-{role}-{timestamp}.{ext}` files
    pub output_dir: PathBuf,

    /// ffmpeg binary used by the video recorder
    pub ffmpeg_path: String,

    pub audio: AudioRecordingConfig,
    pub video: VideoRecordingConfig,
}

/// Audio recorders write uncompressed PCM.
///
/// ## Clock:
/// The synthetic clock counts samples at `sample_rate`. When a frame does not
/// report how many samples it carries, `default_frame_samples` is assumed
/// (960 = 20 ms at 48 kHz, the usual WebRTC Opus packetization).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioRecordingConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub default_frame_samples: u32,
    pub extension: String,
}

/// Video recorders are re-encoded by ffmpeg with an explicit configuration.
///
/// ## Clock:
/// Each frame advances the synthetic clock by `clock_rate / framerate` ticks,
/// e.g. 90 kHz / 30 fps = 3000 ticks per frame. The division must be exact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRecordingConfig {
    /// ffmpeg encoder name (`libx264`, `libx265`, ...)
    pub encoder: String,

    /// Target bitrate in ffmpeg notation (`2000k`)
    pub bitrate: String,

    /// Nominal frame rate, in frames per second
    pub framerate: u32,

    /// Tick base of the synthetic clock, in ticks per second
    pub clock_rate: u32,

    pub extension: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            signaling: SignalingConfig {
                negotiation_timeout_secs: 30,
                heartbeat_interval_secs: 15,
                client_timeout_secs: 45,
                ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            },
            recording: RecordingConfig {
                output_dir: PathBuf::from("recordings"),
                ffmpeg_path: "ffmpeg".to_string(),
                audio: AudioRecordingConfig {
                    sample_rate: 48_000,
                    channels: 1,
                    default_frame_samples: 960,
                    extension: "wav".to_string(),
                },
                video: VideoRecordingConfig {
                    encoder: "libx264".to_string(),
                    bitrate: "2000k".to_string(),
                    framerate: 30,
                    clock_rate: 90_000,
                    extension: "mp4".to_string(),
                },
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP__SERVER__HOST=0.0.0.0`
    /// - `APP__RECORDING__OUTPUT_DIR=/var/lib/interviews`
    /// - `APP__RECORDING__VIDEO__BITRATE=4000k`
    /// - `HOST=0.0.0.0`, `PORT=3000`
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("signaling.ice_servers")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations that would make the server unusable.
    ///
    /// Synthetic clocks need non-zero rates.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.signaling.negotiation_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Negotiation timeout must be greater than 0"));
        }

        if self.signaling.heartbeat_interval_secs == 0
            || self.signaling.client_timeout_secs <= self.signaling.heartbeat_interval_secs
        {
            return Err(anyhow::anyhow!(
                "Client timeout must be longer than a non-zero heartbeat interval"
            ));
        }

        let audio = &self.recording.audio;
        if audio.sample_rate == 0 || audio.channels == 0 || audio.default_frame_samples == 0 {
            return Err(anyhow::anyhow!(
                "Audio sample rate, channel count and default frame size must be greater than 0"
            ));
        }

        if !OPUS_SAMPLE_RATES.contains(&audio.sample_rate) || audio.channels > 2 {
            return Err(anyhow::anyhow!(
                "Audio must be mono or stereo at one of {:?} Hz",
                OPUS_SAMPLE_RATES
            ));
        }

        let video = &self.recording.video;
        if video.framerate == 0 || video.clock_rate == 0 {
            return Err(anyhow::anyhow!("Video framerate and clock rate must be greater than 0"));
        }

        if video.clock_rate % video.framerate != 0 {
            return Err(anyhow::anyhow!(
                "Video clock rate {} is not a whole multiple of framerate {}",
                video.clock_rate,
                video.framerate
            ));
        }

        if video.encoder.trim().is_empty() || video.bitrate.trim().is_empty() {
            return Err(anyhow::anyhow!("Video encoder and bitrate must be set"));
        }

        if audio.extension.trim().is_empty() || video.extension.trim().is_empty() {
            return Err(anyhow::anyhow!("Recording file extensions must be set"));
        }

        Ok(())
    }
}
