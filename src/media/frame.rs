//! # Media Frames and Tracks
//!
//! A [`MediaTrack`] is anything that yields [`MediaFrame`]s: a remote WebRTC
//! track in production, a queue of canned frames in tests. The recording side
//! only ever sees this trait, so it never depends on the transport.

use crate::error::TrackError;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two kinds of media a peer may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Codecs the recorders know how to persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaCodec {
    Opus,
    Vp8,
    Vp9,
    H264,
}

impl MediaCodec {
    /// Map an RTP codec MIME type (`audio/opus`, `video/VP8`, ...) to a codec.
    ///
    /// Matching is case-insensitive since browsers disagree on capitalization.
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime.to_ascii_lowercase().as_str() {
            "audio/opus" => Some(MediaCodec::Opus),
            "video/vp8" => Some(MediaCodec::Vp8),
            "video/vp9" => Some(MediaCodec::Vp9),
            "video/h264" => Some(MediaCodec::H264),
            _ => None,
        }
    }

    pub fn kind(&self) -> TrackKind {
        match self {
            MediaCodec::Opus => TrackKind::Audio,
            MediaCodec::Vp8 | MediaCodec::Vp9 | MediaCodec::H264 => TrackKind::Video,
        }
    }
}

impl fmt::Display for MediaCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MediaCodec::Opus => "opus",
            MediaCodec::Vp8 => "vp8",
            MediaCodec::Vp9 => "vp9",
            MediaCodec::H264 => "h264",
        };
        f.write_str(name)
    }
}

/// One encoded unit of media.
///
/// - Audio: one Opus packet
/// - Video: one complete encoded picture, reassembled from RTP
///
/// `pts` is whatever the producer stamped on it. Recorders never trust it;
/// they receive frames through a `TrackSynchronizer` which overwrites it.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub data: Bytes,
    pub pts: u64,

    /// Decoded sample count, when the producer could determine it (audio only)
    pub samples: Option<u32>,
}

impl MediaFrame {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pts: 0,
            samples: None,
        }
    }

    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = Some(samples);
        self
    }
}

/// An inbound media track.
///
/// `recv` returns `TrackError::Ended` once the remote side stops; every call
/// after that returns the same error.
#[async_trait]
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    fn codec(&self) -> MediaCodec;
    async fn recv(&self) -> Result<MediaFrame, TrackError>;
}
