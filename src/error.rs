//! # Error Handling
//!
//! Two layers of errors live here:
//!
//! - [`AppError`] is what HTTP handlers return. It knows how to turn itself into
//!   a JSON error response through actix's `ResponseError` trait.
//! - The domain errors (`SignalingError`, `PeerError`, `TrackError`,
//!   `RecorderError`, `ChannelError`) are produced by the signaling and
//!   recording machinery. They are declared with `thiserror`, which derives the
//!   `Display` and `std::error::Error` boilerplate from the `#[error(...)]`
//!   attributes.
//!
//! ## JSON Response Format:
//! ```json
//! {
//!   "error": {
//!     "type": "not_found",
//!     "message": "Room 'lobby' does not exist",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by the HTTP API.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **NotFound**: Requested resource doesn't exist (404 errors)
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    NotFound(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(format!("I/O error: {}", err))
    }
}

/// Failures surfaced to a signaling client.
///
/// The `Display` output of every variant is exactly the text sent back in the
/// `error {message}` frame, so keep the messages short and user-facing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignalingError {
    /// Message is illegal for the sender's role or the room's state
    #[error("{0}")]
    ProtocolViolation(String),

    /// The requested role is already taken
    #[error("{0}")]
    ResourceConflict(String),

    /// Offer/answer exchange failed or ran past its deadline
    #[error("Negotiation failed: {0}")]
    NegotiationFailure(String),

    /// Control frame could not be decoded
    #[error("Invalid message: {0}")]
    MalformedMessage(String),

    /// One or more recorders could not start or stop
    #[error("Recording failed: {0}")]
    RecorderFailure(String),
}

impl SignalingError {
    pub fn violation(reason: impl Into<String>) -> Self {
        SignalingError::ProtocolViolation(reason.into())
    }
}

/// Errors from a media connection.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("failed to set up peer connection: {0}")]
    Setup(String),

    #[error("invalid session description: {0}")]
    InvalidDescription(String),

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("invalid ICE candidate: {0}")]
    Candidate(String),

    #[error("peer connection is closed")]
    Closed,
}

impl From<webrtc::Error> for PeerError {
    fn from(err: webrtc::Error) -> Self {
        PeerError::Negotiation(err.to_string())
    }
}

/// Errors reading from an inbound media track.
#[derive(Debug, Error)]
pub enum TrackError {
    /// The remote side stopped sending; no more frames will arrive
    #[error("track ended")]
    Ended,
}

/// Errors opening, writing or finalizing a recording file.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode {}: {message}", .path.display())]
    Encode { path: PathBuf, message: String },

    #[error("unsupported codec for {role}: {codec}")]
    UnsupportedCodec { role: String, codec: String },

    #[error("failed to start ffmpeg: {0}")]
    Spawn(String),

    #[error("ffmpeg exited with {status}: {stderr}")]
    Ffmpeg { status: String, stderr: String },

    #[error("recorder task failed: {0}")]
    Task(String),
}

/// Errors delivering a frame to a control channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("control channel is closed")]
    Closed,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}
