//! # Control Protocol
//!
//! JSON messages exchanged over the signaling WebSocket. Every message is an
//! object with a kebab-case `type` tag.
//!
//! ## Client → Server:
//! - `join-interviewer`, `join-candidate`
//! - `offer {sdp, sdpType}`
//! - `ice-candidate {candidate: {candidate, sdpMid, sdpMLineIndex}}`
//! - `start-recording`, `stop-recording`
//!
//! ## Server → Client:
//! - `state-update {state}`, `joined {role}`, `answer {sdp, sdpType}`
//! - `error {message}`, `stopped`

use crate::peer::{IceCandidate, Role};
use crate::room::RoomState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    JoinInterviewer,
    JoinCandidate,
    Offer {
        sdp: String,
        #[serde(rename = "sdpType", default = "default_offer_type")]
        sdp_type: String,
    },
    IceCandidate {
        /// Kept raw so a malformed candidate never fails the whole frame.
        #[serde(default)]
        candidate: Option<serde_json::Value>,
    },
    StartRecording,
    StopRecording,
}

fn default_offer_type() -> String {
    "offer".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    StateUpdate {
        state: RoomState,
    },
    Joined {
        role: Role,
    },
    Answer {
        sdp: String,
        #[serde(rename = "sdpType")]
        sdp_type: String,
    },
    Error {
        message: String,
    },
    Stopped,
}

impl ServerMessage {
    pub fn error(message: impl ToString) -> Self {
        ServerMessage::Error {
            message: message.to_string(),
        }
    }
}

/// Interpret the payload of an `ice-candidate` message.
///
/// - `Ok(None)`: no candidate, or the empty end-of-candidates marker
/// - `Err(reason)`: present but not a usable candidate
pub fn parse_ice_candidate(
    value: Option<serde_json::Value>,
) -> Result<Option<IceCandidate>, String> {
    let value = match value {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(value) => value,
    };

    let candidate: IceCandidate = serde_json::from_value(value).map_err(|e| e.to_string())?;
    if candidate.candidate.trim().is_empty() {
        return Ok(None);
    }
    if !candidate.candidate.starts_with("candidate:") {
        return Err(format!("unexpected candidate line '{}'", candidate.candidate));
    }

    Ok(Some(candidate))
}
