//! # Room State Machine
//!
//! A room coordinates the two peer sessions of one interview.
//!
//! ```text
//! IDLE ──join-interviewer──▶ INTERVIEWER_CONNECTED ──join-candidate──▶ BOTH_CONNECTED
//!  ▲                                 ▲                                     │
//!  │                                 └──── candidate leaves ───────────────┤ start-recording
//!  │                                 ▲                                     ▼
//!  └──── stop-recording / interviewer leaves ◀──────────────────────── RECORDING
//! ```
//!
//! The room itself is synchronous and knows nothing about sockets or
//! recorders. Callers hold the room's async mutex across a guard check and the
//! mutation it allows, which is what keeps check-then-mutate atomic.

pub mod registry;

use crate::error::SignalingError;
use crate::media::TrackKind;
use crate::peer::{PeerSession, Role};
use crate::recording::{ActiveRecording, SessionTracks};
use crate::signaling::channel::ClientChannel;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

pub use registry::{RoomRegistry, DEFAULT_ROOM};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomState {
    Idle,
    InterviewerConnected,
    BothConnected,
    Recording,
}

impl fmt::Display for RoomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoomState::Idle => "IDLE",
            RoomState::InterviewerConnected => "INTERVIEWER_CONNECTED",
            RoomState::BothConnected => "BOTH_CONNECTED",
            RoomState::Recording => "RECORDING",
        };
        f.write_str(name)
    }
}

/// Read-only view served by the status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    pub room: String,
    pub state: RoomState,
    pub interviewer_connected: bool,
    pub candidate_connected: bool,
    pub is_recording: bool,
    pub session_id: Option<String>,
    pub recording_started_at: Option<DateTime<Utc>>,
}

pub struct Room {
    id: String,
    state: RoomState,
    interviewer: Option<Arc<PeerSession>>,
    candidate: Option<Arc<PeerSession>>,
    recording: Option<ActiveRecording>,
}

impl Room {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: RoomState::Idle,
            interviewer: None,
            candidate: None,
            recording: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> RoomState {
        self.state
    }

    pub fn ensure_can_join(&self, role: Role) -> Result<(), SignalingError> {
        match role {
            Role::Interviewer if self.state != RoomState::Idle => {
                Err(SignalingError::ResourceConflict("Room occupied".to_string()))
            }
            Role::Candidate if self.state != RoomState::InterviewerConnected => {
                Err(SignalingError::violation("Interviewer not connected"))
            }
            _ => Ok(()),
        }
    }

    /// Attach a freshly joined peer. Call only after `ensure_can_join` succeeded.
    pub fn attach(&mut self, peer: Arc<PeerSession>) {
        match peer.role() {
            Role::Interviewer => {
                self.interviewer = Some(peer);
                self.state = RoomState::InterviewerConnected;
            }
            Role::Candidate => {
                self.candidate = Some(peer);
                self.state = RoomState::BothConnected;
            }
        }
    }

    pub fn peer(&self, role: Role) -> Option<&Arc<PeerSession>> {
        match role {
            Role::Interviewer => self.interviewer.as_ref(),
            Role::Candidate => self.candidate.as_ref(),
        }
    }

    /// Whether `session` is still the attached peer for `role`.
    pub fn is_current(&self, role: Role, session: Uuid) -> bool {
        self.peer(role).map_or(false, |peer| peer.id() == session)
    }

    pub fn ensure_can_start(&self, role: Role) -> Result<(), SignalingError> {
        if role != Role::Interviewer {
            return Err(SignalingError::violation("Only the interviewer can start recording"));
        }
        match self.state {
            RoomState::BothConnected => Ok(()),
            RoomState::Recording => Err(SignalingError::violation("Recording already in progress")),
            _ => Err(SignalingError::violation(
                "Recording requires both parties connected",
            )),
        }
    }

    pub fn ensure_can_stop(&self, role: Role) -> Result<(), SignalingError> {
        if role != Role::Interviewer {
            return Err(SignalingError::violation("Only the interviewer can stop recording"));
        }
        if self.state != RoomState::Recording {
            return Err(SignalingError::violation("No recording in progress"));
        }
        Ok(())
    }

    /// Tracks currently attached to the two peers.
    pub fn session_tracks(&self) -> SessionTracks {
        let track = |peer: &Option<Arc<PeerSession>>, kind| {
            peer.as_ref().and_then(|peer| peer.track(kind))
        };
        SessionTracks {
            interviewer_audio: track(&self.interviewer, TrackKind::Audio),
            candidate_audio: track(&self.candidate, TrackKind::Audio),
            candidate_video: track(&self.candidate, TrackKind::Video),
        }
    }

    pub fn begin_recording(&mut self, recording: ActiveRecording) {
        self.recording = Some(recording);
        self.state = RoomState::Recording;
    }

    /// Detach the running cohort so the caller can stop it.
    pub fn take_recording(&mut self) -> Option<ActiveRecording> {
        self.recording.take()
    }

    /// Full reset to `IDLE`. Returns the detached peers so the caller can close them.
    pub fn reset(&mut self) -> Vec<Arc<PeerSession>> {
        self.state = RoomState::Idle;
        self.recording = None;
        self.interviewer
            .take()
            .into_iter()
            .chain(self.candidate.take())
            .collect()
    }

    /// Detach the candidate and fall back to `INTERVIEWER_CONNECTED`.
    ///
    /// Only meaningful in `BOTH_CONNECTED` or `RECORDING`; in any other state
    /// nothing changes and `None` is returned.
    pub fn release_candidate(&mut self) -> Option<Arc<PeerSession>> {
        if !matches!(self.state, RoomState::BothConnected | RoomState::Recording) {
            return None;
        }
        self.state = RoomState::InterviewerConnected;
        self.candidate.take()
    }

    pub fn channels(&self) -> Vec<Arc<dyn ClientChannel>> {
        self.interviewer
            .iter()
            .chain(self.candidate.iter())
            .map(|peer| peer.channel().clone())
            .collect()
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room: self.id.clone(),
            state: self.state,
            interviewer_connected: self.interviewer.is_some(),
            candidate_connected: self.candidate.is_some(),
            is_recording: self.recording.is_some(),
            session_id: self.recording.as_ref().map(|r| r.session_id().to_string()),
            recording_started_at: self.recording.as_ref().map(|r| r.started_at()),
        }
    }
}
