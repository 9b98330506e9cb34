//! # Peer Module
//!
//! One [`PeerSession`] per connected party. The session owns the party's
//! media connection and the tracks it has sent, and reports connection
//! failure to the hub exactly once.
//!
//! The media connection itself is behind the [`MediaConnection`] trait:
//! - **rtc**: the production implementation on top of webrtc-rs
//! - tests use an in-memory connection that can inject tracks and failures

pub mod connection;
pub mod session;
pub mod rtc;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use connection::{ConnectionFactory, IceCandidate, MediaConnection, PeerEvent, SessionDescription};
pub use session::PeerSession;

/// The two parties of an interview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Interviewer,
    Candidate,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Interviewer => f.write_str("interviewer"),
            Role::Candidate => f.write_str("candidate"),
        }
    }
}
