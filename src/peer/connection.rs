//! Transport-neutral media connection types.

use crate::error::PeerError;
use crate::media::MediaTrack;
use crate::peer::Role;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// An SDP blob plus its type (`offer`, `answer`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "sdpType")]
    pub sdp_type: String,
}

/// A trickled ICE candidate, in the browser's `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

/// Things a media connection reports asynchronously.
pub enum PeerEvent {
    /// The remote party started sending a track
    Track(Arc<dyn MediaTrack>),

    /// The connection failed and will not recover
    Failed(String),
}

#[async_trait]
pub trait MediaConnection: Send + Sync {
    /// Apply the remote offer and return the local answer once ICE gathering is done.
    async fn negotiate(&self, offer: SessionDescription) -> Result<SessionDescription, PeerError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;

    async fn close(&self);
}

/// Creates media connections that publish their events on `events`.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create(
        &self,
        role: Role,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn MediaConnection>, PeerError>;
}
