//! # Peer Session
//!
//! Per-role wrapper around one media connection.
//!
//! ## Event Flow:
//! The connection publishes [`PeerEvent`]s on an unbounded channel. A small
//! pump task drains it and applies each event to the session:
//! - `Track` attaches the track (last write wins per kind) and starts
//!   draining it, so nothing queues up in the transport before recording
//! - `Failed` triggers the failure hook
//!
//! The pump only holds a `Weak` reference, so dropping the last `Arc` of the
//! session lets the connection and the pump shut down.
//!
//! ## Failure Hook:
//! Fires exactly once per session. If the connection failed before the hook
//! was registered, registration fires it immediately.

use crate::error::PeerError;
use crate::media::{LiveTrack, MediaTrack, TrackKind};
use crate::peer::connection::{
    ConnectionFactory, IceCandidate, MediaConnection, PeerEvent, SessionDescription,
};
use crate::peer::Role;
use crate::signaling::channel::ClientChannel;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type FailureHook = Box<dyn FnOnce(String) + Send>;

#[derive(Default)]
struct AttachedTracks {
    audio: Option<Arc<LiveTrack>>,
    video: Option<Arc<LiveTrack>>,
}

#[derive(Default)]
struct FailureState {
    reason: Option<String>,
    hook: Option<FailureHook>,
    fired: bool,
}

pub struct PeerSession {
    role: Role,
    id: Uuid,
    channel: Arc<dyn ClientChannel>,
    connection: Arc<dyn MediaConnection>,
    tracks: Mutex<AttachedTracks>,
    failure: Mutex<FailureState>,
    closed: AtomicBool,
}

impl PeerSession {
    /// Create the media connection for `role` and start pumping its events.
    pub async fn connect(
        role: Role,
        channel: Arc<dyn ClientChannel>,
        factory: &dyn ConnectionFactory,
    ) -> Result<Arc<Self>, PeerError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connection = factory.create(role, events_tx).await?;

        let session = Arc::new(Self {
            role,
            id: Uuid::new_v4(),
            channel,
            connection,
            tracks: Mutex::new(AttachedTracks::default()),
            failure: Mutex::new(FailureState::default()),
            closed: AtomicBool::new(false),
        });

        tokio::spawn(pump_events(Arc::downgrade(&session), events_rx));
        info!(role = %role, session = %session.id, "Peer session created");

        Ok(session)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn channel(&self) -> &Arc<dyn ClientChannel> {
        &self.channel
    }

    /// Attach an inbound track. A later track of the same kind replaces the earlier one.
    pub fn attach_track(&self, track: Arc<dyn MediaTrack>) {
        let kind = track.kind();
        info!(role = %self.role, session = %self.id, kind = %kind, track = track.id(), "Track attached");

        let live = LiveTrack::spawn(track);
        let mut tracks = self.tracks.lock();
        match kind {
            TrackKind::Audio => tracks.audio = Some(live),
            TrackKind::Video => tracks.video = Some(live),
        }
    }

    pub fn track(&self, kind: TrackKind) -> Option<Arc<LiveTrack>> {
        let tracks = self.tracks.lock();
        match kind {
            TrackKind::Audio => tracks.audio.clone(),
            TrackKind::Video => tracks.video.clone(),
        }
    }

    pub async fn negotiate(&self, offer: SessionDescription) -> Result<SessionDescription, PeerError> {
        if self.is_closed() {
            return Err(PeerError::Closed);
        }
        self.connection.negotiate(offer).await
    }

    pub async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        if self.is_closed() {
            return Err(PeerError::Closed);
        }
        self.connection.add_ice_candidate(candidate).await
    }

    /// Register the failure callback. Fires at most once over the session's lifetime.
    pub fn on_failure(&self, hook: impl FnOnce(String) + Send + 'static) {
        let mut state = self.failure.lock();
        if state.fired {
            return;
        }

        match state.reason.clone() {
            Some(reason) => {
                state.fired = true;
                drop(state);
                hook(reason);
            }
            None => state.hook = Some(Box::new(hook)),
        }
    }

    pub(crate) fn report_failure(&self, reason: String) {
        let mut state = self.failure.lock();
        if state.reason.is_some() || state.fired {
            return;
        }

        warn!(role = %self.role, session = %self.id, reason = %reason, "Peer connection failed");
        state.reason = Some(reason.clone());

        if let Some(hook) = state.hook.take() {
            state.fired = true;
            drop(state);
            hook(reason);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the media connection. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(role = %self.role, session = %self.id, "Closing peer session");
        self.connection.close().await;
    }
}

async fn pump_events(session: Weak<PeerSession>, mut events: mpsc::UnboundedReceiver<PeerEvent>) {
    while let Some(event) = events.recv().await {
        let Some(session) = session.upgrade() else {
            break;
        };
        match event {
            PeerEvent::Track(track) => session.attach_track(track),
            PeerEvent::Failed(reason) => session.report_failure(reason),
        }
    }
}
