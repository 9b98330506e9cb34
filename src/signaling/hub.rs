//! # Signaling Hub
//!
//! Routes control messages from each client to the room it joined.
//!
//! ## Structure:
//! - [`SignalingHub`] is shared by every connection. It owns the room table,
//!   the media connection factory and the recording coordinator.
//! - [`ClientConnection`] is the per-socket state: which room the socket
//!   addresses and which peer session (if any) it is bound to. Its methods
//!   are called one message at a time, in arrival order, by the socket worker.
//!
//! ## Locking:
//! Every room transition locks the room's mutex for the whole
//! check-then-mutate, including awaited recorder start/stop. Offer/answer
//! negotiation runs outside the lock, under a deadline, so one party's stuck
//! negotiation never blocks the other.
//!
//! ## Cleanup:
//! Disconnects, connection failures and negotiation timeouts all end up in
//! [`SignalingHub::release_role`]. It is keyed by peer session id, so a late
//! event for a session that has already been replaced is ignored.

use crate::error::SignalingError;
use crate::peer::{ConnectionFactory, PeerSession, Role, SessionDescription};
use crate::recording::{RecordingCoordinator, StopReport};
use crate::room::registry::SharedRoom;
use crate::room::{Room, RoomRegistry, RoomState};
use crate::signaling::channel::{broadcast, ClientChannel};
use crate::signaling::metrics::SignalingMetrics;
use crate::signaling::protocol::{parse_ice_candidate, ClientMessage, ServerMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What the socket should do after a message has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

pub struct SignalingHub {
    rooms: Arc<RoomRegistry>,
    connections: Arc<dyn ConnectionFactory>,
    recordings: Arc<RecordingCoordinator>,
    metrics: Arc<SignalingMetrics>,
    negotiation_timeout: Duration,
}

impl SignalingHub {
    pub fn new(
        rooms: Arc<RoomRegistry>,
        connections: Arc<dyn ConnectionFactory>,
        recordings: Arc<RecordingCoordinator>,
        metrics: Arc<SignalingMetrics>,
        negotiation_timeout: Duration,
    ) -> Self {
        Self {
            rooms,
            connections,
            recordings,
            metrics,
            negotiation_timeout,
        }
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
    }

    pub fn metrics(&self) -> &Arc<SignalingMetrics> {
        &self.metrics
    }

    /// Bind a new control connection to `room_id`, creating the room if needed.
    pub fn connect(self: &Arc<Self>, room_id: &str, channel: Arc<dyn ClientChannel>) -> ClientConnection {
        self.metrics.connection_opened();
        ClientConnection {
            hub: Arc::clone(self),
            room_id: room_id.to_string(),
            room: self.rooms.get_or_create(room_id),
            channel,
            binding: None,
        }
    }

    /// Role-specific cleanup after a disconnect, failure or timeout.
    ///
    /// - Interviewer: finalize any recording, close both connections, reset to `IDLE`
    /// - Candidate: finalize any recording, release the candidate only,
    ///   fall back to `INTERVIEWER_CONNECTED`
    pub async fn release_role(&self, room_id: &str, room: &SharedRoom, role: Role, session: Uuid) {
        let mut room = room.lock().await;
        if !room.is_current(role, session) {
            debug!(room = room_id, role = %role, session = %session, "Ignoring release of stale session");
            return;
        }

        match role {
            Role::Interviewer => {
                self.finalize_recording(room_id, &mut room).await;
                let channels = room.channels();
                let peers = room.reset();
                for peer in &peers {
                    peer.close().await;
                }
                broadcast(&channels, &state_update(room.state()));
                for channel in &channels {
                    channel.close();
                }
                info!(room = room_id, session = %session, "Interviewer left, room reset");
            }
            Role::Candidate => {
                if !matches!(room.state(), RoomState::BothConnected | RoomState::Recording) {
                    return;
                }
                self.finalize_recording(room_id, &mut room).await;
                if let Some(peer) = room.release_candidate() {
                    peer.close().await;
                    peer.channel().close();
                }
                broadcast(&room.channels(), &state_update(room.state()));
                info!(room = room_id, session = %session, "Candidate left");
            }
        }
    }

    /// Stop the room's recording, if any, and record the outcome.
    async fn finalize_recording(&self, room_id: &str, room: &mut Room) -> Option<StopReport> {
        let recording = room.take_recording()?;
        let report = self.recordings.stop(recording).await;
        self.record_stop(room_id, &report);
        Some(report)
    }

    fn record_stop(&self, room_id: &str, report: &StopReport) {
        SignalingMetrics::incr(&self.metrics.recordings_completed);
        SignalingMetrics::add(&self.metrics.recorder_failures, report.failures.len() as u64);
        for file in &report.finalized {
            info!(room = room_id, session = %report.session_id, role = %file.role, path = %file.path.display(), frames = file.frames, "Recording file finalized");
        }
    }

    /// Finalize every active recording and close every connection.
    pub async fn shutdown(&self) {
        for room in self.rooms.all() {
            let mut room = room.lock().await;
            let room_id = room.id().to_string();
            if let Some(report) = self.finalize_recording(&room_id, &mut room).await {
                info!(room = %room_id, session = %report.session_id, files = report.finalized.len(), "Recording finalized on shutdown");
            }
            let channels = room.channels();
            for peer in room.reset() {
                peer.close().await;
            }
            for channel in &channels {
                channel.close();
            }
        }
    }
}

fn state_update(state: RoomState) -> ServerMessage {
    ServerMessage::StateUpdate { state }
}

/// One control connection.
pub struct ClientConnection {
    hub: Arc<SignalingHub>,
    room_id: String,
    room: SharedRoom,
    channel: Arc<dyn ClientChannel>,
    binding: Option<(Role, Uuid)>,
}

impl ClientConnection {
    pub fn role(&self) -> Option<Role> {
        self.binding.map(|(role, _)| role)
    }

    /// Decode and handle one text frame.
    pub async fn handle_text(&mut self, text: &str) -> Flow {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle_message(message).await,
            Err(err) => {
                SignalingMetrics::incr(&self.hub.metrics.malformed_messages);
                warn!(room = %self.room_id, connection = %self.channel.id(), error = %err, "Undecodable control message");
                self.send(ServerMessage::error(SignalingError::MalformedMessage(err.to_string())));
                Flow::Continue
            }
        }
    }

    pub async fn handle_message(&mut self, message: ClientMessage) -> Flow {
        let result = match message {
            ClientMessage::JoinInterviewer => self.join(Role::Interviewer).await,
            ClientMessage::JoinCandidate => self.join(Role::Candidate).await,
            ClientMessage::Offer { sdp, sdp_type } => {
                self.offer(SessionDescription { sdp, sdp_type }).await
            }
            ClientMessage::IceCandidate { candidate } => {
                self.ice_candidate(candidate).await;
                Ok(Flow::Continue)
            }
            ClientMessage::StartRecording => self.start_recording().await,
            ClientMessage::StopRecording => self.stop_recording().await,
        };

        match result {
            Ok(flow) => flow,
            Err(err) => {
                if matches!(err, SignalingError::ProtocolViolation(_)) {
                    SignalingMetrics::incr(&self.hub.metrics.protocol_violations);
                }
                warn!(room = %self.room_id, connection = %self.channel.id(), role = ?self.role(), error = %err, "Request rejected");
                self.send(ServerMessage::error(&err));
                Flow::Continue
            }
        }
    }

    /// The socket went away. Runs the cleanup for whatever role it held.
    pub async fn disconnected(&mut self) {
        self.hub.metrics.connection_closed();
        if let Some((role, session)) = self.binding.take() {
            debug!(room = %self.room_id, role = %role, session = %session, "Control connection closed");
            self.hub.release_role(&self.room_id, &self.room, role, session).await;
        }
    }

    fn send(&self, message: ServerMessage) {
        if let Err(err) = self.channel.send(&message) {
            debug!(connection = %self.channel.id(), error = %err, "Reply not delivered");
        }
    }

    async fn join(&mut self, role: Role) -> Result<Flow, SignalingError> {
        if let Some((bound, _)) = self.binding {
            return Err(SignalingError::violation(format!("Already joined as {}", bound)));
        }

        let mut room = self.room.lock().await;
        if let Err(err) = room.ensure_can_join(role) {
            SignalingMetrics::incr(&self.hub.metrics.joins_rejected);
            warn!(room = %self.room_id, role = %role, state = %room.state(), reason = %err, "Join rejected");
            self.send(ServerMessage::error(&err));
            self.channel.close();
            return Ok(Flow::Close);
        }

        let peer = PeerSession::connect(role, self.channel.clone(), self.hub.connections.as_ref())
            .await
            .map_err(|err| {
                SignalingMetrics::incr(&self.hub.metrics.negotiation_failures);
                SignalingError::NegotiationFailure(err.to_string())
            })?;

        let hub = Arc::downgrade(&self.hub);
        let shared_room = self.room.clone();
        let room_id = self.room_id.clone();
        let session = peer.id();
        peer.on_failure(move |reason| {
            let Some(hub) = hub.upgrade() else {
                return;
            };
            SignalingMetrics::incr(&hub.metrics.peer_failures);
            warn!(room = %room_id, role = %role, session = %session, reason = %reason, "Releasing role after connection failure");
            tokio::spawn(async move {
                hub.release_role(&room_id, &shared_room, role, session).await;
            });
        });

        room.attach(peer);
        self.binding = Some((role, session));
        SignalingMetrics::incr(&self.hub.metrics.joins);
        info!(room = %self.room_id, role = %role, session = %session, "Joined");

        broadcast(&room.channels(), &state_update(room.state()));
        self.send(ServerMessage::Joined { role });

        Ok(Flow::Continue)
    }

    /// The peer session this connection is bound to, if it is still current.
    async fn current_peer(&mut self) -> Result<Arc<PeerSession>, SignalingError> {
        let (role, session) = self
            .binding
            .ok_or_else(|| SignalingError::violation("Not joined"))?;

        let current = self
            .room
            .lock()
            .await
            .peer(role)
            .filter(|peer| peer.id() == session)
            .cloned();

        current.ok_or_else(|| {
            self.binding = None;
            SignalingError::violation("Session is no longer active")
        })
    }

    async fn offer(&mut self, offer: SessionDescription) -> Result<Flow, SignalingError> {
        let peer = self.current_peer().await?;
        let (role, session) = (peer.role(), peer.id());

        match timeout(self.hub.negotiation_timeout, peer.negotiate(offer)).await {
            Ok(Ok(answer)) => {
                debug!(room = %self.room_id, role = %role, "Sending answer");
                self.send(ServerMessage::Answer {
                    sdp: answer.sdp,
                    sdp_type: answer.sdp_type,
                });
                Ok(Flow::Continue)
            }
            Ok(Err(err)) => {
                SignalingMetrics::incr(&self.hub.metrics.negotiation_failures);
                Err(SignalingError::NegotiationFailure(err.to_string()))
            }
            Err(_) => {
                SignalingMetrics::incr(&self.hub.metrics.negotiation_timeouts);
                error!(room = %self.room_id, role = %role, session = %session, timeout = ?self.hub.negotiation_timeout, "Negotiation timed out");
                self.send(ServerMessage::error(SignalingError::NegotiationFailure(
                    "timed out".to_string(),
                )));
                self.binding = None;
                self.hub.release_role(&self.room_id, &self.room, role, session).await;
                self.channel.close();
                Ok(Flow::Close)
            }
        }
    }

    /// Best effort: problems are logged and counted, never reported to the client.
    async fn ice_candidate(&mut self, raw: Option<serde_json::Value>) {
        let candidate = match parse_ice_candidate(raw) {
            Ok(Some(candidate)) => candidate,
            Ok(None) => return,
            Err(reason) => {
                SignalingMetrics::incr(&self.hub.metrics.malformed_messages);
                warn!(room = %self.room_id, role = ?self.role(), reason = %reason, "Dropping malformed ICE candidate");
                return;
            }
        };

        let peer = match self.current_peer().await {
            Ok(peer) => peer,
            Err(err) => {
                debug!(room = %self.room_id, reason = %err, "Dropping ICE candidate for unbound connection");
                return;
            }
        };

        if let Err(err) = peer.add_ice_candidate(candidate).await {
            SignalingMetrics::incr(&self.hub.metrics.ice_failures);
            warn!(room = %self.room_id, role = %peer.role(), error = %err, "Failed to add ICE candidate");
        }
    }

    fn bound_role(&self) -> Result<(Role, Uuid), SignalingError> {
        self.binding.ok_or_else(|| SignalingError::violation("Not joined"))
    }

    async fn start_recording(&mut self) -> Result<Flow, SignalingError> {
        let (role, session) = self.bound_role()?;
        let mut room = self.room.lock().await;
        if !room.is_current(role, session) {
            return Err(SignalingError::violation("Session is no longer active"));
        }
        room.ensure_can_start(role)?;

        let recordings = &self.hub.recordings;
        let started = match recordings.next_naming() {
            Ok(naming) => recordings.start(naming, room.session_tracks()).await,
            Err(err) => Err(err),
        };

        let recording = started.map_err(|err| {
            SignalingMetrics::incr(&self.hub.metrics.recorder_failures);
            error!(room = %self.room_id, error = %err, "Failed to start recording");
            SignalingError::RecorderFailure(err.to_string())
        })?;

        info!(room = %self.room_id, session = recording.session_id(), roles = ?recording.roles(), "Recording");
        room.begin_recording(recording);
        SignalingMetrics::incr(&self.hub.metrics.recordings_started);
        broadcast(&room.channels(), &state_update(room.state()));

        Ok(Flow::Continue)
    }

    async fn stop_recording(&mut self) -> Result<Flow, SignalingError> {
        let (role, session) = self.bound_role()?;
        let mut room = self.room.lock().await;
        if !room.is_current(role, session) {
            return Err(SignalingError::violation("Session is no longer active"));
        }
        room.ensure_can_stop(role)?;

        let channels = room.channels();
        let report = self.hub.finalize_recording(&self.room_id, &mut room).await;

        broadcast(&channels, &ServerMessage::Stopped);
        if let Some(report) = report.filter(|report| !report.is_complete()) {
            let details: Vec<String> = report
                .failures
                .iter()
                .map(|failure| format!("{}: {}", failure.role, failure.error))
                .collect();
            self.send(ServerMessage::error(SignalingError::RecorderFailure(details.join("; "))));
        }

        for peer in room.reset() {
            peer.close().await;
        }
        broadcast(&channels, &state_update(room.state()));
        for channel in &channels {
            channel.close();
        }

        self.binding = None;
        info!(room = %self.room_id, "Recording stopped, room reset");
        Ok(Flow::Close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::media::{MediaCodec, MediaFrame};
    use crate::recording::RecordingRole;
    use crate::room::DEFAULT_ROOM;
    use crate::testing::{
        wait_until, MemorySinkFactory, MockChannel, MockConnectionFactory, MockTrack,
    };
    use serde_json::json;

    struct Harness {
        hub: Arc<SignalingHub>,
        factory: Arc<MockConnectionFactory>,
        sinks: Arc<MemorySinkFactory>,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut config = AppConfig::default().recording;
            config.output_dir = dir.path().to_path_buf();

            let factory = Arc::new(MockConnectionFactory::default());
            let sinks = Arc::new(MemorySinkFactory::default());
            let hub = Arc::new(SignalingHub::new(
                Arc::new(RoomRegistry::new()),
                factory.clone(),
                Arc::new(RecordingCoordinator::new(config, sinks.clone())),
                Arc::new(SignalingMetrics::default()),
                Duration::from_millis(200),
            ));

            Self {
                hub,
                factory,
                sinks,
                _dir: dir,
            }
        }

        fn client(&self) -> (ClientConnection, Arc<MockChannel>) {
            let channel = MockChannel::new();
            (self.hub.connect(DEFAULT_ROOM, channel.clone()), channel)
        }

        async fn state(&self) -> RoomState {
            self.hub.rooms.get(DEFAULT_ROOM).unwrap().lock().await.state()
        }
    }

    async fn send(client: &mut ClientConnection, message: serde_json::Value) -> Flow {
        client.handle_text(&message.to_string()).await
    }

    #[tokio::test]
    async fn test_candidate_before_interviewer_is_rejected_and_closed() {
        let harness = Harness::new();
        let (mut candidate, channel) = harness.client();

        let flow = send(&mut candidate, json!({"type": "join-candidate"})).await;

        assert_eq!(flow, Flow::Close);
        assert_eq!(channel.errors(), vec!["Interviewer not connected".to_string()]);
        assert!(channel.is_closed());
        assert_eq!(harness.state().await, RoomState::Idle);
    }

    #[tokio::test]
    async fn test_second_interviewer_leaves_first_untouched() {
        let harness = Harness::new();
        let (mut first, first_channel) = harness.client();
        let (mut second, second_channel) = harness.client();

        send(&mut first, json!({"type": "join-interviewer"})).await;
        let flow = send(&mut second, json!({"type": "join-interviewer"})).await;

        assert_eq!(flow, Flow::Close);
        assert_eq!(second_channel.errors(), vec!["Room occupied".to_string()]);
        assert!(!first_channel.is_closed());
        assert_eq!(first.role(), Some(Role::Interviewer));
        assert_eq!(harness.state().await, RoomState::InterviewerConnected);

        second.disconnected().await;
        assert_eq!(harness.state().await, RoomState::InterviewerConnected);
    }

    #[tokio::test]
    async fn test_join_broadcasts_state_then_replies_joined() {
        let harness = Harness::new();
        let (mut interviewer, interviewer_channel) = harness.client();
        let (mut candidate, candidate_channel) = harness.client();

        send(&mut interviewer, json!({"type": "join-interviewer"})).await;
        send(&mut candidate, json!({"type": "join-candidate"})).await;

        assert_eq!(
            interviewer_channel.messages(),
            vec![
                ServerMessage::StateUpdate { state: RoomState::InterviewerConnected },
                ServerMessage::Joined { role: Role::Interviewer },
                ServerMessage::StateUpdate { state: RoomState::BothConnected },
            ]
        );
        assert_eq!(
            candidate_channel.messages(),
            vec![
                ServerMessage::StateUpdate { state: RoomState::BothConnected },
                ServerMessage::Joined { role: Role::Candidate },
            ]
        );
    }

    #[tokio::test]
    async fn test_offer_is_answered() {
        let harness = Harness::new();
        let (mut interviewer, channel) = harness.client();
        send(&mut interviewer, json!({"type": "join-interviewer"})).await;

        send(&mut interviewer, json!({"type": "offer", "sdp": "v=0", "sdpType": "offer"})).await;

        assert_eq!(
            channel.messages().last(),
            Some(&ServerMessage::Answer {
                sdp: "answer:v=0".to_string(),
                sdp_type: "answer".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_offer_before_join_is_a_protocol_violation() {
        let harness = Harness::new();
        let (mut client, channel) = harness.client();

        let flow = send(&mut client, json!({"type": "offer", "sdp": "v=0", "sdpType": "offer"})).await;

        assert_eq!(flow, Flow::Continue);
        assert_eq!(channel.errors(), vec!["Not joined".to_string()]);
        assert_eq!(harness.hub.metrics.snapshot().protocol_violations, 1);
    }

    #[tokio::test]
    async fn test_malformed_ice_candidate_is_dropped_silently() {
        let harness = Harness::new();
        let (mut interviewer, channel) = harness.client();
        send(&mut interviewer, json!({"type": "join-interviewer"})).await;
        let before = channel.messages().len();

        send(&mut interviewer, json!({"type": "ice-candidate", "candidate": {"candidate": "bogus"}})).await;
        send(&mut interviewer, json!({"type": "ice-candidate", "candidate": 42})).await;
        send(
            &mut interviewer,
            json!({"type": "ice-candidate", "candidate": {"candidate": "candidate:1 1 udp 1 10.0.0.1 9 typ host", "sdpMid": "0", "sdpMLineIndex": 0}}),
        )
        .await;

        assert_eq!(channel.messages().len(), before);
        assert_eq!(harness.hub.metrics.snapshot().malformed_messages, 2);
        assert_eq!(harness.factory.candidates(Role::Interviewer).len(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_frame_gets_error_reply() {
        let harness = Harness::new();
        let (mut client, channel) = harness.client();

        let flow = client.handle_text("{not json").await;

        assert_eq!(flow, Flow::Continue);
        assert_eq!(channel.errors().len(), 1);
        assert!(channel.errors()[0].starts_with("Invalid message"));
    }

    #[tokio::test]
    async fn test_only_interviewer_controls_recording() {
        let harness = Harness::new();
        let (mut interviewer, interviewer_channel) = harness.client();
        let (mut candidate, candidate_channel) = harness.client();

        send(&mut interviewer, json!({"type": "join-interviewer"})).await;
        send(&mut interviewer, json!({"type": "start-recording"})).await;
        assert_eq!(
            interviewer_channel.errors(),
            vec!["Recording requires both parties connected".to_string()]
        );

        send(&mut candidate, json!({"type": "join-candidate"})).await;
        send(&mut candidate, json!({"type": "start-recording"})).await;
        assert_eq!(
            candidate_channel.errors(),
            vec!["Only the interviewer can start recording".to_string()]
        );
        assert_eq!(harness.state().await, RoomState::BothConnected);
    }

    #[tokio::test]
    async fn test_end_to_end_candidate_video_only() {
        let harness = Harness::new();
        let (mut interviewer, interviewer_channel) = harness.client();
        let (mut candidate, candidate_channel) = harness.client();

        send(&mut interviewer, json!({"type": "join-interviewer"})).await;
        send(&mut candidate, json!({"type": "join-candidate"})).await;

        harness
            .factory
            .send_track(Role::Interviewer, MockTrack::audio("interviewer-mic", Vec::new()));
        harness.factory.send_track(
            Role::Candidate,
            MockTrack::video("candidate-cam", MediaCodec::Vp8, Vec::new()),
        );
        let room = harness.hub.rooms.get(DEFAULT_ROOM).unwrap();
        wait_until(|| {
            room.try_lock()
                .map(|room| {
                    let tracks = room.session_tracks();
                    tracks.interviewer_audio.is_some() && tracks.candidate_video.is_some()
                })
                .unwrap_or(false)
        })
        .await;

        send(&mut interviewer, json!({"type": "start-recording"})).await;
        assert_eq!(harness.state().await, RoomState::Recording);
        assert_eq!(
            harness.sinks.opened_roles(),
            vec![RecordingRole::Interviewer, RecordingRole::CandidateVideo]
        );

        let flow = send(&mut interviewer, json!({"type": "stop-recording"})).await;
        assert_eq!(flow, Flow::Close);
        assert_eq!(harness.state().await, RoomState::Idle);
        assert!(harness.sinks.is_finalized(RecordingRole::Interviewer));
        assert!(harness.sinks.is_finalized(RecordingRole::CandidateVideo));
        assert_eq!(harness.hub.metrics.snapshot().recordings_completed, 1);

        for channel in [&interviewer_channel, &candidate_channel] {
            let messages = channel.messages();
            assert!(messages.contains(&ServerMessage::StateUpdate { state: RoomState::Recording }));
            assert!(messages.contains(&ServerMessage::Stopped));
            assert_eq!(
                messages.last(),
                Some(&ServerMessage::StateUpdate { state: RoomState::Idle })
            );
            assert!(channel.is_closed());
        }

        // The candidate's socket closing afterwards must not disturb the fresh room.
        candidate.disconnected().await;
        assert_eq!(harness.state().await, RoomState::Idle);
    }

    #[tokio::test]
    async fn test_recorder_start_failure_leaves_state_unchanged() {
        let harness = Harness::new();
        harness.sinks.fail_open(RecordingRole::CandidateAudio);
        let (mut interviewer, interviewer_channel) = harness.client();
        let (mut candidate, _) = harness.client();

        send(&mut interviewer, json!({"type": "join-interviewer"})).await;
        send(&mut candidate, json!({"type": "join-candidate"})).await;
        harness
            .factory
            .send_track(Role::Candidate, MockTrack::audio("candidate-mic", Vec::new()));
        let room = harness.hub.rooms.get(DEFAULT_ROOM).unwrap();
        wait_until(|| {
            room.try_lock()
                .map(|room| room.session_tracks().candidate_audio.is_some())
                .unwrap_or(false)
        })
        .await;

        send(&mut interviewer, json!({"type": "start-recording"})).await;

        assert_eq!(harness.state().await, RoomState::BothConnected);
        let errors = interviewer_channel.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Recording failed"));
        assert_eq!(harness.hub.metrics.snapshot().recorder_failures, 1);
    }

    #[tokio::test]
    async fn test_candidate_disconnect_during_recording() {
        let harness = Harness::new();
        let (mut interviewer, interviewer_channel) = harness.client();
        let (mut candidate, _) = harness.client();

        send(&mut interviewer, json!({"type": "join-interviewer"})).await;
        send(&mut candidate, json!({"type": "join-candidate"})).await;
        harness
            .factory
            .send_track(Role::Interviewer, MockTrack::audio("interviewer-mic", Vec::new()));
        let room = harness.hub.rooms.get(DEFAULT_ROOM).unwrap();
        wait_until(|| {
            room.try_lock()
                .map(|room| room.session_tracks().interviewer_audio.is_some())
                .unwrap_or(false)
        })
        .await;
        send(&mut interviewer, json!({"type": "start-recording"})).await;
        assert_eq!(harness.state().await, RoomState::Recording);

        candidate.disconnected().await;

        assert_eq!(harness.state().await, RoomState::InterviewerConnected);
        assert!(harness.sinks.is_finalized(RecordingRole::Interviewer));
        assert_eq!(interviewer_channel.last_state(), Some(RoomState::InterviewerConnected));

        let (mut replacement, replacement_channel) = harness.client();
        send(&mut replacement, json!({"type": "join-candidate"})).await;
        assert_eq!(harness.state().await, RoomState::BothConnected);
        assert!(replacement_channel.errors().is_empty());
    }

    #[tokio::test]
    async fn test_interviewer_disconnect_drops_candidate() {
        let harness = Harness::new();
        let (mut interviewer, _) = harness.client();
        let (mut candidate, candidate_channel) = harness.client();

        send(&mut interviewer, json!({"type": "join-interviewer"})).await;
        send(&mut candidate, json!({"type": "join-candidate"})).await;

        interviewer.disconnected().await;

        assert_eq!(harness.state().await, RoomState::Idle);
        assert!(candidate_channel.is_closed());
        assert_eq!(harness.factory.close_count(Role::Candidate), 1);
        assert_eq!(harness.factory.close_count(Role::Interviewer), 1);
    }

    #[tokio::test]
    async fn test_interviewer_disconnect_during_recording_finalizes_cohort() {
        let harness = Harness::new();
        let (mut interviewer, _) = harness.client();
        let (mut candidate, candidate_channel) = harness.client();

        send(&mut interviewer, json!({"type": "join-interviewer"})).await;
        send(&mut candidate, json!({"type": "join-candidate"})).await;

        let interviewer_mic = MockTrack::audio("interviewer-mic", Vec::new());
        let candidate_mic = MockTrack::audio("candidate-mic", Vec::new());
        let candidate_cam = MockTrack::video("candidate-cam", MediaCodec::Vp8, Vec::new());
        harness.factory.send_track(Role::Interviewer, interviewer_mic.clone());
        harness.factory.send_track(Role::Candidate, candidate_mic.clone());
        harness.factory.send_track(Role::Candidate, candidate_cam.clone());
        let room = harness.hub.rooms.get(DEFAULT_ROOM).unwrap();
        wait_until(|| {
            room.try_lock()
                .map(|room| {
                    let tracks = room.session_tracks();
                    tracks.interviewer_audio.is_some()
                        && tracks.candidate_audio.is_some()
                        && tracks.candidate_video.is_some()
                })
                .unwrap_or(false)
        })
        .await;

        send(&mut interviewer, json!({"type": "start-recording"})).await;
        assert_eq!(harness.state().await, RoomState::Recording);

        interviewer_mic.push(MediaFrame::new(vec![1u8]));
        candidate_cam.push(MediaFrame::new(vec![2u8]));
        harness.sinks.wait_for_frames(RecordingRole::Interviewer, 1).await;
        harness.sinks.wait_for_frames(RecordingRole::CandidateVideo, 1).await;

        interviewer.disconnected().await;

        assert_eq!(harness.state().await, RoomState::Idle);
        for role in [
            RecordingRole::Interviewer,
            RecordingRole::CandidateAudio,
            RecordingRole::CandidateVideo,
        ] {
            assert!(harness.sinks.is_finalized(role));
        }
        assert_eq!(harness.hub.metrics.snapshot().recordings_completed, 1);
        assert_eq!(harness.factory.close_count(Role::Interviewer), 1);
        assert_eq!(harness.factory.close_count(Role::Candidate), 1);
        assert_eq!(candidate_channel.last_state(), Some(RoomState::Idle));
        assert!(candidate_channel.is_closed());

        // The candidate's socket closing afterwards finds nothing left to release.
        candidate.disconnected().await;
        assert_eq!(harness.state().await, RoomState::Idle);
    }

    #[tokio::test]
    async fn test_candidate_connection_failure_releases_candidate() {
        let harness = Harness::new();
        let (mut interviewer, _) = harness.client();
        let (mut candidate, candidate_channel) = harness.client();

        send(&mut interviewer, json!({"type": "join-interviewer"})).await;
        send(&mut candidate, json!({"type": "join-candidate"})).await;

        harness.factory.fail(Role::Candidate, "ice failed");
        let room = harness.hub.rooms.get(DEFAULT_ROOM).unwrap();
        wait_until(|| {
            room.try_lock()
                .map(|room| room.state() == RoomState::InterviewerConnected)
                .unwrap_or(false)
        })
        .await;

        assert!(candidate_channel.is_closed());
        assert_eq!(harness.hub.metrics.snapshot().peer_failures, 1);

        // The failed candidate's socket closing later is a stale release.
        candidate.disconnected().await;
        assert_eq!(harness.state().await, RoomState::InterviewerConnected);
    }

    #[tokio::test]
    async fn test_negotiation_timeout_takes_failure_path() {
        let harness = Harness::new();
        let (mut interviewer, interviewer_channel) = harness.client();
        send(&mut interviewer, json!({"type": "join-interviewer"})).await;

        harness.factory.stall_negotiation();
        let flow = send(&mut interviewer, json!({"type": "offer", "sdp": "v=0", "sdpType": "offer"})).await;

        assert_eq!(flow, Flow::Close);
        assert_eq!(harness.state().await, RoomState::Idle);
        assert_eq!(interviewer_channel.errors(), vec!["Negotiation failed: timed out".to_string()]);
        assert_eq!(harness.hub.metrics.snapshot().negotiation_timeouts, 1);
    }

    #[tokio::test]
    async fn test_shutdown_finalizes_active_recording() {
        let harness = Harness::new();
        let (mut interviewer, _) = harness.client();
        let (mut candidate, _) = harness.client();

        send(&mut interviewer, json!({"type": "join-interviewer"})).await;
        send(&mut candidate, json!({"type": "join-candidate"})).await;
        harness
            .factory
            .send_track(Role::Interviewer, MockTrack::audio("interviewer-mic", Vec::new()));
        let room = harness.hub.rooms.get(DEFAULT_ROOM).unwrap();
        wait_until(|| {
            room.try_lock()
                .map(|room| room.session_tracks().interviewer_audio.is_some())
                .unwrap_or(false)
        })
        .await;
        send(&mut interviewer, json!({"type": "start-recording"})).await;

        harness.hub.shutdown().await;

        assert!(harness.sinks.is_finalized(RecordingRole::Interviewer));
        assert_eq!(harness.state().await, RoomState::Idle);
    }
}
