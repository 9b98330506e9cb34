//! In-memory stand-ins for the network and file edges, shared by unit tests.

use crate::error::{ChannelError, PeerError, RecorderError, TrackError};
use crate::media::{ClockConfig, MediaCodec, MediaFrame, MediaTrack, TrackKind};
use crate::peer::{ConnectionFactory, IceCandidate, MediaConnection, PeerEvent, Role, SessionDescription};
use crate::recording::{MediaSink, RecordingRole, SinkFactory};
use crate::room::RoomState;
use crate::signaling::channel::ClientChannel;
use crate::signaling::protocol::ServerMessage;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

const WAIT_LIMIT: Duration = Duration::from_secs(2);

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT_LIMIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within {:?}", WAIT_LIMIT);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Records everything sent to it.
pub struct MockChannel {
    id: Uuid,
    messages: Mutex<Vec<ServerMessage>>,
    closed: AtomicBool,
}

impl MockChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            messages: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn messages(&self) -> Vec<ServerMessage> {
        self.messages.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn last_state(&self) -> Option<RoomState> {
        self.messages().into_iter().rev().find_map(|message| match message {
            ServerMessage::StateUpdate { state } => Some(state),
            _ => None,
        })
    }

    pub fn errors(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter_map(|message| match message {
                ServerMessage::Error { message } => Some(message),
                _ => None,
            })
            .collect()
    }
}

impl ClientChannel for MockChannel {
    fn id(&self) -> Uuid {
        self.id
    }

    fn send(&self, message: &ServerMessage) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        self.messages.lock().push(message.clone());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A track fed from the test. `recv` waits for the next pushed frame and
/// reports `Ended` once [`MockTrack::end`] has been called and the queue is empty.
pub struct MockTrack {
    id: String,
    codec: MediaCodec,
    tx: Mutex<Option<mpsc::UnboundedSender<MediaFrame>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MediaFrame>>,
}

impl MockTrack {
    fn new(id: &str, codec: MediaCodec, frames: Vec<MediaFrame>) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        for frame in frames {
            let _ = tx.send(frame);
        }
        Arc::new(Self {
            id: id.to_string(),
            codec,
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
        })
    }

    pub fn audio(id: &str, frames: Vec<MediaFrame>) -> Arc<Self> {
        Self::new(id, MediaCodec::Opus, frames)
    }

    pub fn video(id: &str, codec: MediaCodec, frames: Vec<MediaFrame>) -> Arc<Self> {
        Self::new(id, codec, frames)
    }

    pub fn push(&self, frame: MediaFrame) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(frame);
        }
    }

    pub fn end(&self) {
        self.tx.lock().take();
    }
}

#[async_trait]
impl MediaTrack for MockTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.codec.kind()
    }

    fn codec(&self) -> MediaCodec {
        self.codec
    }

    async fn recv(&self) -> Result<MediaFrame, TrackError> {
        self.rx.lock().await.recv().await.ok_or(TrackError::Ended)
    }
}

#[derive(Default)]
struct MockPeerState {
    events: Option<mpsc::UnboundedSender<PeerEvent>>,
    closes: usize,
    candidates: Vec<IceCandidate>,
}

#[derive(Default)]
struct MockConnectionShared {
    peers: Mutex<HashMap<Role, MockPeerState>>,
    stall: AtomicBool,
}

/// Connections that answer every offer with `answer:<offer sdp>`.
/// The offer sdp `bad` is rejected.
#[derive(Default)]
pub struct MockConnectionFactory {
    shared: Arc<MockConnectionShared>,
}

impl MockConnectionFactory {
    fn emit(&self, role: Role, event: PeerEvent) {
        let peers = self.shared.peers.lock();
        if let Some(events) = peers.get(&role).and_then(|peer| peer.events.as_ref()) {
            let _ = events.send(event);
        }
    }

    /// Deliver an inbound track to the latest connection for `role`.
    pub fn send_track(&self, role: Role, track: Arc<dyn MediaTrack>) {
        self.emit(role, PeerEvent::Track(track));
    }

    /// Report a connection failure on the latest connection for `role`.
    pub fn fail(&self, role: Role, reason: &str) {
        self.emit(role, PeerEvent::Failed(reason.to_string()));
    }

    pub fn close_count(&self, role: Role) -> usize {
        self.shared.peers.lock().get(&role).map_or(0, |peer| peer.closes)
    }

    pub fn candidates(&self, role: Role) -> Vec<IceCandidate> {
        self.shared
            .peers
            .lock()
            .get(&role)
            .map(|peer| peer.candidates.clone())
            .unwrap_or_default()
    }

    /// Make every later `negotiate` call hang forever.
    pub fn stall_negotiation(&self) {
        self.shared.stall.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn create(
        &self,
        role: Role,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn MediaConnection>, PeerError> {
        self.shared.peers.lock().entry(role).or_default().events = Some(events);
        Ok(Arc::new(MockConnection {
            role,
            shared: self.shared.clone(),
        }))
    }
}

struct MockConnection {
    role: Role,
    shared: Arc<MockConnectionShared>,
}

#[async_trait]
impl MediaConnection for MockConnection {
    async fn negotiate(&self, offer: SessionDescription) -> Result<SessionDescription, PeerError> {
        if self.shared.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if offer.sdp == "bad" {
            return Err(PeerError::InvalidDescription("unparseable offer".to_string()));
        }
        Ok(SessionDescription {
            sdp: format!("answer:{}", offer.sdp),
            sdp_type: "answer".to_string(),
        })
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.shared
            .peers
            .lock()
            .entry(self.role)
            .or_default()
            .candidates
            .push(candidate);
        Ok(())
    }

    async fn close(&self) {
        self.shared.peers.lock().entry(self.role).or_default().closes += 1;
    }
}

#[derive(Default)]
struct SinkRecord {
    pts: Vec<u64>,
    payloads: Vec<Vec<u8>>,
    finalized: bool,
}

#[derive(Default)]
struct MemorySinkShared {
    records: Mutex<HashMap<RecordingRole, SinkRecord>>,
    opened: Mutex<Vec<RecordingRole>>,
    fail_open: Mutex<HashSet<RecordingRole>>,
    fail_finalize: Mutex<HashSet<RecordingRole>>,
}

/// Sinks that keep the timestamps they were given, keyed by role.
#[derive(Default)]
pub struct MemorySinkFactory {
    shared: Arc<MemorySinkShared>,
}

impl MemorySinkFactory {
    pub fn fail_open(&self, role: RecordingRole) {
        self.shared.fail_open.lock().insert(role);
    }

    pub fn fail_finalize(&self, role: RecordingRole) {
        self.shared.fail_finalize.lock().insert(role);
    }

    pub fn pts(&self, role: RecordingRole) -> Vec<u64> {
        self.shared
            .records
            .lock()
            .get(&role)
            .map(|record| record.pts.clone())
            .unwrap_or_default()
    }

    pub fn payloads(&self, role: RecordingRole) -> Vec<Vec<u8>> {
        self.shared
            .records
            .lock()
            .get(&role)
            .map(|record| record.payloads.clone())
            .unwrap_or_default()
    }

    pub fn is_finalized(&self, role: RecordingRole) -> bool {
        self.shared
            .records
            .lock()
            .get(&role)
            .is_some_and(|record| record.finalized)
    }

    pub fn opened_roles(&self) -> Vec<RecordingRole> {
        self.shared.opened.lock().clone()
    }

    pub async fn wait_for_frames(&self, role: RecordingRole, count: usize) {
        wait_until(|| self.pts(role).len() >= count).await;
    }
}

#[async_trait]
impl SinkFactory for MemorySinkFactory {
    async fn open(
        &self,
        role: RecordingRole,
        _codec: MediaCodec,
        _clock: ClockConfig,
        path: &Path,
    ) -> Result<Box<dyn MediaSink>, RecorderError> {
        if self.shared.fail_open.lock().contains(&role) {
            return Err(RecorderError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("refusing to open {}", role),
            )));
        }

        self.shared.opened.lock().push(role);
        self.shared.records.lock().insert(role, SinkRecord::default());
        Ok(Box::new(MemorySink {
            role,
            path: path.to_path_buf(),
            shared: self.shared.clone(),
        }))
    }
}

struct MemorySink {
    role: RecordingRole,
    path: PathBuf,
    shared: Arc<MemorySinkShared>,
}

#[async_trait]
impl MediaSink for MemorySink {
    async fn write(&mut self, frame: &MediaFrame) -> Result<(), RecorderError> {
        let mut records = self.shared.records.lock();
        let record = records.entry(self.role).or_default();
        record.pts.push(frame.pts);
        record.payloads.push(frame.data.to_vec());
        Ok(())
    }

    async fn finalize(self: Box<Self>) -> Result<PathBuf, RecorderError> {
        if self.shared.fail_finalize.lock().contains(&self.role) {
            return Err(RecorderError::Encode {
                path: self.path.clone(),
                message: "disk full".to_string(),
            });
        }
        self.shared
            .records
            .lock()
            .entry(self.role)
            .or_default()
            .finalized = true;
        Ok(self.path.clone())
    }
}
