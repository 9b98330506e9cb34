//! # WebRTC Media Connections
//!
//! Production [`ConnectionFactory`] built on webrtc-rs.
//!
//! ## Setup:
//! One `API` (default codecs + default interceptors) is shared by every
//! connection. Each connection gets the configured STUN servers and forwards:
//! - `on_track` as `PeerEvent::Track`, wrapped in a [`RemoteTrack`]
//! - the `Failed` connection state as `PeerEvent::Failed`
//!
//! ## Depacketizing:
//! RTP payloads are turned into whole frames before they reach a recorder:
//! - Opus: one packet is one frame; the sample count comes from the TOC byte
//! - VP8 / VP9 / H.264: packets go through a `SampleBuilder`, which
//!   reorders and reassembles them into complete pictures

use crate::error::{PeerError, TrackError};
use crate::media::{MediaCodec, MediaFrame, MediaTrack, TrackKind};
use crate::peer::connection::{
    ConnectionFactory, IceCandidate, MediaConnection, PeerEvent, SessionDescription,
};
use crate::peer::Role;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::io::sample_builder::SampleBuilder;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::codecs::h264::H264Packet;
use webrtc::rtp::codecs::vp8::Vp8Packet;
use webrtc::rtp::codecs::vp9::Vp9Packet;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

/// How many packets a video frame may trail before the sample builder gives up on it.
const MAX_LATE_PACKETS: u16 = 128;

pub struct WebRtcConnectionFactory {
    api: API,
    ice_servers: Vec<String>,
    audio_sample_rate: u32,
}

impl WebRtcConnectionFactory {
    pub fn new(ice_servers: Vec<String>, audio_sample_rate: u32) -> Result<Self, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| PeerError::Setup(format!("Failed to register codecs: {}", e)))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| PeerError::Setup(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            ice_servers,
            audio_sample_rate,
        })
    }
}

#[async_trait]
impl ConnectionFactory for WebRtcConnectionFactory {
    async fn create(
        &self,
        role: Role,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn MediaConnection>, PeerError> {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };

        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(
            self.api
                .new_peer_connection(config)
                .await
                .map_err(|e| PeerError::Setup(e.to_string()))?,
        );

        let track_events = events.clone();
        let sample_rate = self.audio_sample_rate;
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let events = track_events.clone();
                Box::pin(async move {
                    let mime_type = track.codec().capability.mime_type;
                    match RemoteTrack::new(track, sample_rate) {
                        Some(remote) => {
                            info!(role = %role, mime_type = %mime_type, "Remote track received");
                            let _ = events.send(PeerEvent::Track(Arc::new(remote)));
                        }
                        None => {
                            warn!(role = %role, mime_type = %mime_type, "Ignoring track with unsupported codec");
                        }
                    }
                })
            },
        ));

        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let events = events.clone();
            Box::pin(async move {
                debug!(role = %role, state = %state, "Peer connection state changed");
                if state == RTCPeerConnectionState::Failed {
                    let _ = events.send(PeerEvent::Failed("peer connection failed".to_string()));
                }
            })
        }));

        Ok(Arc::new(WebRtcConnection { role, pc }))
    }
}

struct WebRtcConnection {
    role: Role,
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl MediaConnection for WebRtcConnection {
    async fn negotiate(&self, offer: SessionDescription) -> Result<SessionDescription, PeerError> {
        if offer.sdp_type != "offer" {
            return Err(PeerError::InvalidDescription(format!(
                "expected an offer, got '{}'",
                offer.sdp_type
            )));
        }

        let remote = RTCSessionDescription::offer(offer.sdp)
            .map_err(|e| PeerError::InvalidDescription(e.to_string()))?;
        self.pc.set_remote_description(remote).await?;

        let answer = self.pc.create_answer(None).await?;

        // Non-trickle answer: wait until every local candidate is in the SDP.
        let mut gathering_complete = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(answer).await?;
        let _ = gathering_complete.recv().await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| PeerError::Negotiation("no local description after answer".to_string()))?;

        debug!(role = %self.role, "Negotiation complete");
        Ok(SessionDescription {
            sdp: local.sdp,
            sdp_type: local.sdp_type.to_string(),
        })
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| PeerError::Candidate(e.to_string()))
    }

    async fn close(&self) {
        if let Err(err) = self.pc.close().await {
            warn!(role = %self.role, error = %err, "Error closing peer connection");
        }
    }
}

enum FrameAssembler {
    Opus { sample_rate: u32 },
    Vp8(SampleBuilder<Vp8Packet>),
    Vp9(SampleBuilder<Vp9Packet>),
    H264(SampleBuilder<H264Packet>),
}

impl FrameAssembler {
    fn new(codec: MediaCodec, clock_rate: u32, sample_rate: u32) -> Self {
        match codec {
            MediaCodec::Opus => FrameAssembler::Opus { sample_rate },
            MediaCodec::Vp8 => {
                FrameAssembler::Vp8(SampleBuilder::new(MAX_LATE_PACKETS, Vp8Packet::default(), clock_rate))
            }
            MediaCodec::Vp9 => {
                FrameAssembler::Vp9(SampleBuilder::new(MAX_LATE_PACKETS, Vp9Packet::default(), clock_rate))
            }
            MediaCodec::H264 => {
                FrameAssembler::H264(SampleBuilder::new(MAX_LATE_PACKETS, H264Packet::default(), clock_rate))
            }
        }
    }

    /// Feed one packet, returning a frame if one is complete.
    fn push(&mut self, packet: Packet) -> Option<MediaFrame> {
        match self {
            FrameAssembler::Opus { sample_rate } => {
                if packet.payload.is_empty() {
                    return None;
                }
                let samples = opus::packet::get_nb_samples(&packet.payload, *sample_rate).ok();
                let frame = MediaFrame::new(packet.payload);
                Some(match samples {
                    Some(samples) => frame.with_samples(samples as u32),
                    None => frame,
                })
            }
            FrameAssembler::Vp8(builder) => {
                builder.push(packet);
                builder.pop().map(|sample| MediaFrame::new(sample.data))
            }
            FrameAssembler::Vp9(builder) => {
                builder.push(packet);
                builder.pop().map(|sample| MediaFrame::new(sample.data))
            }
            FrameAssembler::H264(builder) => {
                builder.push(packet);
                builder.pop().map(|sample| MediaFrame::new(sample.data))
            }
        }
    }

    /// Frames left over after an earlier push completed more than one.
    fn pop(&mut self) -> Option<MediaFrame> {
        let sample = match self {
            FrameAssembler::Opus { .. } => None,
            FrameAssembler::Vp8(builder) => builder.pop(),
            FrameAssembler::Vp9(builder) => builder.pop(),
            FrameAssembler::H264(builder) => builder.pop(),
        };
        sample.map(|sample| MediaFrame::new(sample.data))
    }
}

/// A webrtc-rs remote track exposed as a [`MediaTrack`].
pub struct RemoteTrack {
    id: String,
    codec: MediaCodec,
    track: Arc<TrackRemote>,
    assembler: Mutex<FrameAssembler>,
}

impl RemoteTrack {
    /// `None` when the negotiated codec is not one we can record.
    pub fn new(track: Arc<TrackRemote>, audio_sample_rate: u32) -> Option<Self> {
        let params = track.codec();
        let codec = MediaCodec::from_mime_type(&params.capability.mime_type)?;
        let assembler = FrameAssembler::new(codec, params.capability.clock_rate, audio_sample_rate);

        Some(Self {
            id: track.id(),
            codec,
            track,
            assembler: Mutex::new(assembler),
        })
    }
}

#[async_trait]
impl MediaTrack for RemoteTrack {
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
        let mut assembler = self.assembler.lock().await;
        loop {
            if let Some(frame) = assembler.pop() {
                return Ok(frame);
            }

            let (packet, _) = self.track.read_rtp().await.map_err(|err| {
                debug!(track = %self.id, error = %err, "Remote track closed");
                TrackError::Ended
            })?;

            if let Some(frame) = assembler.push(packet) {
                return Ok(frame);
            }
        }
    }
}
