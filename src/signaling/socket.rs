//! # Signaling WebSocket
//!
//! Actix actor for one control connection.
//!
//! ## Threading:
//! The actor only does socket I/O. Text frames are forwarded in order to a
//! worker task that owns the [`ClientConnection`], so room transitions (which
//! may await recorder start/stop) never block the actor's context. Outbound
//! messages come back through [`SocketChannel`], which posts them to the
//! actor's mailbox.
//!
//! ## Endpoints:
//! - `GET /ws` joins the default room
//! - `GET /ws/{room_id}` joins (and creates on demand) a named room

use crate::error::{AppError, ChannelError};
use crate::room::DEFAULT_ROOM;
use crate::signaling::channel::ClientChannel;
use crate::signaling::hub::{ClientConnection, Flow, SignalingHub};
use crate::signaling::protocol::ServerMessage;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const MAX_ROOM_ID_LEN: usize = 64;

/// Message for sending text to the WebSocket client.
#[derive(Message)]
#[rtype(result = "()")]
struct SendText(String);

/// Close the socket from the server side.
#[derive(Message)]
#[rtype(result = "()")]
struct CloseConnection;

pub struct SignalingSocket {
    id: Uuid,
    room_id: String,
    hub: Arc<SignalingHub>,
    heartbeat_interval: Duration,
    client_timeout: Duration,
    last_heartbeat: Instant,
    inbox: Option<mpsc::UnboundedSender<String>>,
}

impl SignalingSocket {
    pub fn new(
        room_id: impl Into<String>,
        hub: Arc<SignalingHub>,
        heartbeat_interval: Duration,
        client_timeout: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id: room_id.into(),
            hub,
            heartbeat_interval,
            client_timeout,
            last_heartbeat: Instant::now(),
            inbox: None,
        }
    }

    fn reply(&self, ctx: &mut ws::WebsocketContext<Self>, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(err) => error!(connection = %self.id, error = %err, "Failed to encode reply"),
        }
    }
}

impl Actor for SignalingSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection = %self.id, room = %self.room_id, "Signaling connection started");

        let channel = Arc::new(SocketChannel {
            id: self.id,
            addr: ctx.address(),
        });
        let connection = self.hub.connect(&self.room_id, channel);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        self.inbox = Some(inbox_tx);
        actix_web::rt::spawn(run_worker(connection, inbox_rx));

        let client_timeout = self.client_timeout;
        ctx.run_interval(self.heartbeat_interval, move |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > client_timeout {
                warn!(connection = %act.id, "Heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(connection = %self.id, room = %self.room_id, "Signaling connection stopped");
        // Dropping the sender ends the worker, which runs the disconnect cleanup.
        self.inbox = None;
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for SignalingSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                let delivered = self
                    .inbox
                    .as_ref()
                    .map(|inbox| inbox.send(text.to_string()).is_ok())
                    .unwrap_or(false);
                if !delivered {
                    debug!(connection = %self.id, "Worker gone, dropping message");
                }
            }
            Ok(ws::Message::Binary(_)) => {
                self.reply(ctx, &ServerMessage::error("Binary frames are not supported"));
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(connection = %self.id, reason = ?reason, "Client closed connection");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(connection = %self.id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection = %self.id, error = %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

impl Handler<SendText> for SignalingSocket {
    type Result = ();

    fn handle(&mut self, msg: SendText, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl Handler<CloseConnection> for SignalingSocket {
    type Result = ();

    fn handle(&mut self, _msg: CloseConnection, ctx: &mut Self::Context) {
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Normal,
            description: None,
        }));
        ctx.stop();
    }
}

/// Drains one connection's inbound frames in arrival order.
async fn run_worker(mut connection: ClientConnection, mut inbox: mpsc::UnboundedReceiver<String>) {
    while let Some(text) = inbox.recv().await {
        if connection.handle_text(&text).await == Flow::Close {
            break;
        }
    }
    connection.disconnected().await;
}

/// Hub-facing handle to a socket actor.
struct SocketChannel {
    id: Uuid,
    addr: Addr<SignalingSocket>,
}

impl ClientChannel for SocketChannel {
    fn id(&self) -> Uuid {
        self.id
    }

    fn send(&self, message: &ServerMessage) -> Result<(), ChannelError> {
        if !self.addr.connected() {
            return Err(ChannelError::Closed);
        }
        let json = serde_json::to_string(message)?;
        self.addr.do_send(SendText(json));
        Ok(())
    }

    fn close(&self) {
        if self.addr.connected() {
            self.addr.do_send(CloseConnection);
        }
    }
}

/// Room ids end up in logs and URLs, so keep them to a safe alphabet.
pub fn is_valid_room_id(room_id: &str) -> bool {
    !room_id.is_empty()
        && room_id.len() <= MAX_ROOM_ID_LEN
        && room_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn start_socket(
    room_id: &str,
    req: &HttpRequest,
    stream: web::Payload,
    app_state: &AppState,
) -> ActixResult<HttpResponse> {
    info!(room = room_id, peer = ?req.connection_info().peer_addr(), "New signaling connection request");

    let config = app_state.config();
    let socket = SignalingSocket::new(
        room_id,
        app_state.hub.clone(),
        config.signaling.heartbeat_interval(),
        config.signaling.client_timeout(),
    );
    ws::start(socket, req, stream)
}

/// WebSocket endpoint for the default room.
pub async fn signaling_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    start_socket(DEFAULT_ROOM, &req, stream, &app_state)
}

/// WebSocket endpoint for a named room.
pub async fn room_websocket(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let room_id = path.into_inner();
    if !is_valid_room_id(&room_id) {
        return Err(AppError::BadRequest(format!("Invalid room id '{}'", room_id)).into());
    }
    start_socket(&room_id, &req, stream, &app_state)
}
