//! # Interview Capture Server - Main Application Entry Point
//!
//! Two browsers (an interviewer and a candidate) connect over WebSocket,
//! negotiate WebRTC media with this server, and the server records their
//! tracks to disk with a shared synthetic clock.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, `config.toml`, environment)
//! - **state**: shared application state and HTTP metrics
//! - **health** / **handlers**: monitoring and status endpoints
//! - **middleware**: request logging and per-route metrics
//! - **signaling**: the control protocol, hub and WebSocket actor
//! - **room**: the per-room state machine and room table
//! - **peer**: per-party media connections (webrtc-rs in production)
//! - **media** / **recording**: track synchronization and file output
//! - **error**: HTTP and domain error types

mod config;
mod error;
mod handlers;
mod health;
mod media;
mod middleware;
mod peer;
mod recording;
mod room;
mod signaling;
mod state;

#[cfg(test)]
mod testing;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use crate::config::AppConfig;
use crate::peer::rtc::WebRtcConnectionFactory;
use crate::recording::RecordingCoordinator;
use crate::room::RoomRegistry;
use crate::signaling::{SignalingHub, SignalingMetrics};
use crate::state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// ## Startup:
/// 1. Load `.env`, set up tracing, load and validate configuration
/// 2. Build the media stack (webrtc-rs API, recording coordinator) and the hub
/// 3. Serve HTTP and WebSocket routes until a shutdown signal
///
/// ## Shutdown:
/// Active recordings are finalized before the HTTP server stops. Recorder
/// tasks run on the worker runtimes, which go away with the server.
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting interview-capture v{}", env!("CARGO_PKG_VERSION"));
    info!(
        host = %config.server.host,
        port = config.server.port,
        output_dir = %config.recording.output_dir.display(),
        "Configuration loaded"
    );

    let connections = Arc::new(WebRtcConnectionFactory::new(
        config.signaling.ice_servers.clone(),
        config.recording.audio.sample_rate,
    )?);
    let recordings = Arc::new(RecordingCoordinator::with_file_sinks(config.recording.clone()));
    let hub = Arc::new(SignalingHub::new(
        Arc::new(RoomRegistry::new()),
        connections,
        recordings,
        Arc::new(SignalingMetrics::default()),
        config.signaling.negotiation_timeout(),
    ));

    let app_state = AppState::new(config.clone(), hub.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Middleware runs in reverse order of registration for requests
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .wrap(TracingLogger::default())
            .wrap(cors)
            .route("/ws", web::get().to(signaling::socket::signaling_websocket))
            .route("/ws/{room_id}", web::get().to(signaling::socket::room_websocket))
            .service(
                web::scope("/api")
                    .route("/status", web::get().to(handlers::get_status))
                    .route("/rooms/{room_id}/status", web::get().to(handlers::get_room_status))
                    .route("/recordings", web::get().to(handlers::get_recordings))
                    .route("/config", web::get().to(handlers::get_config)),
            )
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
            hub.shutdown().await;
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, finalizing recordings...");
            hub.shutdown().await;
            info!("Stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Console tracing. `RUST_LOG` overrides the default filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "interview_capture=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Watch for SIGTERM and SIGINT and raise the shutdown flag on either.
fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("Failed to install signal handlers, falling back to Ctrl+C: {}", e);
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for Ctrl+C: {}", e);
                        return;
                    }
                    SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
