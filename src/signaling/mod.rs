//! # Signaling Module
//!
//! The control plane between browsers and the server:
//! - **protocol**: JSON message shapes
//! - **channel**: outbound delivery to one client
//! - **hub**: message routing and room cleanup
//! - **socket**: the actix WebSocket actor and HTTP upgrade endpoints
//! - **metrics**: counters exposed on `/metrics`

pub mod channel;
pub mod hub;
pub mod metrics;
pub mod protocol;
pub mod socket;

pub use hub::SignalingHub;
pub use metrics::SignalingMetrics;
