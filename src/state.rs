//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket endpoint through
//! `web::Data<AppState>`.
//!
//! ## What lives here:
//! - **config**: the validated configuration, read-only after startup
//! - **metrics**: per-request HTTP counters updated by the metrics middleware
//! - **hub**: the signaling hub that owns every room and its recordings
//! - **start_time**: for uptime reporting
//!
//! ## Locking:
//! HTTP metrics sit behind a `parking_lot::RwLock`. Every critical section is
//! a handful of integer updates, so a synchronous lock is fine even inside
//! async handlers. Signaling counters are atomics owned by the hub.

use crate::config::AppConfig;
use crate::signaling::metrics::SignalingMetricsSnapshot;
use crate::signaling::SignalingHub;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// The main application state that's shared across all request handlers.
///
/// Cloning is cheap: every field is an `Arc` or `Copy`.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration, fixed for the life of the process
    pub config: Arc<AppConfig>,

    /// HTTP request metrics, updated by every request
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Rooms, peer sessions and recordings
    pub hub: Arc<SignalingHub>,

    /// When the server started
    pub start_time: Instant,
}

/// Request metrics collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of requests that ended in a 4xx/5xx or an error
    pub error_count: u64,

    /// Per-route statistics, keyed by `"METHOD /route/{pattern}"`
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Statistics for one route.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, hub: Arc<SignalingHub>) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            hub,
            start_time: Instant::now(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        self.metrics.write().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics.write().error_count += 1;
    }

    /// Record one finished request against its route.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Copy the HTTP metrics so no lock is held while a response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().clone()
    }

    pub fn get_signaling_snapshot(&self) -> SignalingMetricsSnapshot {
        self.hub.metrics().snapshot()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed, between 0.0 and 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
