//! Signaling counters.
//!
//! Plain atomics: they are bumped from socket workers, failure hooks and
//! recorder tasks without taking any lock, and read by `/metrics`.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SignalingMetrics {
    pub connections_opened: AtomicU64,
    pub connections_active: AtomicU64,
    pub joins: AtomicU64,
    pub joins_rejected: AtomicU64,
    pub protocol_violations: AtomicU64,
    pub malformed_messages: AtomicU64,
    pub ice_failures: AtomicU64,
    pub negotiation_failures: AtomicU64,
    pub negotiation_timeouts: AtomicU64,
    pub peer_failures: AtomicU64,
    pub recordings_started: AtomicU64,
    pub recordings_completed: AtomicU64,
    pub recorder_failures: AtomicU64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SignalingMetricsSnapshot {
    pub connections_opened: u64,
    pub connections_active: u64,
    pub joins: u64,
    pub joins_rejected: u64,
    pub protocol_violations: u64,
    pub malformed_messages: u64,
    pub ice_failures: u64,
    pub negotiation_failures: u64,
    pub negotiation_timeouts: u64,
    pub peer_failures: u64,
    pub recordings_started: u64,
    pub recordings_completed: u64,
    pub recorder_failures: u64,
}

impl SignalingMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        Self::incr(&self.connections_opened);
        Self::incr(&self.connections_active);
    }

    pub fn connection_closed(&self) {
        // Saturating so a stray double close cannot wrap the gauge.
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
    }

    pub fn snapshot(&self) -> SignalingMetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        SignalingMetricsSnapshot {
            connections_opened: load(&self.connections_opened),
            connections_active: load(&self.connections_active),
            joins: load(&self.joins),
            joins_rejected: load(&self.joins_rejected),
            protocol_violations: load(&self.protocol_violations),
            malformed_messages: load(&self.malformed_messages),
            ice_failures: load(&self.ice_failures),
            negotiation_failures: load(&self.negotiation_failures),
            negotiation_timeouts: load(&self.negotiation_timeouts),
            peer_failures: load(&self.peer_failures),
            recordings_started: load(&self.recordings_started),
            recordings_completed: load(&self.recordings_completed),
            recorder_failures: load(&self.recorder_failures),
        }
    }
}
