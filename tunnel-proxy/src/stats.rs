//! Process counters for the proxy.
//!
//! Surfaced by the loopback health endpoint and logged periodically by
//! [`stats_report_task`].

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Counters shared between the session loop, the pump and the health
/// endpoint.
#[derive(Debug, Default)]
pub struct ProxyStats {
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    errors: AtomicU64,
    reconnections: AtomicU64,
}

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsSnapshot {
    /// Frames received from the tunnel.
    pub messages_received: u64,
    /// Frames delivered to the tunnel.
    pub messages_sent: u64,
    /// Frames that failed processing or delivery.
    pub errors: u64,
    /// Times the tunnel connection was re-established.
    pub reconnections: u64,
}

impl ProxyStats {
    pub(crate) fn inc_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_reconnections(&self) {
        self.reconnections.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            reconnections: self.reconnections.load(Ordering::Relaxed),
        }
    }
}

pub(crate) fn log_stats(stats: &ProxyStats, title: &str) {
    let snapshot = stats.snapshot();
    tracing::info!(
        "{title}: received={} sent={} errors={} reconnections={}",
        snapshot.messages_received,
        snapshot.messages_sent,
        snapshot.errors,
        snapshot.reconnections,
    );
}

/// Background task logging the counters on a fixed interval until cancelled.
pub(crate) async fn stats_report_task(
    stats: std::sync::Arc<ProxyStats>,
    interval: Duration,
    cancellation_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // skip the tick that fires at creation time
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => log_stats(&stats, "periodic statistics"),
            _ = cancellation_token.cancelled() => return,
        }
    }
}
