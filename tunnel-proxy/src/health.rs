//! Loopback health endpoint.
//!
//! Monitoring on the kiosk itself polls `GET /health` to see whether the
//! tunnel is up without touching the payment flow.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use axum::{Json, Router, response::IntoResponse, routing::get};
use serde_json::json;

use crate::{queue::OfflineQueue, stats::ProxyStats};

/// Everything the health endpoint reports on.
#[derive(Clone)]
pub struct HealthState {
    connected: Arc<AtomicBool>,
    stats: Arc<ProxyStats>,
    queue: Arc<OfflineQueue>,
    routes_configured: usize,
    started_at: Instant,
}

impl HealthState {
    /// Bundles the shared handles the endpoint reads from.
    pub fn new(
        connected: Arc<AtomicBool>,
        stats: Arc<ProxyStats>,
        queue: Arc<OfflineQueue>,
        routes_configured: usize,
    ) -> Self {
        Self {
            connected,
            stats,
            queue,
            routes_configured,
            started_at: Instant::now(),
        }
    }
}

/// Mounts the `/health` route.
pub fn routes(state: HealthState) -> Router {
    Router::new().route("/health", get(move || health(state)))
}

async fn health(state: HealthState) -> impl IntoResponse {
    let ws_connected = state.connected.load(Ordering::Relaxed);
    let status = if ws_connected {
        "healthy"
    } else {
        "disconnected"
    };
    let uptime_seconds = state.started_at.elapsed().as_secs_f64();
    Json(json!({
        "status": status,
        "ws_connected": ws_connected,
        "uptime_seconds": (uptime_seconds * 100.0).round() / 100.0,
        "stats": state.stats.snapshot(),
        "queue_size": state.queue.len(),
        "routes_configured": state.routes_configured,
    }))
}
