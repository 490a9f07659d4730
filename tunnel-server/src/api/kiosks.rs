//! Read-only registry introspection endpoints.
//!
//! - `/api/kiosks` – all kiosks with status and connection uptime.
//! - `/api/stats` – aggregate request counters.
//! - `/api/history` – recent connection events.

use axum::{Json, Router, response::IntoResponse, routing::get};
use serde_json::json;

use crate::{AppState, api::errors::ApiError, unix_now};

const HISTORY_DEFAULT_LIMIT: usize = 20;

/// Mounts the three read-only `/api/*` endpoints.
pub(crate) fn routes(state: AppState) -> Router {
    let stats_state = state.clone();
    let history_state = state.clone();
    Router::new()
        .route("/api/kiosks", get(move || kiosks(state)))
        .route("/api/stats", get(move || stats(stats_state)))
        .route("/api/history", get(move || history(history_state)))
}

/// All registered kiosks with their live status and uptime.
async fn kiosks(state: AppState) -> Result<impl IntoResponse, ApiError> {
    let all = state.registry.all_kiosks().await?;
    let now = unix_now();
    let online = all
        .iter()
        .filter(|info| state.connection_manager.is_connected(&info.id))
        .count();
    let total = all.len();
    let kiosks = all
        .into_iter()
        .map(|info| {
            let connected = state.connection_manager.is_connected(&info.id);
            let uptime = match (connected, info.connected_at) {
                (true, Some(connected_at)) => now.saturating_sub(connected_at),
                _ => 0,
            };
            json!({
                "id": info.id,
                "name": info.name,
                "enabled": info.enabled,
                "status": info.status,
                "online": connected,
                "uptime": uptime,
            })
        })
        .collect::<Vec<_>>();
    Ok(Json(json!({
        "kiosks": kiosks,
        "total": total,
        "online": online,
    })))
}

/// Aggregate request counters plus the request rate since server start.
async fn stats(state: AppState) -> Result<impl IntoResponse, ApiError> {
    let stats = state.registry.stats().await?;
    let uptime_minutes = unix_now().saturating_sub(state.started_at) as f64 / 60.0;
    let requests_per_minute = stats.requests_total as f64 / uptime_minutes.max(1.0);
    Ok(Json(json!({
        "requests_total": stats.requests_total,
        "errors_total": stats.errors_total,
        "avg_latency": stats.avg_latency,
        "requests_per_minute": (requests_per_minute * 10.0).round() / 10.0,
    })))
}

/// Recent connection events, newest first.
async fn history(state: AppState) -> Result<impl IntoResponse, ApiError> {
    let history = state
        .registry
        .connection_history(HISTORY_DEFAULT_LIMIT)
        .await?;
    Ok(Json(json!({ "history": history })))
}
