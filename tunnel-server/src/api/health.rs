//! Health and metrics endpoints.
//!
//! - `/health` – liveness summary with kiosk counts (`GET` and `HEAD`).
//! - `/metrics` – Prometheus text snapshot.
//!
//! Both answers carry `Cache-Control: no-cache` so monitors always see
//! fresh state.

use axum::{
    Json, Router,
    http::{HeaderValue, header},
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::{AppState, metrics::METRICS_ID_SERVER_TOTAL_KIOSKS};

/// Mounts `/health` and `/metrics`, both uncacheable.
pub(crate) fn routes(state: AppState) -> Router {
    let metrics_state = state.clone();
    Router::new()
        .route("/health", get(move || health(state)))
        .route("/metrics", get(move || metrics_snapshot(metrics_state)))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        ))
}

/// General health check endpoint.
///
/// `healthy` when the registry is reachable and agrees with the connection
/// table, `degraded` when the registry lags behind the table, `unhealthy`
/// when the registry cannot be read at all. Always `200 OK` - monitors read
/// the body.
async fn health(state: AppState) -> impl IntoResponse {
    let active_kiosks = state.connection_manager.active_count();
    match state.registry.all_kiosks().await {
        Ok(all) => {
            ::metrics::gauge!(METRICS_ID_SERVER_TOTAL_KIOSKS).set(all.len() as f64);
            let online = state
                .registry
                .online_kiosks()
                .await
                .map(|kiosks| kiosks.len())
                .unwrap_or(0);
            let status = if online == active_kiosks {
                "healthy"
            } else {
                "degraded"
            };
            Json(json!({
                "status": status,
                "active_kiosks": active_kiosks,
                "total_kiosks": all.len(),
                "pending_requests": state.connection_manager.pending_requests(),
            }))
        }
        Err(err) => {
            tracing::error!("health check failed: {err:?}");
            Json(json!({
                "status": "unhealthy",
                "error": err.to_string(),
            }))
        }
    }
}

/// Prometheus metrics endpoint.
async fn metrics_snapshot(state: AppState) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics_handle.render(),
    )
}
