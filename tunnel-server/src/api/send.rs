//! The HTTP entry point for tunnelled calls (`POST /send`).
//!
//! The caller addresses a kiosk with the `header-kiosk-id` header; the whole
//! request (lowercased headers plus JSON body) is forwarded over the tunnel
//! and the kiosk's reply is returned verbatim. Business failures are always
//! in-band `{"status": "error", ...}` envelopes with HTTP 200; only a
//! structurally unusable request (missing routing header) is an HTTP error.

use std::{collections::HashMap, time::Instant};

use axum::{
    Json, Router,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::{Value, json};
use tracing::instrument;
use tunnel_types::{
    KioskId,
    wire::{ErrorTag, HEADER_KIOSK_ID, HEADER_OPERATION_TYPE, STATUS_ERROR, TunnelRequest},
};

use crate::{
    AppState,
    api::errors::ApiError,
    metrics::{METRICS_ID_SERVER_ERRORS, METRICS_ID_SERVER_REQUEST_DURATION},
};

/// Header names whose values are redacted before they cross the tunnel.
const SENSITIVE_HEADERS: [&str; 7] = [
    "authorization",
    "cookie",
    "x-api-key",
    "x-auth-token",
    "api-key",
    "secret",
    "token",
];

const REDACTED: &str = "***REDACTED***";

/// Mounts the `/send` route.
pub(crate) fn routes(state: AppState) -> Router {
    Router::new().route(
        "/send",
        post(move |headers, body| send(state.clone(), headers, body)),
    )
}

/// Routes one HTTP call to the addressed kiosk and awaits the reply.
#[instrument(level = "debug", skip_all, fields(kiosk = tracing::field::Empty))]
async fn send(
    state: AppState,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let start = Instant::now();

    let Some(kiosk_id) = headers
        .get(HEADER_KIOSK_ID)
        .and_then(|value| value.to_str().ok())
        .map(KioskId::from)
    else {
        return Ok((StatusCode::BAD_REQUEST, "Missing Header-Kiosk-Id header").into_response());
    };
    tracing::Span::current().record("kiosk", kiosk_id.to_string());

    let operation_type = headers
        .get(HEADER_OPERATION_TYPE)
        .and_then(|value| value.to_str().ok());
    tracing::info!("send request for kiosk {kiosk_id} (operation: {operation_type:?})");

    if !state.registry.kiosk_exists(&kiosk_id).await? {
        tracing::warn!("kiosk {kiosk_id} not found");
        return Ok(business_error(ErrorTag::KioskNotFound, &kiosk_id));
    }
    if !state.registry.is_kiosk_enabled(&kiosk_id).await? {
        tracing::warn!("kiosk {kiosk_id} disabled");
        return Ok(business_error(ErrorTag::KioskDisabled, &kiosk_id));
    }
    if !state.connection_manager.is_connected(&kiosk_id) {
        tracing::warn!("kiosk {kiosk_id} offline");
        ::metrics::counter!(METRICS_ID_SERVER_ERRORS, "error" => "kiosk_offline").increment(1);
        return Ok(business_error(ErrorTag::KioskOffline, &kiosk_id));
    }

    let envelope = TunnelRequest {
        request_id: None,
        headers: redacted_headers(&headers),
        body,
    };

    let response = state
        .connection_manager
        .send_and_wait(&kiosk_id, envelope, state.kiosk_response_timeout)
        .await;

    let latency = start.elapsed();
    ::metrics::histogram!(METRICS_ID_SERVER_REQUEST_DURATION).record(latency.as_secs_f64());
    if let Err(err) = state.registry.increment_requests().await {
        tracing::error!("could not increment request counter: {err:?}");
    }
    if let Err(err) = state.registry.add_latency_sample(latency.as_secs_f64()).await {
        tracing::error!("could not record latency sample: {err:?}");
    }

    match response {
        Some(response) => {
            tracing::info!("response for kiosk {kiosk_id} after {latency:?}");
            Ok(Json(response).into_response())
        }
        None => {
            tracing::error!("no response from kiosk {kiosk_id} after {latency:?}");
            if let Err(err) = state.registry.increment_errors().await {
                tracing::error!("could not increment error counter: {err:?}");
            }
            Ok(business_error(ErrorTag::Timeout, &kiosk_id))
        }
    }
}

/// Lowercases the incoming headers and blanks the sensitive set.
///
/// Redaction applies to what is forwarded over the tunnel; the original
/// request is untouched.
fn redacted_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let name = name.as_str().to_ascii_lowercase();
            let value = if SENSITIVE_HEADERS.contains(&name.as_str()) {
                REDACTED.to_owned()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            (name, value)
        })
        .collect()
}

fn business_error(tag: ErrorTag, kiosk_id: &KioskId) -> Response {
    Json(json!({
        "status": STATUS_ERROR,
        "error": tag,
        "kiosk_id": kiosk_id,
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn sensitive_headers_are_redacted_case_insensitively() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Bearer secret"));
        headers.insert("X-Api-Key", HeaderValue::from_static("12345"));
        headers.insert("Header-Kiosk-Id", HeaderValue::from_static("K1"));

        let redacted = redacted_headers(&headers);
        assert_eq!(redacted["authorization"], REDACTED);
        assert_eq!(redacted["x-api-key"], REDACTED);
        assert_eq!(redacted["header-kiosk-id"], "K1");
    }
}
