//! The kiosk WebSocket endpoint (`GET /ws?token=...`).
//!
//! The handshake verifies the bearer credential and the registry state
//! before the socket is handed to the connection manager; verification
//! happens while the request is still plain HTTP, the verdict is delivered
//! as a close frame right after the upgrade completes. Accepted sockets run
//! the receive loop until the peer goes away: every text frame is parsed and
//! dispatched into the correlation table, parse failures are logged and the
//! loop keeps serving.

use axum::{
    Router,
    extract::{
        Query, WebSocketUpgrade,
        ws::{self, WebSocket},
    },
    response::Response,
    routing::any,
};
use futures::StreamExt as _;
use serde::Deserialize;
use serde_json::Value;
use tracing::{Instrument as _, instrument};
use tunnel_types::KioskId;

use crate::{AppState, api::errors::HandshakeError, services::connection_manager::ConnectionHandle};

#[derive(Debug, Deserialize)]
pub(crate) struct WsQuery {
    token: String,
}

/// Mounts the `/ws` upgrade route.
pub(crate) fn routes(state: AppState) -> Router {
    Router::new().route(
        "/ws",
        any(move |ws, query| handle_upgrade(state.clone(), ws, query)),
    )
}

/// Runs the handshake verification chain and upgrades the connection.
///
/// The rejection close frame can only be delivered over the established
/// socket, so even refused credentials go through the upgrade.
#[instrument(level = "debug", skip_all, name = "ws_handshake")]
async fn handle_upgrade(state: AppState, ws: WebSocketUpgrade, query: Query<WsQuery>) -> Response {
    let verdict = authorize(&state, &query.token).await;
    let parent_span = tracing::Span::current();
    ws.max_message_size(state.ws_max_message_size)
        .on_failed_upgrade(|err| {
            tracing::warn!("could not establish websocket connection: {err:?}");
        })
        .on_upgrade(move |mut socket| {
            async move {
                match verdict {
                    Ok(kiosk_id) => run_connection(state, kiosk_id, socket).await,
                    Err(err) => {
                        // closing handshake on a best-effort basis, like the
                        // accept path
                        let close_frame = err.into_close_frame();
                        let _ = socket.send(ws::Message::Close(Some(close_frame))).await;
                    }
                }
            }
            .instrument(parent_span)
        })
}

/// The handshake verification chain: credential verifies to an identity, the
/// kiosk is registered and enabled, and the presented credential byte-equals
/// the stored one.
async fn authorize(state: &AppState, token: &str) -> Result<KioskId, HandshakeError> {
    let Some(kiosk_id) = state.token_verifier.verify(token) else {
        return Err(HandshakeError::InvalidToken);
    };
    tracing::debug!("token verified for kiosk {kiosk_id}");
    if !state.registry.kiosk_exists(&kiosk_id).await? {
        return Err(HandshakeError::KioskNotFound(kiosk_id));
    }
    if !state.registry.is_kiosk_enabled(&kiosk_id).await? {
        return Err(HandshakeError::KioskDisabled(kiosk_id));
    }
    match state.registry.stored_token(&kiosk_id).await? {
        Some(stored) if stored == token => Ok(kiosk_id),
        _ => Err(HandshakeError::TokenMismatch(kiosk_id)),
    }
}

/// The lifetime of one accepted kiosk socket.
///
/// Registers the write half with the connection manager (applying the
/// duplicate policy) and then reads frames until the peer closes or errors.
/// The final disconnect only removes the table entry if it still holds this
/// very handle - a displaced connection cleans up after its replacement
/// without touching the new entry.
#[instrument(level = "debug", skip_all, fields(kiosk = %kiosk_id))]
async fn run_connection(state: AppState, kiosk_id: KioskId, socket: WebSocket) {
    let (sink, mut stream) = socket.split();
    let handle = ConnectionHandle::new(sink);
    let Some(handle) = state.connection_manager.accept(&kiosk_id, handle).await else {
        return;
    };
    let conn_id = handle.conn_id();

    while let Some(message) = stream.next().await {
        match message {
            Ok(ws::Message::Text(frame)) => match serde_json::from_str::<Value>(frame.as_str()) {
                Ok(reply) => state.connection_manager.handle_reply(&kiosk_id, reply),
                Err(err) => {
                    tracing::error!("invalid json from kiosk {kiosk_id}: {err}");
                }
            },
            Ok(ws::Message::Close(frame)) => {
                tracing::debug!("kiosk {kiosk_id} closed the connection: {frame:?}");
                break;
            }
            // tungstenite answers pings for us; other frames carry nothing
            Ok(_) => {}
            Err(err) => {
                tracing::warn!("websocket error for kiosk {kiosk_id}: {err:?}");
                break;
            }
        }
    }

    handle.mark_closed();
    state.connection_manager.disconnect(&kiosk_id, conn_id).await;
}
