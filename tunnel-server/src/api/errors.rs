//! Error types for the server API.
//!
//! Handshake failures turn into WebSocket close frames (the upgrade already
//! succeeded by the time the verdict can be delivered); infrastructure
//! failures on the HTTP surface turn into plain 500 responses. In-protocol
//! business errors never use either path; they are in-band JSON envelopes
//! built by the send router.

use axum::{
    extract::ws::{CloseFrame, close_code},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tunnel_types::{
    KioskId,
    wire::{
        CLOSE_REASON_INVALID_TOKEN, CLOSE_REASON_KIOSK_DISABLED, CLOSE_REASON_KIOSK_NOT_FOUND,
        CLOSE_REASON_TOKEN_MISMATCH,
    },
};

/// All reasons a kiosk handshake may be refused.
#[derive(Debug, thiserror::Error)]
pub(crate) enum HandshakeError {
    #[error("invalid token")]
    InvalidToken,
    #[error("kiosk {0} not found")]
    KioskNotFound(KioskId),
    #[error("kiosk {0} disabled")]
    KioskDisabled(KioskId),
    #[error("token mismatch for kiosk {0}")]
    TokenMismatch(KioskId),
    #[error(transparent)]
    Registry(#[from] eyre::Report),
}

impl HandshakeError {
    /// Transforms the rejection into the close frame delivered to the peer.
    pub(crate) fn into_close_frame(self) -> CloseFrame {
        tracing::warn!("rejecting websocket connection: {self}");
        match self {
            HandshakeError::InvalidToken => CloseFrame {
                code: close_code::POLICY,
                reason: CLOSE_REASON_INVALID_TOKEN.into(),
            },
            HandshakeError::KioskNotFound(_) => CloseFrame {
                code: close_code::POLICY,
                reason: CLOSE_REASON_KIOSK_NOT_FOUND.into(),
            },
            HandshakeError::KioskDisabled(_) => CloseFrame {
                code: close_code::POLICY,
                reason: CLOSE_REASON_KIOSK_DISABLED.into(),
            },
            HandshakeError::TokenMismatch(_) => CloseFrame {
                code: close_code::POLICY,
                reason: CLOSE_REASON_TOKEN_MISMATCH.into(),
            },
            HandshakeError::Registry(_) => CloseFrame {
                code: close_code::ERROR,
                reason: "internal error".into(),
            },
        }
    }
}

/// Infrastructure failure on the HTTP surface.
///
/// Only non-protocol errors (registry outage and the like) take this path;
/// callers never see a 5xx for an in-protocol failure.
pub(crate) struct ApiError(eyre::Report);

impl<E: Into<eyre::Report>> From<E> for ApiError {
    fn from(value: E) -> Self {
        Self(value.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!("internal error serving request: {:?}", self.0);
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
    }
}
