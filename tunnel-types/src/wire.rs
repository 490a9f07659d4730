//! The tunnel wire protocol.
//!
//! Every frame on the tunnel is a single UTF-8 JSON text message. The Server
//! sends [`TunnelRequest`] envelopes to the Proxy; the Proxy answers with an
//! arbitrary JSON object that carries the preserved `request_id` plus a
//! `status` field (`"error"` replies additionally carry an [`ErrorTag`] and
//! a human-readable `message`). Correlation happens exclusively through the
//! `request_id`; there is no ordering guarantee between distinct requests.

use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

/// Routing header carrying the target kiosk identifier.
pub const HEADER_KIOSK_ID: &str = "header-kiosk-id";
/// Routing header selecting the Proxy-side gateway route.
pub const HEADER_OPERATION_TYPE: &str = "header-operation-type";
/// Routing header selecting the HTTP method for the gateway dispatch.
pub const HEADER_HTTP_METHOD: &str = "header-http-method";

/// The `status` value used by error replies.
pub const STATUS_ERROR: &str = "error";

/// Maximum size of a single tunnel frame in bytes.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Close reason sent to a displaced socket when a duplicate connection
/// replaces it.
pub const CLOSE_REASON_REPLACED: &str = "Replaced by new connection";
/// Close reason sent to a rejected duplicate connection.
pub const CLOSE_REASON_ALREADY_CONNECTED: &str = "Kiosk already connected";
/// Close reason for a credential that fails verification.
pub const CLOSE_REASON_INVALID_TOKEN: &str = "Invalid token";
/// Close reason for an identity that is not registered.
pub const CLOSE_REASON_KIOSK_NOT_FOUND: &str = "Kiosk not found";
/// Close reason for a registered but disabled kiosk.
pub const CLOSE_REASON_KIOSK_DISABLED: &str = "Kiosk disabled";
/// Close reason for a credential that verifies but does not byte-equal the
/// stored one.
pub const CLOSE_REASON_TOKEN_MISMATCH: &str = "Token mismatch";

/// The envelope the Server sends to the Proxy for one tunnelled call.
///
/// `headers` holds the lowercased (and redacted) headers of the originating
/// HTTP request; `body` is forwarded verbatim. The Server fills `request_id`
/// immediately before the frame goes out; the Proxy deserializes leniently
/// so a malformed peer cannot crash the pump.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelRequest {
    /// Correlation id, minted by the Server per call.
    pub request_id: Option<Uuid>,
    /// Lowercased headers of the originating request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// The forwarded request body.
    #[serde(default)]
    pub body: Value,
}

/// Error tags carried in the `error` field of error replies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorTag {
    /// A frame or body was not parseable as JSON.
    InvalidJson,
    /// A required fingerprint header was absent.
    MissingHeader,
    /// No route is configured for the requested operation type.
    RouteNotFound,
    /// Send-and-wait or gateway call exceeded its deadline.
    Timeout,
    /// The local gateway was unreachable.
    ConnectionRefused,
    /// The gateway answered with a non-2xx status.
    HttpError,
    /// The addressed kiosk is not registered.
    KioskNotFound,
    /// The addressed kiosk is registered but disabled.
    KioskDisabled,
    /// The addressed kiosk has no live tunnel connection.
    KioskOffline,
    /// A frame could not be processed for an uncategorised reason.
    ProcessingError,
    /// Any other failure.
    Other,
}

impl fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ErrorTag::InvalidJson => "invalid_json",
            ErrorTag::MissingHeader => "missing_header",
            ErrorTag::RouteNotFound => "route_not_found",
            ErrorTag::Timeout => "timeout",
            ErrorTag::ConnectionRefused => "connection_refused",
            ErrorTag::HttpError => "http_error",
            ErrorTag::KioskNotFound => "kiosk_not_found",
            ErrorTag::KioskDisabled => "kiosk_disabled",
            ErrorTag::KioskOffline => "kiosk_offline",
            ErrorTag::ProcessingError => "processing_error",
            ErrorTag::Other => "other",
        };
        f.write_str(tag)
    }
}

/// Builds an error reply envelope.
///
/// `request_id` is serialized as `null` when absent; the peer logs and
/// discards such orphan replies, but they are still well-formed frames.
pub fn error_reply(request_id: Option<Uuid>, tag: ErrorTag, message: impl fmt::Display) -> Value {
    json!({
        "request_id": request_id,
        "status": STATUS_ERROR,
        "error": tag,
        "message": message.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_reply_serializes_null_request_id() {
        let reply = error_reply(None, ErrorTag::InvalidJson, "Failed to parse JSON");
        assert!(reply["request_id"].is_null());
        assert_eq!(reply["status"], "error");
        assert_eq!(reply["error"], "invalid_json");
    }

    #[test]
    fn error_tag_display_matches_wire_form() {
        let tag = ErrorTag::RouteNotFound;
        assert_eq!(tag.to_string(), "route_not_found");
        assert_eq!(serde_json::to_value(tag).unwrap(), "route_not_found");
    }

    #[test]
    fn tunnel_request_tolerates_missing_members() {
        let req: TunnelRequest = serde_json::from_str(r#"{"request_id":null}"#).unwrap();
        assert!(req.request_id.is_none());
        assert!(req.headers.is_empty());
        assert!(req.body.is_null());
    }
}
