//! The message pump: one inbound tunnel frame in, one reply out.
//!
//! Every error path produces a well-formed reply envelope carrying the
//! originating `request_id` where one could be extracted; a frame that is
//! not even JSON is answered without a correlation id (the Server logs and
//! discards such orphans). The pump itself never fails - a bad frame must
//! not take the session down.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::instrument;
use tunnel_types::wire::{
    ErrorTag, HEADER_KIOSK_ID, HEADER_OPERATION_TYPE, TunnelRequest, error_reply,
};

use crate::{gateway::GatewayClient, routes::RoutingConfig, stats::ProxyStats};

/// Parses inbound frames, resolves routes and dispatches gateway calls.
pub struct MessagePump {
    routing: Arc<RoutingConfig>,
    gateway: GatewayClient,
    stats: Arc<ProxyStats>,
}

impl MessagePump {
    pub(crate) fn new(
        routing: Arc<RoutingConfig>,
        gateway: GatewayClient,
        stats: Arc<ProxyStats>,
    ) -> Self {
        Self {
            routing,
            gateway,
            stats,
        }
    }

    /// Processes one frame from the tunnel and returns the reply to send.
    #[instrument(level = "debug", skip_all, fields(request_id = tracing::field::Empty))]
    pub async fn handle_frame(&self, frame: &str) -> Value {
        let request: TunnelRequest = match serde_json::from_str(frame) {
            Ok(request) => request,
            Err(err) => {
                tracing::error!("invalid JSON from server: {err}");
                self.stats.inc_errors();
                return error_reply(
                    None,
                    ErrorTag::InvalidJson,
                    format!("Failed to parse JSON: {err}"),
                );
            }
        };
        self.stats.inc_received();

        let request_id = request.request_id;
        match request_id {
            Some(id) => {
                tracing::Span::current().record("request_id", id.to_string());
            }
            None => {
                tracing::warn!("message without request_id - cannot correlate response");
            }
        }

        let kiosk_id = request.headers.get(HEADER_KIOSK_ID).map(String::as_str);
        let operation_type = request
            .headers
            .get(HEADER_OPERATION_TYPE)
            .map(String::as_str);
        tracing::info!(
            "received {} for kiosk {}",
            operation_type.unwrap_or("unknown"),
            kiosk_id.unwrap_or("unknown"),
        );

        let Some(operation_type) = operation_type else {
            tracing::error!("missing Header-Operation-Type");
            return error_reply(
                request_id,
                ErrorTag::MissingHeader,
                "Header-Operation-Type is required",
            );
        };

        let Some(route) = self.routing.resolve(operation_type) else {
            tracing::error!("route not found for operation type: {operation_type}");
            self.stats.inc_errors();
            return error_reply(
                request_id,
                ErrorTag::RouteNotFound,
                format!("No route configured for operation type: {operation_type}"),
            );
        };

        match self
            .gateway
            .dispatch(route, &request.headers, &request.body)
            .await
        {
            Ok(mut reply) => match reply.as_object_mut() {
                Some(object) => {
                    // correlation only works if the id survives the gateway
                    object.insert("request_id".to_owned(), json!(request_id));
                    reply
                }
                None => {
                    tracing::error!("gateway returned a non-object JSON value");
                    self.stats.inc_errors();
                    error_reply(
                        request_id,
                        ErrorTag::ProcessingError,
                        "gateway response is not a JSON object",
                    )
                }
            },
            Err(err) => {
                tracing::error!("gateway dispatch failed: {err}");
                self.stats.inc_errors();
                err.into_reply(request_id)
            }
        }
    }
}
