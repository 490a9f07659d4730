//! HTTP dispatch to the local payment gateway.
//!
//! One pooled `reqwest` client serves all routes. The HTTP method comes from
//! the forwarded `header-http-method` header (default `POST`): a `GET`
//! carries the message body URL-encoded as the query string and no body, any
//! other method sends the body as JSON. Failures map onto the wire error
//! tags so the pump can answer the Server without special-casing.

use std::{collections::HashMap, time::Duration};

use reqwest::Method;
use serde_json::Value;
use tunnel_types::wire::{ErrorTag, HEADER_HTTP_METHOD};
use uuid::Uuid;

use crate::routes::RouteEntry;

const POOL_MAX_IDLE_PER_HOST: usize = 5;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// All errors a gateway dispatch may produce.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The gateway did not answer within the route's timeout.
    #[error("Gateway timeout after {0}s")]
    Timeout(u64),
    /// The gateway was unreachable (refused, DNS, socket).
    #[error("Cannot connect to gateway: {0}")]
    ConnectionRefused(String),
    /// The gateway answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// The HTTP status code.
        status: u16,
        /// The response body.
        body: String,
    },
    /// Anything else (bad method, non-JSON 2xx body, ...).
    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    /// The wire tag carried in the error reply.
    pub fn tag(&self) -> ErrorTag {
        match self {
            GatewayError::Timeout(_) => ErrorTag::Timeout,
            GatewayError::ConnectionRefused(_) => ErrorTag::ConnectionRefused,
            GatewayError::Http { .. } => ErrorTag::HttpError,
            GatewayError::Other(_) => ErrorTag::Other,
        }
    }

    /// Builds the reply envelope sent back over the tunnel.
    pub fn into_reply(self, request_id: Option<Uuid>) -> Value {
        tunnel_types::wire::error_reply(request_id, self.tag(), &self)
    }
}

/// Pooled HTTP client for the local gateway.
pub struct GatewayClient {
    client: reqwest::Client,
}

impl GatewayClient {
    /// Creates the client with a bounded connection pool.
    pub fn new() -> eyre::Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    /// Dispatches one message to the gateway and returns the parsed JSON
    /// response body.
    pub async fn dispatch(
        &self,
        route: &RouteEntry,
        headers: &HashMap<String, String>,
        body: &Value,
    ) -> Result<Value, GatewayError> {
        let method = headers
            .get(HEADER_HTTP_METHOD)
            .map(|raw| raw.to_ascii_uppercase())
            .unwrap_or_else(|| "POST".to_owned());
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| GatewayError::Other(format!("invalid HTTP method: {method}")))?;

        tracing::info!("{method} {}", route.url);
        let request = if method == Method::GET {
            self.client.get(&route.url).query(&query_pairs(body))
        } else {
            self.client.request(method, &route.url).json(body)
        };

        let response = request
            .timeout(Duration::from_secs(route.timeout))
            .send()
            .await
            .map_err(|err| classify(err, route.timeout))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!("gateway response: {status}");
            response
                .json()
                .await
                .map_err(|err| GatewayError::Other(err.to_string()))
        } else {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("gateway error: {status}");
            Err(GatewayError::Http {
                status: status.as_u16(),
                body,
            })
        }
    }
}

fn classify(err: reqwest::Error, timeout_secs: u64) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout(timeout_secs)
    } else if err.is_connect() {
        GatewayError::ConnectionRefused(err.to_string())
    } else {
        GatewayError::Other(err.to_string())
    }
}

/// Flattens the body's top-level members into query pairs. String values go
/// in raw; everything else is encoded as its compact JSON text.
fn query_pairs(body: &Value) -> Vec<(String, String)> {
    let Some(object) = body.as_object() else {
        return Vec::new();
    };
    object
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn query_pairs_keeps_strings_raw() {
        let pairs = query_pairs(&json!({"a": "1", "b": "x y"}));
        assert!(pairs.contains(&("a".to_owned(), "1".to_owned())));
        assert!(pairs.contains(&("b".to_owned(), "x y".to_owned())));
    }

    #[test]
    fn query_pairs_serializes_non_strings() {
        let pairs = query_pairs(&json!({"sum": 100, "retry": true}));
        assert!(pairs.contains(&("sum".to_owned(), "100".to_owned())));
        assert!(pairs.contains(&("retry".to_owned(), "true".to_owned())));
    }

    #[test]
    fn query_pairs_of_non_object_body_is_empty() {
        assert!(query_pairs(&json!("scalar")).is_empty());
        assert!(query_pairs(&Value::Null).is_empty());
    }

    #[test]
    fn error_reply_carries_tag_and_message() {
        let reply = GatewayError::Http {
            status: 502,
            body: "bad gateway".to_owned(),
        }
        .into_reply(None);
        assert_eq!(reply["status"], "error");
        assert_eq!(reply["error"], "http_error");
        assert_eq!(reply["message"], "HTTP 502: bad gateway");
    }
}
