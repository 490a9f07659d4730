//! Metrics definitions for the tunnel server.
//!
//! All metric keys live here as constants so instrumentation sites and the
//! exposition endpoint agree on names; [`describe_metrics`] registers the
//! unit and help text for each of them once at startup.

/// Metrics key for the number of live kiosk connections.
pub const METRICS_ID_SERVER_ACTIVE_CONNECTIONS: &str = "kiosk.tunnel.server.connections.active";
/// Metrics key for the number of in-flight tunnelled requests.
pub const METRICS_ID_SERVER_PENDING_REQUESTS: &str = "kiosk.tunnel.server.requests.pending";
/// Metrics key for frames sent to kiosks.
pub const METRICS_ID_SERVER_MESSAGES_SENT: &str = "kiosk.tunnel.server.messages.sent";
/// Metrics key for reply frames matched to a waiting caller.
pub const METRICS_ID_SERVER_MESSAGES_RECEIVED: &str = "kiosk.tunnel.server.messages.received";
/// Metrics key for tunnel errors, labelled by error tag.
pub const METRICS_ID_SERVER_ERRORS: &str = "kiosk.tunnel.server.errors";
/// Metrics key for the round-trip duration of tunnelled calls.
pub const METRICS_ID_SERVER_REQUEST_DURATION: &str = "kiosk.tunnel.server.request.duration";
/// Metrics key for the number of registered kiosks.
pub const METRICS_ID_SERVER_TOTAL_KIOSKS: &str = "kiosk.tunnel.server.kiosks.total";

/// Registers unit and help text for every metric the server emits.
pub fn describe_metrics() {
    metrics::describe_gauge!(
        METRICS_ID_SERVER_ACTIVE_CONNECTIONS,
        metrics::Unit::Count,
        "Number of live kiosk connections"
    );

    metrics::describe_gauge!(
        METRICS_ID_SERVER_PENDING_REQUESTS,
        metrics::Unit::Count,
        "Number of in-flight tunnelled requests"
    );

    metrics::describe_counter!(
        METRICS_ID_SERVER_MESSAGES_SENT,
        metrics::Unit::Count,
        "Number of request frames sent to kiosks"
    );

    metrics::describe_counter!(
        METRICS_ID_SERVER_MESSAGES_RECEIVED,
        metrics::Unit::Count,
        "Number of reply frames matched to a waiting caller"
    );

    metrics::describe_counter!(
        METRICS_ID_SERVER_ERRORS,
        metrics::Unit::Count,
        "Number of tunnel errors by tag"
    );

    metrics::describe_histogram!(
        METRICS_ID_SERVER_REQUEST_DURATION,
        metrics::Unit::Seconds,
        "Round-trip duration of tunnelled calls"
    );

    metrics::describe_gauge!(
        METRICS_ID_SERVER_TOTAL_KIOSKS,
        metrics::Unit::Count,
        "Number of registered kiosks"
    );
}
