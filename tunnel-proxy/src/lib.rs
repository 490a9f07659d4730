#![deny(missing_docs)]
//! Kiosk side of the tunnel: bridges the cloud server to the local payment
//! gateway.
//!
//! The proxy keeps one outbound WebSocket to the tunnel server. Every
//! inbound frame is routed by its `header-operation-type` to a gateway
//! endpoint from the static routing table, dispatched as an HTTP call
//! (method-aware: `GET` converts the body to query parameters), and answered
//! over the same socket with the `request_id` preserved. While the tunnel is
//! down, replies accumulate in a small bounded queue and are flushed on
//! reconnect; the connection itself is re-established with exponential
//! backoff.
//!
//! [`run`] wires all components together and serves until the provided
//! `CancellationToken` fires.

use std::sync::{Arc, atomic::AtomicBool};

use eyre::Context as _;
use tokio_util::sync::CancellationToken;

use crate::{
    config::ProxyConfig,
    gateway::GatewayClient,
    health::HealthState,
    pump::MessagePump,
    queue::OfflineQueue,
    routes::RoutingConfig,
    session::{ReconnectorTaskArgs, ReplyRouter, reconnector_task},
    stats::ProxyStats,
};

pub mod config;
pub mod gateway;
pub mod health;
pub mod pump;
pub mod queue;
pub mod routes;
pub(crate) mod session;
pub mod stats;

/// Runs the proxy until the `CancellationToken` fires.
///
/// Loads the routing table, starts the loopback health endpoint and the
/// periodic statistics task, and drives the reconnect loop. Returns once a
/// graceful shutdown completes; a missing or invalid routing configuration
/// fails immediately.
pub async fn run(config: ProxyConfig, cancellation_token: CancellationToken) -> eyre::Result<()> {
    let routing = Arc::new(RoutingConfig::load(&config.routing_config)?);
    tracing::info!("routing config loaded with {} routes", routing.len());

    let config = Arc::new(config);
    let stats = Arc::new(ProxyStats::default());
    let queue = Arc::new(OfflineQueue::default());
    let connected = Arc::new(AtomicBool::new(false));
    let gateway = GatewayClient::new().context("while building gateway client")?;
    let pump = Arc::new(MessagePump::new(
        Arc::clone(&routing),
        gateway,
        Arc::clone(&stats),
    ));
    let router = Arc::new(ReplyRouter::new(Arc::clone(&queue), Arc::clone(&stats)));

    let health_listener = tokio::net::TcpListener::bind(config.health_bind_addr)
        .await
        .context("while binding health endpoint")?;
    match health_listener.local_addr() {
        Ok(addr) => tracing::info!("health endpoint on http://{addr}/health"),
        Err(err) => tracing::warn!("health listener has no local addr: {err}"),
    }
    let health_router = health::routes(HealthState::new(
        Arc::clone(&connected),
        Arc::clone(&stats),
        Arc::clone(&queue),
        routing.len(),
    ));
    let health_server = tokio::spawn({
        let cancellation_token = cancellation_token.clone();
        async move {
            let result = axum::serve(health_listener, health_router)
                .with_graceful_shutdown(async move { cancellation_token.cancelled().await })
                .await;
            if let Err(err) = result {
                tracing::error!("health server error: {err:?}");
            }
        }
    });

    let stats_task = tokio::spawn(stats::stats_report_task(
        Arc::clone(&stats),
        config.stats_interval,
        cancellation_token.clone(),
    ));

    let result = reconnector_task(ReconnectorTaskArgs {
        config: Arc::clone(&config),
        pump,
        router,
        queue: Arc::clone(&queue),
        stats: Arc::clone(&stats),
        connected,
        cancellation_token: cancellation_token.clone(),
    })
    .await;

    // remaining queued replies are discarded on shutdown
    if !queue.is_empty() {
        tracing::warn!("dropping {} undelivered queued messages", queue.len());
    }

    match tokio::time::timeout(config.max_wait_time_shutdown, async move {
        tokio::join!(health_server, stats_task)
    })
    .await
    {
        Ok(_) => tracing::info!("health server and stats task finished"),
        Err(_) => tracing::warn!(
            "background tasks did not finish within {:?}, abandoning them",
            config.max_wait_time_shutdown
        ),
    }

    stats::log_stats(&stats, "final statistics");
    result
}
