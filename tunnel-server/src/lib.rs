#![deny(missing_docs)]
//! Cloud side of the kiosk tunnel.
//!
//! Kiosks sit behind NAT and private LANs, so they dial out: every kiosk
//! keeps one persistent WebSocket to this server. An HTTP caller POSTs to
//! `/send` with a `header-kiosk-id` routing header; the server forwards the
//! request over the matching socket, correlates the kiosk's reply by a
//! server-minted request id, and returns it verbatim. Many requests may be
//! in flight concurrently, even to the same kiosk - correlation is by id
//! only, never by order.
//!
//! The main entry point for embedding is the [`TunnelServerBuilder`]. It
//! wires the connection manager, the registry and the credential verifier
//! together and returns an `axum::Router` to be served by the hosting
//! application, plus a `JoinHandle` for the background status sweeper.
//!
//! The provided `CancellationToken` stops the sweeper; the hosting
//! application is responsible for calling
//! [`ConnectionManager::shutdown`](services::connection_manager::ConnectionManager::shutdown)
//! once the token fires so live sockets receive a graceful close and
//! in-flight calls are cancelled.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::{
    config::ServerConfig,
    metrics::METRICS_ID_SERVER_ACTIVE_CONNECTIONS,
    services::{
        connection_manager::ConnectionManager,
        registry::RegistryService,
        status_sweeper::{StatusSweeperTaskArgs, status_sweeper_task},
        token_verifier::TokenVerifierService,
    },
};

pub(crate) mod api;
pub mod config;
pub mod metrics;
pub mod services;

/// Shared state handed to every API handler.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) connection_manager: Arc<ConnectionManager>,
    pub(crate) registry: RegistryService,
    pub(crate) token_verifier: TokenVerifierService,
    pub(crate) kiosk_response_timeout: std::time::Duration,
    pub(crate) ws_max_message_size: usize,
    pub(crate) metrics_handle: PrometheusHandle,
    pub(crate) started_at: u64,
}

/// [`TunnelServerBuilder`] to initialize the tunnel server.
pub struct TunnelServerBuilder {
    state: AppState,
    status_sweeper: tokio::task::JoinHandle<Result<(), eyre::Error>>,
}

impl TunnelServerBuilder {
    /// Initializes the tunnel server.
    ///
    /// Sets up the connection manager over the provided registry and
    /// credential verifier and spawns the background status sweeper. The
    /// sweeper stops when the `CancellationToken` is cancelled.
    pub fn init(
        config: &ServerConfig,
        registry: RegistryService,
        token_verifier: TokenVerifierService,
        metrics_handle: PrometheusHandle,
        cancellation_token: CancellationToken,
    ) -> Self {
        ::metrics::gauge!(METRICS_ID_SERVER_ACTIVE_CONNECTIONS).set(0);
        let connection_manager = Arc::new(ConnectionManager::new(
            Arc::clone(&registry),
            config.allow_duplicate_connections,
        ));

        tracing::info!("starting the status sweeper..");
        let status_sweeper = tokio::spawn(status_sweeper_task(StatusSweeperTaskArgs {
            registry: Arc::clone(&registry),
            connection_manager: Arc::clone(&connection_manager),
            interval: config.status_sweep_interval,
            cancellation_token,
        }));

        let state = AppState {
            connection_manager,
            registry,
            token_verifier,
            kiosk_response_timeout: config.kiosk_response_timeout,
            ws_max_message_size: config.ws_max_message_size,
            metrics_handle,
            started_at: unix_now(),
        };
        Self {
            state,
            status_sweeper,
        }
    }

    /// Returns the shared connection manager.
    ///
    /// The hosting application uses it to perform the final
    /// close-all-sockets step of a graceful shutdown.
    pub fn connection_manager(&self) -> Arc<ConnectionManager> {
        Arc::clone(&self.state.connection_manager)
    }

    /// Assembles the full `axum` [`Router`] and hands back the status
    /// sweeper's `JoinHandle` for the shutdown join.
    pub fn build(self) -> (Router, tokio::task::JoinHandle<eyre::Result<()>>) {
        let router = Router::new()
            .merge(api::health::routes(self.state.clone()))
            .merge(api::kiosks::routes(self.state.clone()))
            .merge(api::send::routes(self.state.clone()))
            .merge(api::ws::routes(self.state))
            .layer(TraceLayer::new_for_http());
        (router, self.status_sweeper)
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}
