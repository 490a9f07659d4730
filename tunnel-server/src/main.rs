use std::{process::ExitCode, sync::Arc};

use clap::Parser as _;
use eyre::Context as _;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tunnel_server::{
    TunnelServerBuilder,
    config::ServerConfig,
    services::{
        registry::{RegistryService, memory::MemoryRegistry},
        token_verifier::JwtTokenVerifier,
    },
};

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tunnel_server=debug,info")),
        )
        .init();

    let config = ServerConfig::parse();

    let registry: RegistryService = Arc::new(MemoryRegistry::new());

    let result = start_service(config, registry, shutdown_signal()).await;
    match result {
        Ok(()) => {
            tracing::info!("server stopped");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            // log the report here and exit non-zero; bubbling it up as Err
            // would print the same chain a second time
            tracing::error!("{err:?}");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn start_service(
    config: ServerConfig,
    registry: RegistryService,
    shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
) -> eyre::Result<()> {
    tracing::info!("tunnel-server configuration: {config:#?}");

    tunnel_server::metrics::describe_metrics();
    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("while installing metrics recorder")?;

    let cancellation_token = CancellationToken::new();
    tokio::spawn({
        let cancellation_token = cancellation_token.clone();
        async move {
            shutdown_signal.await;
            tracing::info!("shutdown signal received");
            cancellation_token.cancel();
        }
    });

    let token_verifier = Arc::new(JwtTokenVerifier::new(&config.jwt_secret));

    tracing::info!("wiring services..");
    let builder = TunnelServerBuilder::init(
        &config,
        registry,
        token_verifier,
        metrics_handle,
        cancellation_token.clone(),
    );
    let connection_manager = builder.connection_manager();
    let (router, status_sweeper) = builder.build();

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .context("while binding listener")?;
    let serve_token = cancellation_token.clone();
    let server = tokio::spawn(async move {
        match listener.local_addr() {
            Ok(addr) => tracing::info!("listening on http://{addr}"),
            Err(err) => tracing::warn!("listener has no local addr: {err}"),
        }
        let graceful_token = serve_token.clone();
        let serve_result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { graceful_token.cancelled().await })
            .await;
        if let Err(err) = serve_result {
            tracing::error!("http server failed: {err:?}");
        }
        tracing::info!("http server stopped");
        // a serve failure takes the whole service down with it
        serve_token.cancel();
    });

    tracing::info!("startup complete, serving until shutdown");
    cancellation_token.cancelled().await;

    tracing::info!("closing kiosk connections..");
    connection_manager.shutdown().await;

    tracing::info!(
        "giving workers {:?} to wind down..",
        config.max_wait_time_shutdown
    );
    match tokio::time::timeout(config.max_wait_time_shutdown, async move {
        tokio::join!(server, status_sweeper)
    })
    .await
    {
        Ok(_) => tracing::info!("all workers stopped"),
        Err(_) => tracing::warn!("workers still busy after the grace period, exiting anyway"),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("can install ctrl-c handler");
    };
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("can install SIGTERM handler")
            .recv()
            .await;
    };
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
