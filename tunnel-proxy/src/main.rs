use std::process::ExitCode;

use clap::Parser as _;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tunnel_proxy::config::ProxyConfig;

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tunnel_proxy=debug,info")),
        )
        .init();

    let config = ProxyConfig::parse();
    tracing::info!("tunnel-proxy configuration: {config:#?}");

    let cancellation_token = CancellationToken::new();
    tokio::spawn({
        let cancellation_token = cancellation_token.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("shutdown signal received");
            cancellation_token.cancel();
        }
    });

    match tunnel_proxy::run(config, cancellation_token).await {
        Ok(()) => {
            tracing::info!("proxy stopped");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            tracing::error!("fatal: {err:?}");
            // the report is already on the log, a plain non-zero exit will do
            Ok(ExitCode::FAILURE)
        }
    }
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
