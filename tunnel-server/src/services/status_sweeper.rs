//! Background reconciliation of registry status with the connection table.
//!
//! A crash between socket teardown and the registry write can leave a kiosk
//! marked online with no live socket. The sweeper periodically flags such
//! kiosks as stale so operators see the drift; the next successful handshake
//! marks them online again.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::services::{connection_manager::ConnectionManager, registry::RegistryService};

pub(crate) struct StatusSweeperTaskArgs {
    pub(crate) registry: RegistryService,
    pub(crate) connection_manager: Arc<ConnectionManager>,
    pub(crate) interval: Duration,
    pub(crate) cancellation_token: CancellationToken,
}

/// Background task that marks drifted kiosks stale until cancelled.
pub(crate) async fn status_sweeper_task(args: StatusSweeperTaskArgs) -> eyre::Result<()> {
    let StatusSweeperTaskArgs {
        registry,
        connection_manager,
        interval,
        cancellation_token,
    } = args;
    let mut ticker = tokio::time::interval(interval);
    // interval yields immediately once, swallow that tick
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancellation_token.cancelled() => {
                tracing::info!("status sweeper stopped");
                return Ok(());
            }
        }
        let online = match registry.online_kiosks().await {
            Ok(online) => online,
            Err(err) => {
                tracing::error!("status sweeper could not list online kiosks: {err:?}");
                continue;
            }
        };
        for kiosk_id in online {
            if !connection_manager.is_connected(&kiosk_id) {
                tracing::warn!("kiosk {kiosk_id} is marked online but has no connection");
                if let Err(err) = registry.mark_stale(&kiosk_id).await {
                    tracing::error!("could not mark kiosk {kiosk_id} stale: {err:?}");
                }
            }
        }
    }
}
