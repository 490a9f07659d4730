//! The table of live kiosk connections.
//!
//! The [`ConnectionManager`] owns every accepted kiosk socket. It guarantees
//! that at any instant at most one socket handle is held per kiosk, applies
//! the duplicate-connection policy atomically under the table lock, and
//! implements the send-and-wait protocol on top of the
//! [`CorrelationTable`](crate::services::correlation::CorrelationTable).
//!
//! A handle removed from the table is never picked up for a new send;
//! send-and-wait clones the handle under the lock and performs the
//! potentially long socket write outside of it, so an in-flight send on a
//! just-displaced handle is allowed to finish.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::{SinkExt as _, stream::SplitSink};
use parking_lot::Mutex;
use serde_json::Value;
use tunnel_types::{
    KioskId,
    registry::ConnectionEventKind,
    wire::{CLOSE_REASON_ALREADY_CONNECTED, CLOSE_REASON_REPLACED, TunnelRequest},
};
use uuid::Uuid;

use crate::{
    metrics::{
        METRICS_ID_SERVER_ACTIVE_CONNECTIONS, METRICS_ID_SERVER_ERRORS,
        METRICS_ID_SERVER_MESSAGES_RECEIVED, METRICS_ID_SERVER_MESSAGES_SENT,
    },
    services::{correlation::CorrelationTable, registry::RegistryService},
    unix_now,
};

/// One live kiosk socket.
///
/// The write half lives behind an async mutex so the send-and-wait path and
/// the close paths serialize naturally; the read half stays with the receive
/// loop that accepted the socket.
#[derive(Clone)]
pub(crate) struct ConnectionHandle {
    conn_id: Uuid,
    sink: Arc<tokio::sync::Mutex<SplitSink<WebSocket, Message>>>,
    closed: Arc<AtomicBool>,
}

impl ConnectionHandle {
    pub(crate) fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            sink: Arc::new(tokio::sync::Mutex::new(sink)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Whether the socket is known to be unusable (receive loop exited or a
    /// replacement close was scheduled).
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    async fn send_text(&self, frame: String) -> Result<(), axum::Error> {
        self.sink.lock().await.send(Message::text(frame)).await
    }

    /// Sends a close frame. Best effort, errors are ignored.
    pub(crate) async fn close(&self, code: u16, reason: &'static str) {
        self.mark_closed();
        let _ = self
            .sink
            .lock()
            .await
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })))
            .await;
    }
}

/// Outcome of installing a freshly accepted socket.
pub(crate) enum InstallOutcome {
    /// The socket is now the active connection for the kiosk.
    Installed {
        /// The displaced handle, if the kiosk was already connected.
        replaced: Option<ConnectionHandle>,
    },
    /// The kiosk already holds a live connection and duplicates are not
    /// allowed.
    Rejected,
}

/// Table of live kiosk sockets plus the correlation state for in-flight
/// requests.
pub struct ConnectionManager {
    active: Mutex<HashMap<KioskId, ConnectionHandle>>,
    correlation: CorrelationTable,
    registry: RegistryService,
    allow_duplicate: bool,
}

impl ConnectionManager {
    pub(crate) fn new(registry: RegistryService, allow_duplicate: bool) -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            correlation: CorrelationTable::default(),
            registry,
            allow_duplicate,
        }
    }

    /// Installs `handle` as the active connection for `kiosk_id`, applying
    /// the duplicate policy in one critical section.
    fn install(&self, kiosk_id: &KioskId, handle: ConnectionHandle) -> InstallOutcome {
        let mut active = self.active.lock();
        match active.get(kiosk_id) {
            Some(old) if !self.allow_duplicate && !old.is_closed() => InstallOutcome::Rejected,
            Some(_) => {
                let replaced = active.insert(kiosk_id.clone(), handle);
                InstallOutcome::Installed { replaced }
            }
            None => {
                active.insert(kiosk_id.clone(), handle);
                InstallOutcome::Installed { replaced: None }
            }
        }
    }

    /// Registers a freshly upgraded socket for `kiosk_id`.
    ///
    /// On acceptance the displaced connection (if any) receives a graceful
    /// close with code 1000; its receive loop terminates on the next read and
    /// calls [`disconnect`](Self::disconnect) with its own handle, which is a
    /// no-op because the table already holds the new one. On rejection the
    /// new socket is closed with code 1008 and the existing entry stays.
    pub(crate) async fn accept(
        &self,
        kiosk_id: &KioskId,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        match self.install(kiosk_id, handle.clone()) {
            InstallOutcome::Rejected => {
                tracing::warn!("duplicate connection attempt for kiosk {kiosk_id} - rejecting");
                handle
                    .close(close_code::POLICY, CLOSE_REASON_ALREADY_CONNECTED)
                    .await;
                None
            }
            InstallOutcome::Installed { replaced } => {
                if let Some(old) = replaced {
                    tracing::info!("kiosk {kiosk_id} reconnected - replacing old connection");
                    old.mark_closed();
                    tokio::spawn(async move {
                        old.close(close_code::NORMAL, CLOSE_REASON_REPLACED).await;
                    });
                    // the displaced socket's disconnect is a no-op, so the
                    // gauge must not move on a swap
                    ::metrics::gauge!(METRICS_ID_SERVER_ACTIVE_CONNECTIONS).decrement(1);
                }
                let now = unix_now();
                if let Err(err) = self.registry.mark_online(kiosk_id, now).await {
                    tracing::error!("could not mark kiosk {kiosk_id} online: {err:?}");
                }
                if let Err(err) = self
                    .registry
                    .append_connection_event(kiosk_id, ConnectionEventKind::Connected, now)
                    .await
                {
                    tracing::error!("could not log connection event for {kiosk_id}: {err:?}");
                }
                ::metrics::gauge!(METRICS_ID_SERVER_ACTIVE_CONNECTIONS).increment(1);
                tracing::info!("kiosk {kiosk_id} connected");
                Some(handle)
            }
        }
    }

    /// Removes the connection for `kiosk_id` if the table still holds
    /// `conn_id`. A stale handle (already replaced) is a no-op.
    pub(crate) async fn disconnect(&self, kiosk_id: &KioskId, conn_id: Uuid) {
        let removed = {
            let mut active = self.active.lock();
            match active.get(kiosk_id) {
                Some(current) if current.conn_id() == conn_id => active.remove(kiosk_id),
                _ => None,
            }
        };
        match removed {
            Some(handle) => {
                handle.mark_closed();
                if let Err(err) = self.registry.mark_offline(kiosk_id).await {
                    tracing::error!("could not mark kiosk {kiosk_id} offline: {err:?}");
                }
                if let Err(err) = self
                    .registry
                    .append_connection_event(kiosk_id, ConnectionEventKind::Disconnected, unix_now())
                    .await
                {
                    tracing::error!("could not log disconnection event for {kiosk_id}: {err:?}");
                }
                ::metrics::gauge!(METRICS_ID_SERVER_ACTIVE_CONNECTIONS).decrement(1);
                tracing::info!("kiosk {kiosk_id} disconnected");
            }
            None => {
                tracing::debug!("skipping disconnect for {kiosk_id} - not the current connection");
            }
        }
    }

    /// Whether the kiosk currently holds a live connection.
    pub fn is_connected(&self, kiosk_id: &KioskId) -> bool {
        self.active.lock().contains_key(kiosk_id)
    }

    /// Number of live connections.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Sends `envelope` to the kiosk and waits for the correlated reply.
    ///
    /// Returns `None` if the kiosk holds no connection, the send fails, or
    /// the reply does not arrive within `timeout`. The correlation slot is
    /// removed on every exit path; a reply arriving later is discarded.
    pub async fn send_and_wait(
        &self,
        kiosk_id: &KioskId,
        mut envelope: TunnelRequest,
        timeout: Duration,
    ) -> Option<Value> {
        let handle = self.active.lock().get(kiosk_id).cloned();
        let Some(handle) = handle else {
            tracing::warn!("kiosk {kiosk_id} not connected");
            return None;
        };

        let request_id = Uuid::new_v4();
        envelope.request_id = Some(request_id);
        let frame = serde_json::to_string(&envelope).expect("envelope serializes");

        let rx = self.correlation.install(request_id);

        if let Err(err) = handle.send_text(frame).await {
            tracing::error!("error sending to kiosk {kiosk_id}: {err:?}");
            ::metrics::counter!(METRICS_ID_SERVER_ERRORS, "error" => "send_error").increment(1);
            self.correlation.remove(request_id);
            return None;
        }
        ::metrics::counter!(METRICS_ID_SERVER_MESSAGES_SENT).increment(1);
        tracing::debug!("request {request_id} sent to kiosk {kiosk_id}");

        let result = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => {
                ::metrics::counter!(METRICS_ID_SERVER_MESSAGES_RECEIVED).increment(1);
                tracing::debug!("response for {request_id} received from kiosk {kiosk_id}");
                Some(response)
            }
            Ok(Err(_)) => {
                // slot was cancelled underneath us (shutdown)
                tracing::debug!("request {request_id} cancelled");
                None
            }
            Err(_) => {
                tracing::error!(
                    "kiosk {kiosk_id} did not answer request {request_id} within {timeout:?}"
                );
                ::metrics::counter!(METRICS_ID_SERVER_ERRORS, "error" => "timeout").increment(1);
                None
            }
        };
        self.correlation.remove(request_id);
        result
    }

    /// Dispatches one reply frame from a kiosk into the correlation table.
    ///
    /// Frames without a known `request_id` are logged and discarded.
    pub(crate) fn handle_reply(&self, kiosk_id: &KioskId, reply: Value) {
        let request_id = reply
            .get("request_id")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok());
        let Some(request_id) = request_id else {
            tracing::warn!("kiosk {kiosk_id} sent a reply without request_id - discarding");
            return;
        };
        if !self.correlation.try_complete(request_id, reply) {
            tracing::warn!("kiosk {kiosk_id} sent reply for unknown request {request_id}");
        }
    }

    /// Closes all connections with code 1000 and cancels every in-flight
    /// send-and-wait. Part of graceful shutdown.
    pub async fn shutdown(&self) {
        let drained = std::mem::take(&mut *self.active.lock());
        for (kiosk_id, handle) in drained {
            tracing::info!("closing connection to kiosk {kiosk_id}");
            handle.close(close_code::NORMAL, "Server shutting down").await;
        }
        self.correlation.clear();
    }

    /// Number of in-flight tunnelled requests.
    pub fn pending_requests(&self) -> usize {
        self.correlation.len()
    }
}
