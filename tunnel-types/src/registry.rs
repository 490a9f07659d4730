//! Registry records describing kiosk state.
//!
//! These types are shared between the registry abstraction, the connection
//! manager and the read-only introspection endpoints.

use serde::{Deserialize, Serialize};

use crate::KioskId;

/// Connection status of a kiosk as recorded by the registry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KioskStatus {
    /// A live tunnel connection exists.
    Online,
    /// The registry believes the kiosk is online but the connection table
    /// disagrees.
    Stale,
    /// No tunnel connection.
    #[default]
    Offline,
}

/// A kiosk record as stored in the registry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KioskInfo {
    /// The kiosk identifier.
    pub id: KioskId,
    /// Human-readable display name.
    pub name: String,
    /// Disabled kiosks are rejected at handshake and routing time.
    pub enabled: bool,
    /// Current connection status.
    pub status: KioskStatus,
    /// Unix timestamp of the current connection, present while online.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<u64>,
}

/// Kind of a connection history entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionEventKind {
    /// A tunnel connection was accepted.
    Connected,
    /// A tunnel connection went away.
    Disconnected,
}

/// One entry of the bounded connection history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionEvent {
    /// The kiosk the event belongs to.
    pub kiosk_id: KioskId,
    /// Whether the kiosk connected or disconnected.
    pub event: ConnectionEventKind,
    /// Unix timestamp of the event.
    pub timestamp: u64,
}

/// Aggregated request counters kept by the registry.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Total tunnelled requests since the counters were created.
    pub requests_total: u64,
    /// Total errors since the counters were created.
    pub errors_total: u64,
    /// Average request latency in seconds.
    pub avg_latency: f64,
}
