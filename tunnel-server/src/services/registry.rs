//! Registry interface for kiosk metadata and counters.
//!
//! This module defines the [`Registry`] trait, which persists kiosk records
//! (existence, enabled flag, stored credential, connection status, bounded
//! connection history) and the aggregate request counters. Every operation
//! is asynchronous and may fail transiently.
//!
//! The only built-in backend is [`memory::MemoryRegistry`]; a durable store
//! plugs in behind the same trait without touching the tunnelling core.

use std::sync::Arc;

use async_trait::async_trait;
use tunnel_types::{
    KioskId,
    registry::{ConnectionEvent, ConnectionEventKind, KioskInfo, RegistryStats},
};

pub mod memory;

/// Number of connection events the registry keeps.
pub const CONNECTION_HISTORY_LIMIT: usize = 100;

/// Shared handle to whichever registry backend the server was wired with.
pub type RegistryService = Arc<dyn Registry + Send + Sync>;

/// Storage interface for kiosk metadata and counters.
#[async_trait]
pub trait Registry {
    /// Returns whether a kiosk with this id is registered.
    async fn kiosk_exists(&self, id: &KioskId) -> eyre::Result<bool>;

    /// Returns whether the kiosk is enabled. Unknown kiosks are disabled.
    async fn is_kiosk_enabled(&self, id: &KioskId) -> eyre::Result<bool>;

    /// Returns the stored credential for the kiosk, if any.
    async fn stored_token(&self, id: &KioskId) -> eyre::Result<Option<String>>;

    /// Marks the kiosk online and records the connection timestamp.
    async fn mark_online(&self, id: &KioskId, at: u64) -> eyre::Result<()>;

    /// Marks the kiosk offline and clears the connection timestamp.
    async fn mark_offline(&self, id: &KioskId) -> eyre::Result<()>;

    /// Marks the kiosk connection as stale (registry and connection table
    /// disagree).
    async fn mark_stale(&self, id: &KioskId) -> eyre::Result<()>;

    /// Appends a connection event to the bounded history.
    async fn append_connection_event(
        &self,
        id: &KioskId,
        kind: ConnectionEventKind,
        at: u64,
    ) -> eyre::Result<()>;

    /// Increments the total request counter. Monotonic under concurrent
    /// callers.
    async fn increment_requests(&self) -> eyre::Result<()>;

    /// Increments the total error counter. Monotonic under concurrent
    /// callers.
    async fn increment_errors(&self) -> eyre::Result<()>;

    /// Records one request latency sample.
    async fn add_latency_sample(&self, seconds: f64) -> eyre::Result<()>;

    /// Returns all registered kiosks with their current status.
    async fn all_kiosks(&self) -> eyre::Result<Vec<KioskInfo>>;

    /// Returns the ids of all kiosks currently marked online.
    async fn online_kiosks(&self) -> eyre::Result<Vec<KioskId>>;

    /// Returns the most recent connection events, newest first.
    async fn connection_history(&self, limit: usize) -> eyre::Result<Vec<ConnectionEvent>>;

    /// Returns the aggregate counters.
    async fn stats(&self) -> eyre::Result<RegistryStats>;

    /// Registers a new kiosk with its credential. Used by provisioning and
    /// tests; the administrative surface on top is out of scope here.
    async fn create_kiosk(&self, id: &KioskId, name: &str, token: &str) -> eyre::Result<()>;

    /// Enables or disables a kiosk. Returns `false` if the kiosk is unknown.
    async fn set_kiosk_enabled(&self, id: &KioskId, enabled: bool) -> eyre::Result<bool>;
}
