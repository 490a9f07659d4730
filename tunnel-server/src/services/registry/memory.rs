//! In-memory [`Registry`] implementation.
//!
//! Backs a single-process deployment and the test suites. Counters use
//! atomics so they stay monotonic under concurrent callers; record and
//! history access goes through a single mutex each.

use std::{
    collections::{HashMap, VecDeque},
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tunnel_types::{
    KioskId,
    registry::{ConnectionEvent, ConnectionEventKind, KioskInfo, KioskStatus, RegistryStats},
};

use crate::services::registry::{CONNECTION_HISTORY_LIMIT, Registry};

#[derive(Debug)]
struct KioskEntry {
    name: String,
    enabled: bool,
    token: String,
    status: KioskStatus,
    connected_at: Option<u64>,
}

/// Registry keeping everything in process memory.
#[derive(Default)]
pub struct MemoryRegistry {
    kiosks: Mutex<HashMap<KioskId, KioskEntry>>,
    history: Mutex<VecDeque<ConnectionEvent>>,
    requests_total: AtomicU64,
    errors_total: AtomicU64,
    latency: Mutex<LatencyAccumulator>,
}

#[derive(Debug, Default)]
struct LatencyAccumulator {
    sum: f64,
    count: u64,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn kiosk_exists(&self, id: &KioskId) -> eyre::Result<bool> {
        Ok(self.kiosks.lock().contains_key(id))
    }

    async fn is_kiosk_enabled(&self, id: &KioskId) -> eyre::Result<bool> {
        Ok(self.kiosks.lock().get(id).is_some_and(|k| k.enabled))
    }

    async fn stored_token(&self, id: &KioskId) -> eyre::Result<Option<String>> {
        Ok(self.kiosks.lock().get(id).map(|k| k.token.clone()))
    }

    async fn mark_online(&self, id: &KioskId, at: u64) -> eyre::Result<()> {
        if let Some(entry) = self.kiosks.lock().get_mut(id) {
            entry.status = KioskStatus::Online;
            entry.connected_at = Some(at);
        }
        Ok(())
    }

    async fn mark_offline(&self, id: &KioskId) -> eyre::Result<()> {
        if let Some(entry) = self.kiosks.lock().get_mut(id) {
            entry.status = KioskStatus::Offline;
            entry.connected_at = None;
        }
        Ok(())
    }

    async fn mark_stale(&self, id: &KioskId) -> eyre::Result<()> {
        if let Some(entry) = self.kiosks.lock().get_mut(id) {
            entry.status = KioskStatus::Stale;
        }
        Ok(())
    }

    async fn append_connection_event(
        &self,
        id: &KioskId,
        kind: ConnectionEventKind,
        at: u64,
    ) -> eyre::Result<()> {
        let mut history = self.history.lock();
        history.push_back(ConnectionEvent {
            kiosk_id: id.clone(),
            event: kind,
            timestamp: at,
        });
        while history.len() > CONNECTION_HISTORY_LIMIT {
            history.pop_front();
        }
        Ok(())
    }

    async fn increment_requests(&self) -> eyre::Result<()> {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn increment_errors(&self) -> eyre::Result<()> {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn add_latency_sample(&self, seconds: f64) -> eyre::Result<()> {
        let mut latency = self.latency.lock();
        latency.sum += seconds;
        latency.count += 1;
        Ok(())
    }

    async fn all_kiosks(&self) -> eyre::Result<Vec<KioskInfo>> {
        let mut kiosks = self
            .kiosks
            .lock()
            .iter()
            .map(|(id, entry)| KioskInfo {
                id: id.clone(),
                name: entry.name.clone(),
                enabled: entry.enabled,
                status: entry.status,
                connected_at: entry.connected_at,
            })
            .collect::<Vec<_>>();
        kiosks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(kiosks)
    }

    async fn online_kiosks(&self) -> eyre::Result<Vec<KioskId>> {
        Ok(self
            .kiosks
            .lock()
            .iter()
            .filter(|(_, entry)| entry.status == KioskStatus::Online)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn connection_history(&self, limit: usize) -> eyre::Result<Vec<ConnectionEvent>> {
        Ok(self
            .history
            .lock()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn stats(&self) -> eyre::Result<RegistryStats> {
        let latency = self.latency.lock();
        let avg_latency = if latency.count > 0 {
            latency.sum / latency.count as f64
        } else {
            0.0
        };
        Ok(RegistryStats {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            avg_latency,
        })
    }

    async fn create_kiosk(&self, id: &KioskId, name: &str, token: &str) -> eyre::Result<()> {
        self.kiosks.lock().insert(
            id.clone(),
            KioskEntry {
                name: if name.is_empty() {
                    id.to_string()
                } else {
                    name.to_owned()
                },
                enabled: true,
                token: token.to_owned(),
                status: KioskStatus::Offline,
                connected_at: None,
            },
        );
        Ok(())
    }

    async fn set_kiosk_enabled(&self, id: &KioskId, enabled: bool) -> eyre::Result<bool> {
        match self.kiosks.lock().get_mut(id) {
            Some(entry) => {
                entry.enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connection_history_is_bounded() {
        let registry = MemoryRegistry::new();
        let kiosk = KioskId::from("K1");
        for at in 0..150 {
            registry
                .append_connection_event(&kiosk, ConnectionEventKind::Connected, at)
                .await
                .unwrap();
        }
        let history = registry.connection_history(usize::MAX).await.unwrap();
        assert_eq!(history.len(), CONNECTION_HISTORY_LIMIT);
        // newest first
        assert_eq!(history[0].timestamp, 149);
        assert_eq!(history.last().unwrap().timestamp, 50);
    }

    #[tokio::test]
    async fn unknown_kiosk_is_disabled_and_absent() {
        let registry = MemoryRegistry::new();
        let kiosk = KioskId::from("ghost");
        assert!(!registry.kiosk_exists(&kiosk).await.unwrap());
        assert!(!registry.is_kiosk_enabled(&kiosk).await.unwrap());
        assert_eq!(registry.stored_token(&kiosk).await.unwrap(), None);
    }

    #[tokio::test]
    async fn latency_average_over_samples() {
        let registry = MemoryRegistry::new();
        registry.add_latency_sample(0.1).await.unwrap();
        registry.add_latency_sample(0.3).await.unwrap();
        let stats = registry.stats().await.unwrap();
        assert!((stats.avg_latency - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn status_transitions() {
        let registry = MemoryRegistry::new();
        let kiosk = KioskId::from("K1");
        registry.create_kiosk(&kiosk, "", "tok").await.unwrap();
        registry.mark_online(&kiosk, 42).await.unwrap();
        assert_eq!(registry.online_kiosks().await.unwrap(), vec![kiosk.clone()]);

        registry.mark_stale(&kiosk).await.unwrap();
        assert!(registry.online_kiosks().await.unwrap().is_empty());

        registry.mark_offline(&kiosk).await.unwrap();
        let info = registry.all_kiosks().await.unwrap().remove(0);
        assert_eq!(info.status, KioskStatus::Offline);
        assert_eq!(info.connected_at, None);
    }
}
