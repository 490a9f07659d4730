//! Correlation of tunnel replies with waiting callers.
//!
//! Every tunnelled call installs a single-shot completion slot keyed by its
//! `request_id`. The per-connection receive loop resolves the slot when the
//! matching reply frame arrives; the waiting caller is resumed exactly once
//! with either the reply or a timeout. A reply arriving after the slot was
//! removed is discarded without touching anything.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::metrics::METRICS_ID_SERVER_PENDING_REQUESTS;

/// Table of pending tunnelled calls.
#[derive(Default, Clone)]
pub(crate) struct CorrelationTable(Arc<Mutex<HashMap<Uuid, oneshot::Sender<Value>>>>);

impl CorrelationTable {
    /// Installs a fresh slot for `request_id` and returns the receiving end.
    ///
    /// The caller owns the receiver; the receive loop may only complete the
    /// slot, never retain it.
    pub(crate) fn install(&self, request_id: Uuid) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        self.0.lock().insert(request_id, tx);
        ::metrics::gauge!(METRICS_ID_SERVER_PENDING_REQUESTS).increment(1);
        rx
    }

    /// Resolves the slot for `request_id` with `value`.
    ///
    /// Returns `false` if no slot exists (late or unknown reply) or the
    /// waiting caller is already gone. Never blocks.
    pub(crate) fn try_complete(&self, request_id: Uuid, value: Value) -> bool {
        let Some(tx) = self.0.lock().remove(&request_id) else {
            return false;
        };
        ::metrics::gauge!(METRICS_ID_SERVER_PENDING_REQUESTS).decrement(1);
        tx.send(value).is_ok()
    }

    /// Removes the slot for `request_id`. Idempotent; called on every
    /// send-and-wait exit path.
    pub(crate) fn remove(&self, request_id: Uuid) {
        if self.0.lock().remove(&request_id).is_some() {
            ::metrics::gauge!(METRICS_ID_SERVER_PENDING_REQUESTS).decrement(1);
        }
    }

    /// Drops all slots, cancelling every waiting caller. Used on shutdown.
    pub(crate) fn clear(&self) {
        let drained = std::mem::take(&mut *self.0.lock());
        ::metrics::gauge!(METRICS_ID_SERVER_PENDING_REQUESTS).decrement(drained.len() as f64);
    }

    /// Number of pending slots.
    pub(crate) fn len(&self) -> usize {
        self.0.lock().len()
    }
}
