//! Bounded FIFO of reply frames waiting for the tunnel to come back.
//!
//! Payments degrade gracefully rather than pause arbitrarily: when the queue
//! is full, the newest frame is dropped and counted as an error instead of
//! blocking the pump.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Maximum number of frames held while the tunnel is down.
pub const OFFLINE_QUEUE_CAPACITY: usize = 10;

/// The offline queue. All operations are non-blocking.
#[derive(Debug, Default)]
pub struct OfflineQueue(Mutex<VecDeque<String>>);

impl OfflineQueue {
    /// Appends a frame. Returns `false` when the queue is full and the frame
    /// was dropped.
    pub(crate) fn push_back(&self, frame: String) -> bool {
        let mut queue = self.0.lock();
        if queue.len() >= OFFLINE_QUEUE_CAPACITY {
            return false;
        }
        queue.push_back(frame);
        true
    }

    /// Puts a frame back at the head after a failed flush send. Best effort:
    /// a full queue drops the frame.
    pub(crate) fn push_front(&self, frame: String) -> bool {
        let mut queue = self.0.lock();
        if queue.len() >= OFFLINE_QUEUE_CAPACITY {
            return false;
        }
        queue.push_front(frame);
        true
    }

    /// Takes the oldest frame.
    pub(crate) fn pop_front(&self) -> Option<String> {
        self.0.lock().pop_front()
    }

    /// Number of queued frames.
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// Whether the queue holds no frames.
    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}
