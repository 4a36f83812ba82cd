//! freshness.rs
//! Single-slot, latest-wins hand-off between the telemetry receive thread and
//! whoever displays or records frames.
//!
//! - `publish` never blocks on the consumer; an unread item is overwritten.
//! - `try_take` returns the newest unread item and clears the slot.
//! - One mutex guards the slot; there is no lock-free path.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct FreshnessBuffer<T> {
    slot: Mutex<Option<T>>,
    published: AtomicU64,
    overwritten: AtomicU64,
}

impl<T> FreshnessBuffer<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            published: AtomicU64::new(0),
            overwritten: AtomicU64::new(0),
        }
    }

    /// Stores `item`, discarding any unread one. Returns true if a stale item was dropped.
    pub fn publish(&self, item: T) -> bool {
        let stale = self.slot.lock().replace(item);
        self.published.fetch_add(1, Ordering::Relaxed);
        if stale.is_some() {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn try_take(&self) -> Option<T> {
        self.slot.lock().take()
    }

    pub fn has_pending(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Items that were replaced before anyone took them.
    pub fn overwritten_count(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }
}

impl<T> Default for FreshnessBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
