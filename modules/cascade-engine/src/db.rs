//! The application state container.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cascade_common::Payload;
use serde_json::Value;
use tokio::sync::watch;

use crate::traits::StateStore;

/// Holds the single state snapshot and notifies watchers on every write.
pub struct AppDb {
    tx: watch::Sender<Payload>,
    writes: AtomicU64,
}

impl AppDb {
    pub fn new(initial: Value) -> Self {
        Self::from_shared(Arc::new(initial))
    }

    pub fn from_shared(initial: Payload) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx,
            writes: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> Payload {
        self.tx.borrow().clone()
    }

    /// A receiver that observes every subsequent write.
    pub fn subscribe(&self) -> watch::Receiver<Payload> {
        self.tx.subscribe()
    }

    /// Number of writes since creation.
    pub fn version(&self) -> u64 {
        self.writes.load(Ordering::Acquire)
    }
}

impl Default for AppDb {
    fn default() -> Self {
        Self::new(Value::Object(Default::default()))
    }
}

impl StateStore for AppDb {
    fn read(&self) -> Payload {
        self.snapshot()
    }

    fn write(&self, snapshot: Payload) {
        self.tx.send_replace(snapshot);
        self.writes.fetch_add(1, Ordering::AcqRel);
    }
}
