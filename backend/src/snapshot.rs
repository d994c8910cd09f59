//! Atomically replaceable shared snapshots.

use std::sync::Arc;

use parking_lot::RwLock;

/// Holds the current version of a read-only value.
///
/// Readers take a cheap `Arc` clone and keep using it for as long as they
/// like; a writer swaps in a complete new value. Nothing is mutated in place.
#[derive(Debug, Default)]
pub struct SnapshotCell<T> {
    current: RwLock<Arc<T>>,
}

impl<T> SnapshotCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(value)),
        }
    }

    /// The snapshot current at the time of the call.
    pub fn load(&self) -> Arc<T> {
        Arc::clone(&self.current.read())
    }

    /// Publishes `value`, returning the snapshot it replaced.
    pub fn store(&self, value: T) -> Arc<T> {
        self.store_arc(Arc::new(value))
    }

    pub fn store_arc(&self, value: Arc<T>) -> Arc<T> {
        std::mem::replace(&mut *self.current.write(), value)
    }
}
