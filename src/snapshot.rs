//! Published snapshot slot and working copies.
//!
//! The published container is logically immutable. Readers take a shared
//! handle through an atomic load; the update driver owns a mutable working
//! copy exclusively until it publishes, so no lock guards the hot path.

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::updater::UpdateKind;

/// Holder of the currently published snapshot.
///
/// Publication is an atomic pointer exchange: readers that already hold a
/// handle keep observing the previous snapshot until they drop it, readers
/// arriving afterwards observe the new one.
#[derive(Debug, Default)]
pub struct SnapshotHolder<T> {
    slot: ArcSwapOption<T>,
}

impl<T> SnapshotHolder<T> {
    pub fn new() -> Self {
        Self {
            slot: ArcSwapOption::const_empty(),
        }
    }

    /// The currently published snapshot, or `None` before the first
    /// successful update.
    pub fn current(&self) -> Option<Arc<T>> {
        self.slot.load_full()
    }

    /// Atomically publish `working`, returning the shared handle.
    pub fn publish(&self, working: T) -> Arc<T> {
        let snapshot = Arc::new(working);
        self.slot.store(Some(Arc::clone(&snapshot)));
        snapshot
    }
}

impl<T: Clone + Default> SnapshotHolder<T> {
    /// A fresh, exclusively owned container for the next update.
    ///
    /// Full updates start empty; incremental updates start from a deep copy
    /// of the published snapshot, or empty on cold start.
    pub fn working_copy(&self, kind: UpdateKind) -> T {
        if kind == UpdateKind::Incremental {
            if let Some(current) = self.current() {
                return T::clone(&current);
            }
        }
        T::default()
    }
}
