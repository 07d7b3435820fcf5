//! Published inventory shared between the scheduler and API readers.

use crate::media::Inventory;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Ticket taken before a scan starts; orders concurrent publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Generation(u64);

struct Published {
    generation: Generation,
    inventory: Arc<Inventory>,
}

/// Holds the current [`Inventory`] and replaces it as one value.
///
/// The lock is only held to clone or swap the pointer, so readers never wait
/// on a scan and always see either the previous or the next complete list.
pub struct SnapshotStore {
    current: RwLock<Published>,
    next: AtomicU64,
}

impl SnapshotStore {
    pub fn new(initial: Inventory) -> Self {
        Self {
            current: RwLock::new(Published {
                generation: Generation(0),
                inventory: Arc::new(initial),
            }),
            next: AtomicU64::new(1),
        }
    }

    pub fn load(&self) -> Arc<Inventory> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard.inventory)
    }

    /// Reserve a generation for a scan about to start.
    pub fn begin(&self) -> Generation {
        Generation(self.next.fetch_add(1, Ordering::SeqCst))
    }

    /// Publish `inventory` if no scan that started later has published yet.
    ///
    /// Returns whichever inventory is current afterwards.
    pub fn publish(&self, generation: Generation, inventory: Arc<Inventory>) -> Arc<Inventory> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if generation < guard.generation {
            tracing::debug!(
                stale = generation.0,
                current = guard.generation.0,
                "Discarding stale inventory"
            );
            return Arc::clone(&guard.inventory);
        }
        guard.generation = generation;
        guard.inventory = Arc::clone(&inventory);
        inventory
    }
}
impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(Inventory::default())
    }
}
