//! Delivery tracker
//!
//! Process-lifetime set of message ids the relay has already acted on.
//! Entries are never removed. The destination ledger stays authoritative:
//! losing this set on restart only costs an `isFulfilled` query per event.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

/// Thread-safe set of handled message ids.
///
/// Cloning is cheap and shares the underlying set, so one tracker can be
/// handed to both routes of a relay.
#[derive(Debug, Clone, Default)]
pub struct DeliveryTracker {
    inner: Arc<RwLock<HashSet<[u8; 32]>>>,
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the id has already been handled.
    pub fn contains(&self, id: &[u8; 32]) -> bool {
        match self.inner.read() {
            Ok(set) => set.contains(id),
            Err(poisoned) => poisoned.into_inner().contains(id),
        }
    }

    /// Record an id. Returns false if it was already present.
    pub fn insert(&self, id: [u8; 32]) -> bool {
        match self.inner.write() {
            Ok(mut set) => set.insert(id),
            Err(poisoned) => poisoned.into_inner().insert(id),
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(set) => set.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
