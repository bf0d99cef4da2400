use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use crate::util::lock;

#[derive(Debug, Default, Clone, Copy)]
struct Demand {
    external: bool,
    internal: usize,
}

impl Demand {
    fn is_notifying(&self) -> bool {
        self.external || self.internal > 0
    }
}

/// Tracks who wants notifications enabled for each key.
///
/// A key should be notifying while either the application asked for it explicitly (the
/// external flag) or at least one value stream depends on it (the internal count).
#[derive(Debug)]
pub struct NotifyingTracker<K> {
    demand: Mutex<HashMap<K, Demand>>,
}

impl<K> Default for NotifyingTracker<K> {
    fn default() -> Self {
        Self {
            demand: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash> NotifyingTracker<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the application's explicit request and returns the combined state.
    pub fn set_external(&self, value: bool, key: K) -> bool {
        let mut demand = lock(&self.demand);
        let entry = demand.entry(key).or_default();
        entry.external = value;
        entry.is_notifying()
    }

    pub fn add_internal(&self, key: K) {
        lock(&self.demand).entry(key).or_default().internal += 1;
    }

    /// Releases one internal consumer and returns the combined state. The count never goes
    /// below zero.
    pub fn remove_internal(&self, key: K) -> bool {
        let mut demand = lock(&self.demand);
        let entry = demand.entry(key).or_default();
        entry.internal = entry.internal.saturating_sub(1);
        entry.is_notifying()
    }

    pub fn is_notifying(&self, key: &K) -> bool {
        lock(&self.demand)
            .get(key)
            .is_some_and(Demand::is_notifying)
    }

    /// Whether the application itself asked for `key` to notify.
    pub fn is_external(&self, key: &K) -> bool {
        lock(&self.demand)
            .get(key)
            .is_some_and(|demand| demand.external)
    }
}
