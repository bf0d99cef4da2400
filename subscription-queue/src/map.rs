use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use crate::queue::once;
use crate::{Done, Subscription, SubscriptionQueue, lock};

/// A set of [`SubscriptionQueue`]s partitioned by key.
///
/// Queues are created the first time a key is subscribed to and are kept for the lifetime of
/// the map, even once they become empty.
pub struct SubscriptionQueueMap<K, V> {
    queues: Mutex<HashMap<K, SubscriptionQueue<V>>>,
}

impl<K, V> Default for SubscriptionQueueMap<K, V> {
    fn default() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: std::fmt::Debug, V> std::fmt::Debug for SubscriptionQueueMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queues = lock(&self.queues);
        f.debug_map()
            .entries(queues.iter().map(|(key, queue)| (key, queue.len())))
            .finish()
    }
}

impl<K, V> SubscriptionQueueMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether every queue in the map is empty.
    pub fn is_empty(&self) -> bool {
        lock(&self.queues).values().all(SubscriptionQueue::is_empty)
    }
}

impl<K: Eq + Hash + Clone, V: 'static> SubscriptionQueueMap<K, V> {
    fn queue_for(&self, key: &K) -> SubscriptionQueue<V> {
        let mut queues = lock(&self.queues);
        if let Some(queue) = queues.get(key) {
            return queue.clone();
        }
        let queue = SubscriptionQueue::new();
        queues.insert(key.clone(), queue.clone());
        queue
    }

    fn existing(&self, key: &K) -> Option<SubscriptionQueue<V>> {
        lock(&self.queues).get(key).cloned()
    }

    pub fn queue(&self, key: &K, handler: impl FnMut(&V, &Done) + Send + 'static) -> Subscription<V> {
        self.queue_for(key).queue(handler)
    }

    pub fn queue_with_completion(
        &self,
        key: &K,
        handler: impl FnMut(&V, &Done) + Send + 'static,
        completion: impl FnOnce() + Send + 'static,
    ) -> Subscription<V> {
        self.queue_for(key).queue_with_completion(handler, completion)
    }

    /// See [`SubscriptionQueue::queue_once`].
    pub fn queue_once<T: 'static>(
        &self,
        key: &K,
        matcher: impl FnMut(&V) -> Option<T> + Send + 'static,
        completion: impl FnOnce(T) + Send + 'static,
    ) -> Subscription<V> {
        self.queue_for(key).queue(once(matcher, completion))
    }

    /// Delivers `value` to the queue for `key`. Does nothing if no one ever subscribed to `key`.
    pub fn receive(&self, key: &K, value: &V) {
        if let Some(queue) = self.existing(key) {
            queue.receive(value);
        }
    }

    /// Delivers `value` to every queue in the map.
    pub fn receive_all(&self, value: &V) {
        let queues: Vec<_> = lock(&self.queues).values().cloned().collect();
        for queue in queues {
            queue.receive(value);
        }
    }
}
