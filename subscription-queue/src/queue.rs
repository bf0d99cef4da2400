use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, TryLockError, Weak};

use tracing::trace;

use crate::{Cancellable, lock};

type Handler<V> = Box<dyn FnMut(&V, &Done) + Send>;
type Completion = Box<dyn FnOnce() + Send>;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Opaque identity of a [`Subscription`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        SubscriptionId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Passed to a handler alongside each value.
///
/// Calling [`mark()`][Done::mark] removes the subscription after the handler returns.
#[derive(Debug, Default)]
pub struct Done {
    marked: Cell<bool>,
}

impl Done {
    pub fn mark(&self) {
        self.marked.set(true);
    }

    pub fn is_marked(&self) -> bool {
        self.marked.get()
    }
}

struct Entry<V> {
    id: SubscriptionId,
    live: AtomicBool,
    handler: Mutex<Option<Handler<V>>>,
    completion: Mutex<Option<Completion>>,
}

impl<V> Entry<V> {
    fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Runs the handler and reports whether it asked to be removed.
    fn deliver(&self, value: &V) -> bool {
        if !self.is_live() {
            return false;
        }

        let done = Done::default();
        let mut handler = lock(&self.handler);
        if let Some(handler) = handler.as_mut() {
            handler(value, &done);
        }

        // Cancelled from inside its own handler; `retire` could not take the lock.
        if !self.is_live() {
            *handler = None;
        }

        done.is_marked()
    }

    fn release_handler(&self) {
        match self.handler.try_lock() {
            Ok(mut handler) => *handler = None,
            Err(TryLockError::Poisoned(poisoned)) => *poisoned.into_inner() = None,
            // Currently delivering; `deliver` drops the handler once it returns.
            Err(TryLockError::WouldBlock) => (),
        }
    }
}

struct Inner<V> {
    items: Mutex<Vec<Arc<Entry<V>>>>,
}

fn retire<V>(entry: &Arc<Entry<V>>, queue: Option<&Inner<V>>) {
    if !entry.live.swap(false, Ordering::AcqRel) {
        return;
    }

    entry.release_handler();

    if let Some(queue) = queue {
        lock(&queue.items).retain(|item| !Arc::ptr_eq(item, entry));
    }

    trace!(id = ?entry.id, "subscription removed");

    let completion = lock(&entry.completion).take();
    if let Some(completion) = completion {
        completion();
    }
}

/// An ordered collection of subscriptions to values of type `V`.
///
/// Cloning a `SubscriptionQueue` produces another handle to the same queue.
pub struct SubscriptionQueue<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for SubscriptionQueue<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> Default for SubscriptionQueue<V> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl<V> std::fmt::Debug for SubscriptionQueue<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionQueue")
            .field("len", &self.len())
            .finish()
    }
}

impl<V> SubscriptionQueue<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no subscriptions are currently registered.
    pub fn is_empty(&self) -> bool {
        lock(&self.inner.items).is_empty()
    }

    /// The number of subscriptions currently registered.
    pub fn len(&self) -> usize {
        lock(&self.inner.items).len()
    }
}

impl<V: 'static> SubscriptionQueue<V> {
    /// Registers `handler` to be called with every value this queue receives.
    pub fn queue(&self, handler: impl FnMut(&V, &Done) + Send + 'static) -> Subscription<V> {
        self.register(Box::new(handler), None)
    }

    /// Registers `handler` with a `completion` that runs once when the subscription is removed.
    pub fn queue_with_completion(
        &self,
        handler: impl FnMut(&V, &Done) + Send + 'static,
        completion: impl FnOnce() + Send + 'static,
    ) -> Subscription<V> {
        self.register(Box::new(handler), Some(Box::new(completion)))
    }

    /// Registers a one-shot subscription.
    ///
    /// The first value for which `matcher` returns `Some` is passed to `completion` and the
    /// subscription is removed. Values for which `matcher` returns `None` are ignored.
    pub fn queue_once<T: 'static>(
        &self,
        matcher: impl FnMut(&V) -> Option<T> + Send + 'static,
        completion: impl FnOnce(T) + Send + 'static,
    ) -> Subscription<V> {
        self.queue(once(matcher, completion))
    }

    fn register(&self, handler: Handler<V>, completion: Option<Completion>) -> Subscription<V> {
        let entry = Arc::new(Entry {
            id: SubscriptionId::next(),
            live: AtomicBool::new(true),
            handler: Mutex::new(Some(handler)),
            completion: Mutex::new(completion),
        });

        lock(&self.inner.items).push(entry.clone());

        Subscription {
            entry,
            queue: Arc::downgrade(&self.inner),
        }
    }

    /// Delivers `value` to every subscription registered when delivery begins.
    ///
    /// The newest subscription is called first. Subscriptions registered by a handler during
    /// delivery do not see `value`; subscriptions removed during delivery are skipped.
    ///
    /// Handlers run without the queue lock held, so they may register or cancel subscriptions,
    /// but must not synchronously deliver to this queue again.
    pub fn receive(&self, value: &V) {
        let snapshot: Vec<_> = lock(&self.inner.items).iter().rev().cloned().collect();

        for entry in snapshot {
            if entry.deliver(value) {
                retire(&entry, Some(&*self.inner));
            }
        }
    }

    /// Removes `subscription` if it belongs to this queue.
    pub fn remove(&self, subscription: &Subscription<V>) {
        if Weak::ptr_eq(&subscription.queue, &Arc::downgrade(&self.inner)) {
            retire(&subscription.entry, Some(&*self.inner));
        }
    }
}

pub(crate) fn once<V, T>(
    mut matcher: impl FnMut(&V) -> Option<T> + Send + 'static,
    completion: impl FnOnce(T) + Send + 'static,
) -> impl FnMut(&V, &Done) + Send + 'static
where
    V: 'static,
    T: 'static,
{
    let mut completion = Some(completion);
    move |value, done| {
        if let Some(result) = matcher(value) {
            if let Some(completion) = completion.take() {
                completion(result);
            }
            done.mark();
        }
    }
}

/// A registered interest in a [`SubscriptionQueue`].
///
/// A subscription only holds a weak reference to its queue. Dropping the handle does not
/// cancel it; use [`cancel()`][Subscription::cancel].
pub struct Subscription<V> {
    entry: Arc<Entry<V>>,
    queue: Weak<Inner<V>>,
}

impl<V> Clone for Subscription<V> {
    fn clone(&self) -> Self {
        Self {
            entry: self.entry.clone(),
            queue: self.queue.clone(),
        }
    }
}

impl<V> std::fmt::Debug for Subscription<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.entry.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl<V> PartialEq for Subscription<V> {
    fn eq(&self, other: &Self) -> bool {
        self.entry.id == other.entry.id
    }
}

impl<V> Eq for Subscription<V> {}

impl<V> Subscription<V> {
    pub fn id(&self) -> SubscriptionId {
        self.entry.id
    }

    /// Whether the subscription is still registered.
    pub fn is_active(&self) -> bool {
        self.entry.is_live()
    }

    /// Removes the subscription from its queue and runs its completion.
    ///
    /// Only the first call, or the first [`Done::mark`], has any effect.
    pub fn cancel(&self) {
        retire(&self.entry, self.queue.upgrade().as_deref());
    }
}

impl<V> Cancellable for Subscription<V> {
    fn cancel(&self) {
        Subscription::cancel(self);
    }
}
