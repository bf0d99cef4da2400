//! Multi-subscriber event queues with self-cancelling subscriptions.
//!
//! A [`SubscriptionQueue`] fans every value it receives out to the
//! [`Subscription`]s registered on it. Each handler is called with the value and
//! a [`Done`] marker; marking it removes the subscription once the handler
//! returns. Removal, whether through [`Done::mark`] or [`Subscription::cancel`],
//! runs the subscription's completion callback exactly once.
//!
//! A [`SubscriptionQueueMap`] partitions queues by key so that callbacks which
//! only carry an identifier can be routed back to the requests waiting on them.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! use subscription_queue::SubscriptionQueue;
//!
//! let queue = SubscriptionQueue::<u32>::new();
//! let seen = Arc::new(AtomicUsize::new(0));
//!
//! let counter = seen.clone();
//! queue.queue(move |value, done| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//!     if *value == 2 {
//!         done.mark();
//!     }
//! });
//!
//! queue.receive(&1);
//! queue.receive(&2);
//! queue.receive(&3);
//!
//! assert_eq!(seen.load(Ordering::SeqCst), 2);
//! assert!(queue.is_empty());
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

mod map;
mod queue;

pub use map::SubscriptionQueueMap;
pub use queue::{Done, Subscription, SubscriptionId, SubscriptionQueue};

/// Something that can be cancelled from any thread.
///
/// Cancelling must be idempotent: only the first call has an effect.
pub trait Cancellable: Send + Sync {
    fn cancel(&self);
}

/// A type-erased, cloneable handle to a [`Cancellable`].
///
/// Handles returned for requests that never registered anything (for example
/// because they failed immediately) are no-ops.
#[derive(Clone, Default)]
pub struct CancelHandle {
    inner: Option<Arc<dyn Cancellable>>,
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("noop", &self.inner.is_none())
            .finish()
    }
}

impl CancelHandle {
    pub fn new(cancellable: impl Cancellable + 'static) -> Self {
        Self {
            inner: Some(Arc::new(cancellable)),
        }
    }

    /// Returns a handle whose `cancel` does nothing.
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if let Some(inner) = &self.inner {
            inner.cancel();
        }
    }
}

impl Cancellable for CancelHandle {
    fn cancel(&self) {
        CancelHandle::cancel(self);
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
