use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use async_io::Timer;
use futures_channel::{mpsc, oneshot};
use futures_lite::{StreamExt, future};
use subscription_queue::{CancelHandle, Done};
use tracing::{trace, warn};

use crate::error::{ErrorKind, Result};

pub struct ScopeGuard<F: FnOnce()> {
    dropfn: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn defuse(mut self) {
        self.dropfn = None;
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(dropfn) = self.dropfn.take() {
            dropfn();
        }
    }
}

pub fn defer<F: FnOnce()>(dropfn: F) -> ScopeGuard<F> {
    ScopeGuard {
        dropfn: Some(dropfn),
    }
}

pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type Expiry = Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>;

/// A pending deadline. Dropping it disarms the timer.
pub struct Timeout {
    expiry: Expiry,
}

impl Drop for Timeout {
    fn drop(&mut self) {
        let disarmed = lock(&self.expiry).take();
        drop(disarmed);
    }
}

/// Calls `on_timeout` from the shared timer thread once `duration` has elapsed, unless the
/// returned [`Timeout`] is dropped first.
pub fn timeout(duration: Duration, on_timeout: impl FnOnce() + Send + 'static) -> Timeout {
    let expiry: Expiry = Arc::new(Mutex::new(Some(Box::new(on_timeout))));

    match (Instant::now().checked_add(duration), timers()) {
        (Some(at), Some(timers)) => {
            let deadline = Deadline {
                at,
                expiry: expiry.clone(),
            };
            if timers.unbounded_send(deadline).is_err() {
                warn!("timer thread has stopped");
            }
        }
        (None, _) => trace!(?duration, "deadline is too far away to schedule"),
        (_, None) => (),
    }

    Timeout { expiry }
}

struct Deadline {
    at: Instant,
    expiry: Expiry,
}

impl Deadline {
    fn fire(self) {
        let on_timeout = lock(&self.expiry).take();
        if let Some(on_timeout) = on_timeout {
            if panic::catch_unwind(AssertUnwindSafe(on_timeout)).is_err() {
                warn!("timeout callback panicked");
            }
        }
    }
}

// Ordered so that `BinaryHeap` pops the earliest deadline first.
impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.at.cmp(&self.at)
    }
}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Deadline {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at
    }
}

impl Eq for Deadline {}

fn timers() -> Option<&'static mpsc::UnboundedSender<Deadline>> {
    static TIMERS: OnceLock<Option<mpsc::UnboundedSender<Deadline>>> = OnceLock::new();

    TIMERS
        .get_or_init(|| {
            let (sender, receiver) = mpsc::unbounded();
            let spawned = thread::Builder::new()
                .name("bluetooth-timers".into())
                .spawn(move || async_io::block_on(run_timers(receiver)));

            match spawned {
                Ok(_) => Some(sender),
                Err(error) => {
                    warn!(%error, "failed to start timer thread");
                    None
                }
            }
        })
        .as_ref()
}

enum Wake {
    Scheduled(Deadline),
    Due,
    Closed,
}

async fn run_timers(mut requests: mpsc::UnboundedReceiver<Deadline>) {
    let mut pending: BinaryHeap<Deadline> = BinaryHeap::new();

    loop {
        let now = Instant::now();
        while pending.peek().is_some_and(|deadline: &Deadline| deadline.at <= now) {
            if let Some(deadline) = pending.pop() {
                deadline.fire();
            }
        }

        let next = pending.peek().map(|deadline| deadline.at);
        let wake = future::or(
            async {
                match requests.next().await {
                    Some(deadline) => Wake::Scheduled(deadline),
                    None => Wake::Closed,
                }
            },
            async {
                match next {
                    Some(at) => {
                        Timer::at(at).await;
                    }
                    None => future::pending::<()>().await,
                }
                Wake::Due
            },
        )
        .await;

        match wake {
            Wake::Scheduled(deadline) => pending.push(deadline),
            Wake::Due => (),
            Wake::Closed => break,
        }
    }
}

pub type Completion<T> = Box<dyn FnOnce(Result<T>) + Send>;

struct Pending<T> {
    completion: Option<Completion<T>>,
    timeout: Option<Timeout>,
}

/// A completion callback that is called at most once.
///
/// Every path that can finish a request (the awaited event, a timeout, a disconnect, a cancel)
/// races to call [`respond()`][Responder::respond]; only the first one reaches the callback.
pub struct Responder<T> {
    pending: Arc<Mutex<Pending<T>>>,
}

impl<T> Clone for Responder<T> {
    fn clone(&self) -> Self {
        Self {
            pending: self.pending.clone(),
        }
    }
}

impl<T> Responder<T> {
    pub fn new(completion: impl FnOnce(Result<T>) + Send + 'static) -> Self {
        Self {
            pending: Arc::new(Mutex::new(Pending {
                completion: Some(Box::new(completion)),
                timeout: None,
            })),
        }
    }

    /// Claims the request, disarming any timeout. Returns the completion only to the first
    /// caller.
    pub fn take(&self) -> Option<Completion<T>> {
        let (completion, timeout) = {
            let mut pending = lock(&self.pending);
            (pending.completion.take(), pending.timeout.take())
        };
        drop(timeout);
        completion
    }

    /// Calls the completion with `result`. Returns `false` if the request had already been
    /// answered.
    pub fn respond(&self, result: Result<T>) -> bool {
        match self.take() {
            Some(completion) => {
                completion(result);
                true
            }
            None => false,
        }
    }

    /// Ties `timeout` to this request so that it is disarmed once the request is answered.
    pub fn arm(&self, timeout: Timeout) {
        let mut pending = lock(&self.pending);
        if pending.completion.is_some() {
            pending.timeout = Some(timeout);
        }
    }
}

/// Builds the handler and removal callback of a one-shot subscription.
///
/// The first value for which `matcher` returns a result answers `responder` and ends the
/// subscription. If the subscription is removed before that, the request is answered with
/// [`ErrorKind::Canceled`].
pub fn respond_once<V, T>(
    responder: Responder<T>,
    mut matcher: impl FnMut(&V) -> Option<Result<T>> + Send + 'static,
) -> (
    impl FnMut(&V, &Done) + Send + 'static,
    impl FnOnce() + Send + 'static,
)
where
    V: 'static,
    T: 'static,
{
    let on_match = responder.clone();
    let handler = move |value: &V, done: &Done| {
        if let Some(result) = matcher(value) {
            on_match.respond(result);
            done.mark();
        }
    };
    let on_removed = move || {
        responder.respond(Err(ErrorKind::Canceled.into()));
    };
    (handler, on_removed)
}

/// Runs a completion-style operation and waits for its result.
///
/// Dropping the returned future cancels the operation.
pub async fn wait_for<T: Send + 'static>(
    start: impl FnOnce(Box<dyn FnOnce(Result<T>) + Send>) -> CancelHandle,
) -> Result<T> {
    let (sender, receiver) = oneshot::channel();
    let handle = start(Box::new(move |result| {
        let _ = sender.send(result);
    }));

    let guard = defer(move || handle.cancel());
    let result = receiver.await?;
    guard.defuse();
    result
}
