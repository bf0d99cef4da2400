use std::pin::Pin;
use std::task::{Context, Poll};

use futures_channel::mpsc;
use futures_lite::Stream;
use subscription_queue::CancelHandle;

/// A stream fed by a subscription.
///
/// The stream ends when its subscription ends. Dropping the stream cancels the subscription.
#[derive(Debug)]
pub struct EventStream<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    handle: CancelHandle,
}

impl<T> EventStream<T> {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<T>, handle: CancelHandle) -> Self {
        Self { receiver, handle }
    }

    /// Ends the subscription. Items that were already delivered can still be read.
    pub fn cancel(&self) {
        self.handle.cancel();
    }
}

impl<T> Stream for EventStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}

impl<T> Drop for EventStream<T> {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}
