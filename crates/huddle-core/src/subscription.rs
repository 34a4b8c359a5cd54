//! Live subscriptions and their cancellation handles.
//!
//! Every collaborator subscription hands back a [`Subscription`]: a stream of
//! results paired with a [`SubscriptionHandle`]. The handle is the only way a
//! subscriber stops a collaborator from feeding it, and it is safe to cancel
//! from anywhere, any number of times.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures::Stream;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::CollaboratorResult;

type UnregisterHook = Box<dyn FnOnce() + Send + 'static>;

struct HandleInner {
    cancelled: AtomicBool,
    token: CancellationToken,
    unregister: Mutex<Option<UnregisterHook>>,
}

/// Opaque, cloneable cancellation handle for a live subscription.
///
/// The first call to [`cancel`](Self::cancel) trips the handle's
/// cancellation token and runs the collaborator's unregister hook. Later
/// calls, from any clone, do nothing.
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

impl SubscriptionHandle {
    /// Create a handle with no unregister hook
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a handle that runs `hook` exactly once when cancelled
    pub fn with_unregister(hook: impl FnOnce() + Send + 'static) -> Self {
        Self::build(Some(Box::new(hook)))
    }

    fn build(unregister: Option<UnregisterHook>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                cancelled: AtomicBool::new(false),
                token: CancellationToken::new(),
                unregister: Mutex::new(unregister),
            }),
        }
    }

    /// Cancel the subscription.
    ///
    /// Returns `true` if this call performed the cancellation, `false` if
    /// the handle was already cancelled.
    pub fn cancel(&self) -> bool {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.token.cancel();
        // Take the hook before running it so the lock is not held across
        // collaborator code.
        let hook = self.inner.unregister.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        true
    }

    /// Whether the subscription has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Wait until the subscription is cancelled
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }
}

impl Default for SubscriptionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Cancels its handle when dropped.
struct CancelOnDrop(SubscriptionHandle);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// A live stream of values from a collaborator.
///
/// The stream ends once the subscription is cancelled. Dropping the
/// subscription cancels it, so a subscriber that goes away can never leave
/// a listener behind.
pub struct Subscription<T> {
    stream: BoxStream<'static, CollaboratorResult<T>>,
    guard: CancelOnDrop,
}

impl<T: Send + 'static> Subscription<T> {
    /// Wrap a stream and the handle that cancels it
    pub fn new(
        stream: impl Stream<Item = CollaboratorResult<T>> + Send + 'static,
        handle: SubscriptionHandle,
    ) -> Self {
        Self {
            stream: stream.boxed(),
            guard: CancelOnDrop(handle),
        }
    }

    /// Build a subscription fed by an unbounded channel.
    ///
    /// The stream ends when every sender is dropped or when the handle is
    /// cancelled, whichever comes first. A consumer parked on the stream is
    /// woken by either.
    pub fn from_receiver(
        mut rx: mpsc::UnboundedReceiver<CollaboratorResult<T>>,
        handle: SubscriptionHandle,
    ) -> Self {
        let cancel = handle.clone();
        let stream = async_stream::stream! {
            loop {
                let item = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    item = rx.recv() => item,
                };
                match item {
                    Some(item) => yield item,
                    None => break,
                }
            }
        };
        Self::new(stream, handle)
    }

    /// Transform every value, keeping the same cancellation handle
    pub fn map<U, F>(self, mut f: F) -> Subscription<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        let Subscription { stream, guard } = self;
        Subscription {
            stream: stream.map(move |item| item.map(&mut f)).boxed(),
            guard,
        }
    }
}

impl<T> Subscription<T> {
    /// A clone of this subscription's cancellation handle
    pub fn handle(&self) -> SubscriptionHandle {
        self.guard.0.clone()
    }

    /// Cancel the subscription. Idempotent.
    pub fn cancel(&self) -> bool {
        self.guard.0.cancel()
    }

    /// Whether the subscription has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.guard.0.is_cancelled()
    }
}

impl<T> Stream for Subscription<T> {
    type Item = CollaboratorResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.guard.0.is_cancelled() {
            return Poll::Ready(None);
        }
        this.stream.as_mut().poll_next(cx)
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("handle", &self.guard.0)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::error::CollaboratorError;

    #[test]
    fn test_cancel_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = SubscriptionHandle::with_unregister(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!handle.is_cancelled());
        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(!handle.clone().cancel());

        assert!(handle.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_ends_after_cancel() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = Subscription::from_receiver(rx, SubscriptionHandle::new());

        tx.send(Ok(1u32)).unwrap();
        assert_eq!(sub.next().await, Some(Ok(1)));

        sub.cancel();
        tx.send(Ok(2)).unwrap();
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn test_drop_cancels_handle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let (_tx, rx) = mpsc::unbounded_channel::<CollaboratorResult<u32>>();
        let sub = Subscription::from_receiver(
            rx,
            SubscriptionHandle::with_unregister(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let handle = sub.handle();

        drop(sub);
        assert!(handle.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Explicit cancel after drop does not re-run the hook
        handle.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_map_keeps_handle_and_errors() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = Subscription::from_receiver(rx, SubscriptionHandle::new());
        let handle = sub.handle();
        let mut lengths = sub.map(|s: Vec<u8>| s.len());

        tx.send(Ok(vec![1, 2, 3])).unwrap();
        tx.send(Err(CollaboratorError::Closed)).unwrap();
        assert_eq!(lengths.next().await, Some(Ok(3)));
        assert_eq!(lengths.next().await, Some(Err(CollaboratorError::Closed)));

        handle.cancel();
        assert!(lengths.is_cancelled());
        assert_eq!(lengths.next().await, None);
    }

    #[test]
    fn test_stream_pending_until_sent() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = Subscription::from_receiver(rx, SubscriptionHandle::new());

        let mut next = tokio_test::task::spawn(sub.next());
        tokio_test::assert_pending!(next.poll());

        tx.send(Ok("groups")).unwrap();
        assert!(next.is_woken());
        tokio_test::assert_ready_eq!(next.poll(), Some(Ok("groups")));
    }

    #[test]
    fn test_parked_stream_wakes_on_cancel() {
        let (tx, rx) = mpsc::unbounded_channel::<CollaboratorResult<u32>>();
        let handle = SubscriptionHandle::new();
        let mut sub = Subscription::from_receiver(rx, handle.clone());

        let mut next = tokio_test::task::spawn(sub.next());
        tokio_test::assert_pending!(next.poll());

        // The sender stays alive; only the cancellation can end the stream
        handle.cancel();
        assert!(next.is_woken());
        tokio_test::assert_ready_eq!(next.poll(), None);
        drop(tx);
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let handle = SubscriptionHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });
        handle.cancel();
        task.await.unwrap();
    }
}
