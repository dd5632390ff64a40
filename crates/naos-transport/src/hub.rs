use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::trace;

/// Fan-out bus shared by every transport.
///
/// Frames passed to [`Hub::dispatch`] are delivered in receipt order to every
/// live [`Queue`]. There is no backpressure: queues are unbounded and
/// subscribers must drain them.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    state: Mutex<HubState>,
    closed: watch::Sender<bool>,
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    queues: HashMap<u64, mpsc::UnboundedSender<Bytes>>,
    closed: bool,
}

impl HubInner {
    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Hub {
    /// Create an open hub without subscribers.
    pub fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(HubInner {
                state: Mutex::new(HubState::default()),
                closed,
            }),
        }
    }

    /// Register a new queue.
    ///
    /// Subscribing to a closed hub yields a queue that is already drained.
    pub fn subscribe(&self) -> Queue {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.inner.lock();
        let id = state.next_id;
        state.next_id = state.next_id.wrapping_add(1);
        if !state.closed {
            state.queues.insert(id, tx);
        }

        Queue {
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver a frame to all current subscribers.
    pub fn dispatch(&self, frame: Bytes) {
        let mut state = self.inner.lock();
        if state.closed {
            return;
        }
        trace!(len = frame.len(), queues = state.queues.len(), "dispatching frame");
        state
            .queues
            .retain(|_, queue| queue.send(frame.clone()).is_ok());
    }

    /// Close the hub. Idempotent.
    ///
    /// All queues are released, so pending and future reads observe closure.
    pub fn close(&self) {
        let mut state = self.inner.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.queues.clear();
        drop(state);
        self.inner.closed.send_replace(true);
    }

    /// Whether the hub has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Watch the closed flag. Flips to `true` exactly once.
    pub fn watch_closed(&self) -> watch::Receiver<bool> {
        self.inner.closed.subscribe()
    }

    /// Number of registered queues.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().queues.len()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Hub")
            .field("queues", &state.queues.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// A subscription to a [`Hub`].
///
/// Dropping the queue unsubscribes it.
pub struct Queue {
    id: u64,
    rx: mpsc::UnboundedReceiver<Bytes>,
    hub: Weak<HubInner>,
}

impl Queue {
    /// Wait for the next frame. Returns `None` once the channel is closed
    /// and all buffered frames have been consumed.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Take the next buffered frame without waiting.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Explicitly release the subscription.
    pub fn unsubscribe(self) {}
}

impl Drop for Queue {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.lock().queues.remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_in_receipt_order() {
        let hub = Hub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        hub.dispatch(Bytes::from_static(b"one"));
        hub.dispatch(Bytes::from_static(b"two"));

        for queue in [&mut a, &mut b] {
            assert_eq!(queue.recv().await.unwrap().as_ref(), b"one");
            assert_eq!(queue.recv().await.unwrap().as_ref(), b"two");
        }
    }

    #[tokio::test]
    async fn drop_unsubscribes() {
        let hub = Hub::new();
        let a = hub.subscribe();
        let b = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        drop(a);
        assert_eq!(hub.subscriber_count(), 1);
        b.unsubscribe();
        assert_eq!(hub.subscriber_count(), 0);

        hub.dispatch(Bytes::from_static(b"nobody"));
    }

    #[tokio::test]
    async fn close_drains_queues_and_notifies() {
        let hub = Hub::new();
        let mut queue = hub.subscribe();
        let mut closed = hub.watch_closed();

        hub.dispatch(Bytes::from_static(b"last"));
        hub.close();
        hub.close();

        assert_eq!(queue.recv().await.unwrap().as_ref(), b"last");
        assert!(queue.recv().await.is_none());
        closed.wait_for(|closed| *closed).await.unwrap();
        assert!(hub.is_closed());
    }

    #[tokio::test]
    async fn subscribe_after_close_is_drained() {
        let hub = Hub::new();
        hub.close();

        let mut queue = hub.subscribe();
        assert!(queue.recv().await.is_none());
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn queue_outliving_hub() {
        let hub = Hub::new();
        let mut queue = hub.subscribe();
        drop(hub);
        assert!(queue.try_recv().is_none());
    }
}
