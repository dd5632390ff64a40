use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::hub::{Hub, Queue};
use crate::traits::{Channel, Device};

/// In-memory loopback channel.
///
/// The client end implements [`Channel`]; the [`MemoryPeer`] end plays the
/// device: it reads the frames written by the client and injects replies.
pub struct MemoryChannel {
    name: &'static str,
    hub: Hub,
    outbound: mpsc::UnboundedSender<Bytes>,
}

/// Device side of a [`MemoryChannel`].
pub struct MemoryPeer {
    hub: Hub,
    inbound: Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

impl MemoryChannel {
    /// Create a connected channel/peer pair.
    pub fn pair() -> (Arc<MemoryChannel>, MemoryPeer) {
        Self::pair_named("memory")
    }

    /// Create a connected pair reporting `name` as transport tag.
    pub fn pair_named(name: &'static str) -> (Arc<MemoryChannel>, MemoryPeer) {
        let hub = Hub::new();
        let (outbound, inbound) = mpsc::unbounded_channel();
        let channel = Arc::new(MemoryChannel {
            name,
            hub: hub.clone(),
            outbound,
        });
        let peer = MemoryPeer {
            hub,
            inbound: Mutex::new(inbound),
        };
        (channel, peer)
    }

    /// Number of live subscriptions on the client end.
    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn name(&self) -> &'static str {
        self.name
    }

    fn subscribe(&self) -> Queue {
        self.hub.subscribe()
    }

    async fn write(&self, frame: &[u8]) -> Result<()> {
        if self.hub.is_closed() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(Bytes::copy_from_slice(frame))
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self) {
        if !self.hub.is_closed() {
            debug!(name = self.name, "closing memory channel");
        }
        self.hub.close();
    }

    fn valid(&self) -> bool {
        !self.hub.is_closed()
    }

    fn watch_closed(&self) -> watch::Receiver<bool> {
        self.hub.watch_closed()
    }
}

impl MemoryPeer {
    /// Wait for the next frame written by the client.
    ///
    /// Returns `None` once the link is closed and all written frames have
    /// been consumed, or the client end has been dropped.
    pub async fn recv(&self) -> Option<Bytes> {
        let mut closed = self.hub.watch_closed();
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            biased;
            frame = inbound.recv() => frame,
            _ = closed.wait_for(|closed| *closed) => inbound.try_recv().ok(),
        }
    }

    /// Deliver a frame to the client's subscribers.
    pub fn send(&self, frame: impl Into<Bytes>) {
        self.hub.dispatch(frame.into());
    }

    /// Simulate the device dropping the link.
    pub fn close(&self) {
        self.hub.close();
    }

    /// Whether the client end has closed the link.
    pub fn is_closed(&self) -> bool {
        self.hub.is_closed()
    }
}

type Connector = Box<dyn Fn() -> Arc<MemoryChannel> + Send + Sync>;

/// A [`Device`] whose channels are produced by a connector closure.
///
/// The connector typically creates a [`MemoryChannel::pair`] and hands the
/// peer end to a simulator task.
pub struct MemoryDevice {
    id: String,
    connect: Connector,
}

impl MemoryDevice {
    /// Create a device with a connector.
    pub fn new<F>(id: impl Into<String>, connect: F) -> Self
    where
        F: Fn() -> Arc<MemoryChannel> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            connect: Box::new(connect),
        }
    }
}

#[async_trait]
impl Device for MemoryDevice {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn open(&self) -> Result<Arc<dyn Channel>> {
        let channel: Arc<dyn Channel> = (self.connect)();
        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_reaches_peer_and_peer_reaches_subscribers() {
        let (channel, peer) = MemoryChannel::pair();
        let mut queue = channel.subscribe();

        channel.write(b"request").await.unwrap();
        assert_eq!(peer.recv().await.unwrap().as_ref(), b"request");

        peer.send(Bytes::from_static(b"reply"));
        assert_eq!(queue.recv().await.unwrap().as_ref(), b"reply");
        assert_eq!(channel.name(), "memory");
    }

    #[tokio::test]
    async fn close_invalidates_channel() {
        let (channel, peer) = MemoryChannel::pair();
        let mut queue = channel.subscribe();
        assert!(channel.valid());

        channel.close().await;
        channel.close().await;

        assert!(!channel.valid());
        assert!(peer.is_closed());
        assert!(queue.recv().await.is_none());
        assert!(matches!(
            channel.write(b"late").await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn peer_close_notifies_client() {
        let (channel, peer) = MemoryChannel::pair();
        let mut closed = channel.watch_closed();
        peer.close();
        closed.wait_for(|closed| *closed).await.unwrap();
        assert!(!channel.valid());
    }

    #[tokio::test]
    async fn device_opens_connector_channels() {
        let device = MemoryDevice::new("mem-1", || MemoryChannel::pair_named("ble").0);
        assert_eq!(device.id(), "mem-1");
        let channel = device.open().await.unwrap();
        assert_eq!(channel.name(), "ble");
    }
}
