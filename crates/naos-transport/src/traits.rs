use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::Result;
use crate::hub::Queue;

/// One open link to a device.
///
/// A channel carries complete frames in both directions. Received frames are
/// fanned out to every subscribed [`Queue`] in receipt order; sessions
/// sharing a channel filter the traffic themselves.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Diagnostic tag of the transport (`ble`, `serial`, `http`, `relay`, ...).
    fn name(&self) -> &'static str;

    /// Subscribe a fresh queue to received frames.
    fn subscribe(&self) -> Queue;

    /// Send one complete frame to the device.
    async fn write(&self, frame: &[u8]) -> Result<()>;

    /// Terminate the link. Idempotent; queues observe closure afterwards.
    async fn close(&self);

    /// Whether the link is still usable.
    fn valid(&self) -> bool;

    /// Disconnect notification, flips to `true` once the link is gone.
    fn watch_closed(&self) -> watch::Receiver<bool>;
}

/// A device that can be connected to.
///
/// Discovery mechanisms produce values implementing this trait; at most one
/// channel is expected to be open per device at a time.
#[async_trait]
pub trait Device: Send + Sync {
    /// Stable identifier of the device.
    fn id(&self) -> String;

    /// Open a new channel to the device.
    async fn open(&self) -> Result<Arc<dyn Channel>>;
}
