//! Relay endpoint client and relayed devices.
//!
//! A relay host forwards frames to downstream devices it can reach. A
//! [`RelayDevice`] tunnels a complete protocol stack through a dedicated
//! session on the host, so sessions opened on its channel work exactly
//! like sessions on a direct link.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use naos_frame::RELAY;
use naos_session::{
    ProtocolError, Session, SessionError, SessionWriter, DEFAULT_HANDSHAKE_TIMEOUT,
    DEFAULT_TIMEOUT,
};
use naos_transport::{Channel, Device, Hub, Queue, TransportError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{invalid, Result};

const CMD_SCAN: u8 = 0;
const CMD_LINK: u8 = 1;
const CMD_SEND: u8 = 2;

/// Scan for reachable downstream devices.
///
/// Bit `i` of the returned map is set if device `i` is reachable.
pub async fn scan(session: &mut Session, timeout: Duration) -> Result<u64> {
    session.write(RELAY, &[CMD_SCAN]).await?;
    let reply = session
        .receive(RELAY, false, timeout)
        .await?
        .ok_or(ProtocolError::UnexpectedAck)?;
    let map: [u8; 8] = reply[..]
        .try_into()
        .map_err(|_| invalid("relay map has wrong length"))?;
    Ok(u64::from_le_bytes(map))
}

/// Indices of the devices set in a relay map.
pub fn indices(map: u64) -> Vec<u8> {
    (0..64).filter(|i| map & (1u64 << i) != 0).collect()
}

/// Link this session to a downstream device.
pub async fn link(session: &mut Session, index: u8, timeout: Duration) -> Result<()> {
    session.send(RELAY, &[CMD_LINK, index], timeout).await?;
    Ok(())
}

/// Forward a frame to a downstream device.
pub async fn send(session: &Session, index: u8, frame: &[u8]) -> Result<()> {
    session.write(RELAY, &relay_frame(index, frame)).await?;
    Ok(())
}

/// Receive the next frame relayed from the linked device.
pub async fn receive(session: &mut Session, timeout: Duration) -> Result<Bytes> {
    session
        .receive(RELAY, false, timeout)
        .await?
        .ok_or_else(|| ProtocolError::UnexpectedAck.into())
}

fn relay_frame(index: u8, frame: &[u8]) -> Vec<u8> {
    let mut cmd = Vec::with_capacity(2 + frame.len());
    cmd.extend_from_slice(&[CMD_SEND, index]);
    cmd.extend_from_slice(frame);
    cmd
}

/// Something that can open fresh sessions to a relay host.
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// Identifier of the host.
    fn id(&self) -> String;

    /// Open a new, ready to use session.
    async fn new_session(&self) -> naos_session::Result<Session>;
}

/// A [`SessionSource`] opening plain sessions on a channel.
pub struct ChannelSource {
    id: String,
    channel: Arc<dyn Channel>,
    timeout: Duration,
}

impl ChannelSource {
    /// Create a source for an open channel.
    pub fn new(id: impl Into<String>, channel: Arc<dyn Channel>) -> Self {
        Self {
            id: id.into(),
            channel,
            timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Set the handshake timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl SessionSource for ChannelSource {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn new_session(&self) -> naos_session::Result<Session> {
        Session::open(Arc::clone(&self.channel), self.timeout).await
    }
}

/// Relay tunnel settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Timeout for linking the tunnel.
    pub timeout: Duration,
    /// Read timeout of the forwarding loop; expiry only restarts the read.
    pub poll: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            poll: Duration::from_secs(1),
        }
    }
}

/// A downstream device reached through a relay host.
pub struct RelayDevice {
    host: Arc<dyn SessionSource>,
    index: u8,
    config: RelayConfig,
}

impl RelayDevice {
    /// Create a relayed device.
    pub fn new(host: Arc<dyn SessionSource>, index: u8) -> Self {
        Self::with_config(host, index, RelayConfig::default())
    }

    /// Create a relayed device with custom settings.
    pub fn with_config(host: Arc<dyn SessionSource>, index: u8, config: RelayConfig) -> Self {
        Self {
            host,
            index,
            config,
        }
    }

    /// Index of the device on the host.
    pub fn index(&self) -> u8 {
        self.index
    }

    async fn connect(&self) -> Result<Arc<RelayChannel>> {
        let mut session = self.host.new_session().await?;
        if let Err(err) = link(&mut session, self.index, self.config.timeout).await {
            let _ = session.end(Duration::ZERO).await;
            return Err(err);
        }

        let hub = Hub::new();
        let token = CancellationToken::new();
        let writer = session.writer();
        let task = tokio::spawn(forward(
            session,
            hub.clone(),
            token.clone(),
            self.config.poll,
        ));

        info!(host = %self.host.id(), index = self.index, "opened relay channel");
        Ok(Arc::new(RelayChannel {
            index: self.index,
            hub,
            writer,
            token,
            task: StdMutex::new(Some(task)),
        }))
    }
}

#[async_trait]
impl Device for RelayDevice {
    fn id(&self) -> String {
        format!("{}/{}", self.host.id(), self.index)
    }

    async fn open(&self) -> naos_transport::Result<Arc<dyn Channel>> {
        match self.connect().await {
            Ok(channel) => Ok(channel),
            Err(err) => Err(TransportError::Open {
                target: self.id(),
                source: std::io::Error::other(err),
            }),
        }
    }
}

/// Pump relayed frames from the host session into the hub until cancelled
/// or the host link fails.
async fn forward(mut session: Session, hub: Hub, token: CancellationToken, poll: Duration) {
    loop {
        let result = tokio::select! {
            _ = token.cancelled() => break,
            result = receive(&mut session, poll) => result,
        };
        match result {
            Ok(frame) => hub.dispatch(frame),
            Err(err) if err.is_timeout() => continue,
            Err(err) => {
                warn!(%err, "relay forwarding stopped");
                break;
            }
        }
    }

    if let Err(err) = session.end(Duration::ZERO).await {
        debug!(%err, "failed to end relay session");
    }
    hub.close();
}

/// Channel tunnelled through a relay host.
pub struct RelayChannel {
    index: u8,
    hub: Hub,
    writer: SessionWriter,
    token: CancellationToken,
    task: StdMutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Channel for RelayChannel {
    fn name(&self) -> &'static str {
        "relay"
    }

    fn subscribe(&self) -> Queue {
        self.hub.subscribe()
    }

    async fn write(&self, frame: &[u8]) -> naos_transport::Result<()> {
        if self.hub.is_closed() {
            return Err(TransportError::Closed);
        }
        match self.writer.write(RELAY, &relay_frame(self.index, frame)).await {
            Ok(()) => Ok(()),
            Err(SessionError::Transport(err)) => Err(err),
            Err(err) => Err(TransportError::Io(std::io::Error::other(err))),
        }
    }

    async fn close(&self) {
        self.token.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
            debug!(index = self.index, "relay channel closed");
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

impl Drop for RelayChannel {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use naos_frame::{Message, END, HANDSHAKE};
    use naos_transport::MemoryChannel;

    use super::*;
    use crate::testing::{ack, reply, spawn_device, Log, SESSION};

    const T: Duration = Duration::from_millis(500);

    /// A host linking index 3 and answering handshakes of the relayed device.
    fn host() -> (Arc<dyn SessionSource>, Log) {
        let (channel, peer) = MemoryChannel::pair();
        let log = spawn_device(peer, |msg| match msg.data.first().copied() {
            _ if msg.endpoint != RELAY => Vec::new(),
            Some(CMD_SCAN) => vec![reply(msg, 0b1001u64.to_le_bytes().to_vec())],
            Some(CMD_LINK) if msg.data[1] == 3 => vec![ack(msg, 1)],
            Some(CMD_LINK) => vec![ack(msg, 4)],
            Some(CMD_SEND) => {
                let inner = Message::decode(&msg.data[2..]).unwrap();
                if inner.endpoint != HANDSHAKE {
                    return Vec::new();
                }
                let echo = Message::new(0x33, HANDSHAKE, inner.data);
                vec![reply(msg, echo.encode())]
            }
            _ => Vec::new(),
        });
        (Arc::new(ChannelSource::new("host", channel)), log)
    }

    #[tokio::test]
    async fn scan_decodes_map() {
        let (source, _log) = host();
        let mut session = source.new_session().await.unwrap();
        let map = scan(&mut session, T).await.unwrap();
        assert_eq!(indices(map), vec![0, 3]);
    }

    #[tokio::test]
    async fn open_links_before_traffic() {
        let (source, log) = host();
        let device = RelayDevice::new(source, 3);
        assert_eq!(device.id(), "host/3");

        let channel = device.open().await.unwrap();
        assert_eq!(channel.name(), "relay");

        let session = Session::open(Arc::clone(&channel), T).await.unwrap();
        assert_eq!(session.id(), 0x33);

        let log = log.lock().unwrap();
        assert_eq!(log[0].data.as_ref(), &[CMD_LINK, 3]);
        assert_eq!(log.iter().filter(|m| m.data[0] == CMD_LINK).count(), 1);
        assert_eq!(log[1].data[..2], [CMD_SEND, 3]);
        assert_eq!(log[1].session, SESSION);
    }

    #[tokio::test]
    async fn close_ends_host_session() {
        let (source, log) = host();
        let channel = RelayDevice::new(source, 3).open().await.unwrap();

        channel.close().await;
        assert!(!channel.valid());
        assert!(matches!(
            channel.write(b"late").await,
            Err(TransportError::Closed)
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let log = log.lock().unwrap();
        assert_eq!(log.last().unwrap().endpoint, END);
    }

    #[tokio::test]
    async fn failed_link_ends_session() {
        let (source, log) = host();
        let err = RelayDevice::new(source, 5).open().await.err().unwrap();
        assert!(matches!(err, TransportError::Open { .. }));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].endpoint, END);
    }

    #[tokio::test]
    async fn host_disconnect_closes_relay_channel() {
        let (channel, peer) = MemoryChannel::pair();
        let _log = spawn_device(peer, |msg| vec![ack(msg, 1)]);
        let source = Arc::new(ChannelSource::new("host", channel.clone()));
        let relay = RelayDevice::new(source, 0).open().await.unwrap();
        let mut closed = relay.watch_closed();

        channel.close().await;
        closed.wait_for(|closed| *closed).await.unwrap();
        assert!(!relay.valid());
    }
}
