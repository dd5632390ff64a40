use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use naos_frame::{Message, ACK, END};
use naos_transport::{Channel, Queue, TransportError};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::ack;
use crate::error::{DeviceError, ProtocolError, Result, SessionError};
use crate::handshake;

/// Default timeout for acknowledged requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A logical conversation with a device over a shared [`Channel`].
///
/// A session owns its subscription queue. All reads take `&mut self`, so at
/// most one request/reply exchange is in flight per session; callers sharing
/// a session serialize through a mutex. Frames addressed to other sessions
/// on the same channel are skipped silently.
///
/// Dropping a session releases its subscription without notifying the
/// device; [`Session::end`] ends it gracefully.
pub struct Session {
    id: u16,
    channel: Arc<dyn Channel>,
    queue: Queue,
    pub(crate) mtu: Option<u16>,
}

impl Session {
    /// Open a new session on a channel.
    pub async fn open(channel: Arc<dyn Channel>, timeout: Duration) -> Result<Self> {
        let (id, queue) = handshake::begin(&channel, timeout).await?;
        Ok(Self {
            id,
            channel,
            queue,
            mtu: None,
        })
    }

    /// The device-assigned session ID.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// The channel this session runs on.
    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    /// A handle for unacknowledged writes that can be used concurrently
    /// with this session's reads.
    pub fn writer(&self) -> SessionWriter {
        SessionWriter {
            id: self.id,
            channel: Arc::clone(&self.channel),
        }
    }

    /// Read the next message addressed to this session.
    pub async fn read(&mut self, timeout: Duration) -> Result<Message> {
        let deadline = Instant::now() + timeout;
        loop {
            let frame = match tokio::time::timeout_at(deadline, self.queue.recv()).await {
                Ok(Some(frame)) => frame,
                Ok(None) => return Err(TransportError::Closed.into()),
                Err(_) => return Err(SessionError::Timeout(timeout)),
            };

            let msg = match Message::decode(&frame) {
                Ok(msg) => msg,
                Err(err) => {
                    trace!(session = self.id, %err, "skipping undecodable frame");
                    continue;
                }
            };
            if msg.session != self.id {
                trace!(
                    session = self.id,
                    foreign = msg.session,
                    "skipping foreign frame"
                );
                continue;
            }

            trace!(session = self.id, endpoint = msg.endpoint, len = msg.data.len(), "read");
            return Ok(msg);
        }
    }

    /// Write a message without waiting for anything.
    pub async fn write(&self, endpoint: u8, data: &[u8]) -> Result<()> {
        write_frame(&self.channel, self.id, endpoint, data).await
    }

    /// Send a message to an endpoint.
    ///
    /// A zero `ack_timeout` returns as soon as the frame is written.
    /// Otherwise a one-byte acknowledgement is awaited and decoded.
    pub async fn send(&mut self, endpoint: u8, data: &[u8], ack_timeout: Duration) -> Result<()> {
        self.write(endpoint, data).await?;
        if ack_timeout.is_zero() {
            return Ok(());
        }

        let reply = self.read(ack_timeout).await?;
        if reply.endpoint == ACK && reply.data.len() == 1 {
            return ack::check(reply.data[0]);
        }
        Err(unexpected_reply(&reply))
    }

    /// Receive a reply from an endpoint.
    ///
    /// A positive acknowledgement yields `None` ("end of stream") when
    /// `expect_ack` is set and fails with [`ProtocolError::UnexpectedAck`]
    /// otherwise. Negative acknowledgements are decoded into device errors.
    pub async fn receive(
        &mut self,
        endpoint: u8,
        expect_ack: bool,
        timeout: Duration,
    ) -> Result<Option<Bytes>> {
        let reply = self.read(timeout).await?;

        if reply.endpoint == ACK && reply.data.len() == 1 {
            return match ack::check(reply.data[0]) {
                Ok(()) if expect_ack => Ok(None),
                Ok(()) => Err(ProtocolError::UnexpectedAck.into()),
                Err(err) => Err(err),
            };
        }

        if reply.endpoint != endpoint {
            return Err(unexpected_reply(&reply));
        }

        Ok(Some(reply.data))
    }

    /// Check that the device still serves this session.
    pub async fn ping(&mut self, timeout: Duration) -> Result<()> {
        self.send(ACK, &[], timeout).await
    }

    /// Check whether the device provides an endpoint.
    pub async fn query(&mut self, endpoint: u8, timeout: Duration) -> Result<bool> {
        self.write(endpoint, &[]).await?;

        let reply = self.read(timeout).await?;
        if reply.endpoint != ACK || reply.data.len() != 1 {
            return Err(unexpected_reply(&reply));
        }

        Ok(reply.data[0] == ack::ACK_OK)
    }

    /// End the session.
    ///
    /// With a non-zero timeout the device's end reply is awaited. The
    /// subscription is released in every case.
    pub async fn end(mut self, timeout: Duration) -> Result<()> {
        let result = self.end_exchange(timeout).await;
        debug!(session = self.id, ok = result.is_ok(), "session ended");
        result
    }

    async fn end_exchange(&mut self, timeout: Duration) -> Result<()> {
        self.write(END, &[]).await?;
        if timeout.is_zero() {
            return Ok(());
        }

        let reply = self.read(timeout).await?;
        if reply.endpoint != END || !reply.data.is_empty() {
            return Err(ProtocolError::InvalidMessage("expected end reply").into());
        }
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("channel", &self.channel.name())
            .field("mtu", &self.mtu)
            .finish()
    }
}

/// Write-only handle to a session.
#[derive(Clone)]
pub struct SessionWriter {
    id: u16,
    channel: Arc<dyn Channel>,
}

impl SessionWriter {
    /// The session ID written with every frame.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Write a message without waiting for an acknowledgement.
    pub async fn write(&self, endpoint: u8, data: &[u8]) -> Result<()> {
        write_frame(&self.channel, self.id, endpoint, data).await
    }
}

impl fmt::Debug for SessionWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionWriter")
            .field("id", &self.id)
            .field("channel", &self.channel.name())
            .finish()
    }
}

async fn write_frame(channel: &Arc<dyn Channel>, id: u16, endpoint: u8, data: &[u8]) -> Result<()> {
    let frame = Message::new(id, endpoint, Bytes::copy_from_slice(data)).encode();
    trace!(session = id, endpoint, len = data.len(), "write");
    channel.write(&frame).await?;
    Ok(())
}

/// Classify a reply that does not match what was awaited.
pub(crate) fn unexpected_reply(reply: &Message) -> SessionError {
    if reply.endpoint == END {
        return DeviceError::InvalidSession.into();
    }
    ProtocolError::InvalidMessage("reply on unexpected endpoint").into()
}
