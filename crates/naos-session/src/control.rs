//! Session control sub-protocol on the reserved `0xFD` endpoint.

use std::time::Duration;

use naos_frame::{ACK, CONTROL};

use crate::ack;
use crate::error::{ProtocolError, Result};
use crate::session::{unexpected_reply, Session};

const CMD_STATUS: u8 = 0;
const CMD_UNLOCK: u8 = 1;
const CMD_GET_MTU: u8 = 2;

/// Session status bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SessionStatus(pub u8);

impl SessionStatus {
    /// The session must be unlocked before protected endpoints respond.
    pub const LOCKED: u8 = 1;

    /// Whether the locked bit is set.
    pub fn locked(self) -> bool {
        self.0 & Self::LOCKED != 0
    }
}

impl Session {
    /// Fetch the session status bitmask.
    pub async fn status(&mut self, timeout: Duration) -> Result<SessionStatus> {
        let reply = self.control(&[CMD_STATUS], 1, timeout).await?;
        Ok(SessionStatus(reply[0]))
    }

    /// Unlock the session with a password. Returns whether it was accepted.
    pub async fn unlock(&mut self, password: &str, timeout: Duration) -> Result<bool> {
        let mut cmd = Vec::with_capacity(1 + password.len());
        cmd.push(CMD_UNLOCK);
        cmd.extend_from_slice(password.as_bytes());

        let reply = self.control(&cmd, 1, timeout).await?;
        Ok(reply[0] == 1)
    }

    /// Fetch the maximum payload size for this session.
    ///
    /// The value is cached after the first successful fetch.
    pub async fn get_mtu(&mut self, timeout: Duration) -> Result<u16> {
        if let Some(mtu) = self.mtu {
            return Ok(mtu);
        }

        let reply = self.control(&[CMD_GET_MTU], 2, timeout).await?;
        let mtu = u16::from_le_bytes([reply[0], reply[1]]);
        self.mtu = Some(mtu);
        Ok(mtu)
    }

    /// The cached MTU, if it has been fetched.
    pub fn cached_mtu(&self) -> Option<u16> {
        self.mtu
    }

    async fn control(&mut self, cmd: &[u8], len: usize, timeout: Duration) -> Result<Vec<u8>> {
        self.write(CONTROL, cmd).await?;

        let reply = self.read(timeout).await?;
        if reply.endpoint == ACK && reply.data.len() == 1 {
            ack::check(reply.data[0])?;
            return Err(ProtocolError::UnexpectedAck.into());
        }
        if reply.endpoint != CONTROL {
            return Err(unexpected_reply(&reply));
        }
        if reply.data.len() != len {
            return Err(ProtocolError::InvalidMessage("invalid control reply length").into());
        }

        Ok(reply.data.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use bytes::Bytes;
    use naos_frame::Message;
    use naos_transport::MemoryChannel;

    use super::*;
    use crate::error::{DeviceError, SessionError};
    use crate::testing::{ack, spawn_device};

    const T: Duration = Duration::from_millis(200);

    fn reply(msg: &Message, data: &'static [u8]) -> Vec<Message> {
        vec![Message::new(msg.session, CONTROL, Bytes::from_static(data))]
    }

    #[test]
    fn status_bits() {
        assert!(SessionStatus(1).locked());
        assert!(SessionStatus(3).locked());
        assert!(!SessionStatus(2).locked());
        assert!(!SessionStatus::default().locked());
    }

    #[tokio::test]
    async fn status_and_unlock() {
        let (channel, peer) = MemoryChannel::pair();
        let _log = spawn_device(peer, 3, |msg| match msg.data.as_ref() {
            [0] => reply(msg, &[1]),
            [1, rest @ ..] if rest == b"secret" => reply(msg, &[1]),
            [1, ..] => reply(msg, &[0]),
            _ => vec![ack(msg, 3)],
        });
        let mut session = Session::open(channel, T).await.unwrap();

        assert!(session.status(T).await.unwrap().locked());
        assert!(!session.unlock("wrong", T).await.unwrap());
        assert!(session.unlock("secret", T).await.unwrap());
    }

    #[tokio::test]
    async fn mtu_is_cached() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let (channel, peer) = MemoryChannel::pair();
        let _log = spawn_device(peer, 3, {
            let fetches = Arc::clone(&fetches);
            move |msg| {
                fetches.fetch_add(1, Ordering::SeqCst);
                reply(msg, &[0xF4, 0x01])
            }
        });
        let mut session = Session::open(channel, T).await.unwrap();
        assert_eq!(session.cached_mtu(), None);

        assert_eq!(session.get_mtu(T).await.unwrap(), 500);
        assert_eq!(session.get_mtu(T).await.unwrap(), 500);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(session.cached_mtu(), Some(500));
    }

    #[tokio::test]
    async fn control_errors() {
        let (channel, peer) = MemoryChannel::pair();
        let _log = spawn_device(peer, 3, |msg| match msg.data.as_ref() {
            [0] => vec![ack(msg, 1)],
            [2] => vec![ack(msg, 2)],
            _ => reply(msg, &[1, 2, 3]),
        });
        let mut session = Session::open(channel, T).await.unwrap();

        assert!(matches!(
            session.status(T).await,
            Err(SessionError::Protocol(ProtocolError::UnexpectedAck))
        ));
        assert!(matches!(
            session.get_mtu(T).await,
            Err(SessionError::Device(DeviceError::InvalidEndpoint))
        ));
        assert!(matches!(
            session.unlock("x", T).await,
            Err(SessionError::Protocol(ProtocolError::InvalidMessage(_)))
        ));
    }
}
