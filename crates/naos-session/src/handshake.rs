use std::sync::Arc;
use std::time::Duration;

use naos_frame::{Message, HANDSHAKE};
use naos_transport::{Channel, Queue, TransportError};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{Result, SessionError};

/// Size of the random begin nonce.
pub const NONCE_SIZE: usize = 16;

/// Default timeout for opening a session.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Perform the begin handshake on a channel.
///
/// The queue is subscribed before the begin frame is written so the reply
/// cannot be missed. The device echoes the nonce on the handshake endpoint;
/// the session field of that reply is the assigned session ID. Replies to
/// other handshakes running concurrently on the same channel are skipped.
pub(crate) async fn begin(channel: &Arc<dyn Channel>, timeout: Duration) -> Result<(u16, Queue)> {
    let mut queue = channel.subscribe();

    let nonce: [u8; NONCE_SIZE] = rand::random();
    let begin = Message::new(0, HANDSHAKE, nonce.to_vec()).encode();
    channel.write(&begin).await?;

    let deadline = Instant::now() + timeout;
    loop {
        let frame = match tokio::time::timeout_at(deadline, queue.recv()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Err(TransportError::Closed.into()),
            Err(_) => return Err(SessionError::Timeout(timeout)),
        };

        let msg = match Message::decode(&frame) {
            Ok(msg) => msg,
            Err(err) => {
                trace!(%err, "skipping undecodable frame during handshake");
                continue;
            }
        };

        if msg.endpoint == HANDSHAKE && msg.data.as_ref() == nonce.as_slice() {
            debug!(session = msg.session, channel = channel.name(), "session opened");
            return Ok((msg.session, queue));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use naos_transport::MemoryChannel;

    use super::*;
    use crate::session::Session;
    use crate::testing::spawn_device;

    #[tokio::test]
    async fn open_adopts_reassigned_session_id() {
        let (channel, peer) = MemoryChannel::pair();
        let _log = spawn_device(peer, 0x2A, |_| Vec::new());

        let session = Session::open(channel, Duration::from_secs(1)).await.unwrap();
        assert_eq!(session.id(), 0x2A);
    }

    #[tokio::test]
    async fn begin_frame_layout() {
        let (channel, peer) = MemoryChannel::pair();
        let channel: Arc<dyn Channel> = channel;
        let opener = tokio::spawn({
            let channel = Arc::clone(&channel);
            async move { begin(&channel, Duration::from_millis(50)).await }
        });

        let frame = peer.recv().await.unwrap();
        let msg = Message::decode(&frame).unwrap();
        assert_eq!(msg.session, 0);
        assert_eq!(msg.endpoint, HANDSHAKE);
        assert_eq!(msg.data.len(), NONCE_SIZE);

        assert!(matches!(
            opener.await.unwrap(),
            Err(SessionError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_opens_get_distinct_ids() {
        let (channel, peer) = MemoryChannel::pair();
        let channel: Arc<dyn Channel> = channel;

        // Reply in reverse order so each opener first sees the other's reply.
        tokio::spawn(async move {
            let mut begins = Vec::new();
            while begins.len() < 2 {
                let frame = peer.recv().await.unwrap();
                begins.push(Message::decode(&frame).unwrap());
            }
            for (id, begin) in (10u16..).zip(begins.iter().rev()) {
                peer.send(Message::new(id, HANDSHAKE, begin.data.clone()).encode());
            }
        });

        let (a, b) = tokio::join!(
            Session::open(Arc::clone(&channel), Duration::from_secs(1)),
            Session::open(Arc::clone(&channel), Duration::from_secs(1)),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        let ids: HashSet<u16> = [a.id(), b.id()].into_iter().collect();
        assert_eq!(ids, HashSet::from([10, 11]));
    }

    #[tokio::test]
    async fn timeout_unsubscribes() {
        let (channel, _peer) = MemoryChannel::pair();
        let result = Session::open(channel.clone(), Duration::from_millis(20)).await;

        assert!(matches!(result, Err(SessionError::Timeout(_))));
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn closed_channel_fails_open() {
        let (channel, peer) = MemoryChannel::pair();
        let opener = tokio::spawn(Session::open(channel, Duration::from_secs(1)));
        peer.recv().await.unwrap();
        peer.close();

        assert!(matches!(
            opener.await.unwrap(),
            Err(SessionError::Transport(TransportError::Closed))
        ));
    }
}
