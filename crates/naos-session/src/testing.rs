//! Scripted fake devices for unit tests.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use naos_frame::{Message, ACK, HANDSHAKE};
use naos_transport::MemoryPeer;

/// Messages received by a fake device, handshakes excluded.
pub(crate) type Log = Arc<Mutex<Vec<Message>>>;

/// Run a fake device on the peer end of a memory channel.
///
/// Handshakes are answered with `session`. Every other message is logged and
/// passed to `handler`, whose replies are sent back in order.
pub(crate) fn spawn_device<F>(peer: MemoryPeer, session: u16, mut handler: F) -> Log
where
    F: FnMut(&Message) -> Vec<Message> + Send + 'static,
{
    let log = Log::default();
    let seen = Arc::clone(&log);
    tokio::spawn(async move {
        while let Some(frame) = peer.recv().await {
            let Ok(msg) = Message::decode(&frame) else {
                continue;
            };
            if msg.endpoint == HANDSHAKE {
                peer.send(Message::new(session, HANDSHAKE, msg.data).encode());
                continue;
            }
            seen.lock().unwrap().push(msg.clone());
            for reply in handler(&msg) {
                peer.send(reply.encode());
            }
        }
    });
    log
}

/// An acknowledgement for `msg`.
pub(crate) fn ack(msg: &Message, code: u8) -> Message {
    Message::new(msg.session, ACK, Bytes::copy_from_slice(&[code]))
}
