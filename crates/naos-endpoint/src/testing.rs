//! Scripted fake devices for unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use naos_frame::{Message, ACK, HANDSHAKE};
use naos_session::Session;
use naos_transport::{MemoryChannel, MemoryPeer};

/// Session ID assigned by fake devices.
pub(crate) const SESSION: u16 = 7;

/// Messages received by a fake device, handshakes excluded.
pub(crate) type Log = Arc<Mutex<Vec<Message>>>;

/// Run a fake device on the peer end of a memory channel.
pub(crate) fn spawn_device<F>(peer: MemoryPeer, mut handler: F) -> Log
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
                peer.send(Message::new(SESSION, HANDSHAKE, msg.data).encode());
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

/// Open a session against a fake device.
pub(crate) async fn open_session<F>(handler: F) -> (Session, Log)
where
    F: FnMut(&Message) -> Vec<Message> + Send + 'static,
{
    let (channel, peer) = MemoryChannel::pair();
    let log = spawn_device(peer, handler);
    let session = Session::open(channel, Duration::from_secs(1)).await.unwrap();
    (session, log)
}

/// An acknowledgement for `msg`.
pub(crate) fn ack(msg: &Message, code: u8) -> Message {
    Message::new(msg.session, ACK, Bytes::copy_from_slice(&[code]))
}

/// A reply to `msg` on its own endpoint.
pub(crate) fn reply(msg: &Message, data: impl Into<Bytes>) -> Message {
    Message::new(msg.session, msg.endpoint, data)
}
