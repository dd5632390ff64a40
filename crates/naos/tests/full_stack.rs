//! End-to-end exchanges through every layer over the in-memory transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use naos::device::{DeviceConfig, DeviceEvent, ManagedDevice};
use naos::endpoint::{fs, TransferConfig};
use naos::frame::{Message, ACK, CONTROL, END, FS, HANDSHAKE};
use naos::transport::{MemoryChannel, MemoryDevice, MemoryPeer};

const MTU: u16 = 64;

/// A device with a single file, answering in chunks of at most 40 bytes.
struct FileDevice {
    file: Vec<u8>,
    reads: AtomicUsize,
}

impl FileDevice {
    fn handle(&self, msg: &Message) -> Vec<Message> {
        let id = msg.session;
        let ack = |code: u8| Message::new(id, ACK, vec![code]);
        let data = msg.data.as_ref();

        match (msg.endpoint, data) {
            (HANDSHAKE, _) => vec![Message::new(0x10, HANDSHAKE, msg.data.clone())],
            (END, _) => vec![Message::new(id, END, Bytes::new())],
            (ACK, _) => vec![ack(1)],
            (CONTROL, [0]) => vec![Message::new(id, CONTROL, vec![0])],
            (CONTROL, [2]) => vec![Message::new(id, CONTROL, MTU.to_le_bytes().to_vec())],
            (FS, []) => vec![ack(1)],
            (FS, [0, ..]) => {
                let mut info = vec![1, 0];
                info.extend_from_slice(&(self.file.len() as u32).to_le_bytes());
                vec![Message::new(id, FS, info)]
            }
            (FS, [2, ..]) | (FS, [5]) => vec![ack(1)],
            (FS, [3, rest @ ..]) => {
                self.reads.fetch_add(1, Ordering::SeqCst);
                let offset = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
                let len = u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
                let end = (offset + len).min(self.file.len());

                let mut replies: Vec<Message> = (offset..end)
                    .step_by(40)
                    .map(|start| {
                        let mut chunk = vec![2];
                        chunk.extend_from_slice(&(start as u32).to_le_bytes());
                        chunk.extend_from_slice(&self.file[start..(start + 40).min(end)]);
                        Message::new(id, FS, chunk)
                    })
                    .collect();
                replies.push(ack(1));
                replies
            }
            _ => vec![ack(2)],
        }
    }
}

fn serve(device: Arc<FileDevice>, peer: MemoryPeer) {
    tokio::spawn(async move {
        while let Some(frame) = peer.recv().await {
            let msg = Message::decode(&frame).expect("client frames should decode");
            for reply in device.handle(&msg) {
                peer.send(reply.encode());
            }
        }
    });
}

fn managed(file: Vec<u8>) -> (ManagedDevice, Arc<FileDevice>) {
    let device = Arc::new(FileDevice {
        file,
        reads: AtomicUsize::new(0),
    });
    let served = Arc::clone(&device);
    let memory = MemoryDevice::new("files", move || {
        let (channel, peer) = MemoryChannel::pair();
        serve(Arc::clone(&served), peer);
        channel
    });

    let config = DeviceConfig {
        request_timeout: Duration::from_secs(1),
        transfer: TransferConfig {
            timeout: Duration::from_secs(1),
            ..TransferConfig::default()
        },
        ..DeviceConfig::default()
    };
    (ManagedDevice::new(Arc::new(memory), config), device)
}

#[tokio::test]
async fn file_read_is_split_by_mtu() {
    let file: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    let (device, fake) = managed(file.clone());
    device.activate().await.expect("device should activate");

    let mut session = device.new_session().await.expect("session should open");
    let mut seen = Vec::new();
    let data = fs::read_file(
        &mut session,
        "/data.bin",
        &device.config().transfer,
        &mut |done, total| seen.push((done, total)),
    )
    .await
    .expect("file should read");

    assert_eq!(data, file);
    // (64 - 4 - 5) * 10 bytes per range
    assert_eq!(fake.reads.load(Ordering::SeqCst), 6);
    assert_eq!(seen.last(), Some(&(3000, 3000)));

    session.end(Duration::from_secs(1)).await.expect("session should end");
}

#[tokio::test]
async fn refresh_reports_capabilities_and_mtu() {
    let (device, _) = managed(Vec::new());
    let mut events = device.subscribe();
    device.activate().await.expect("device should activate");
    device.refresh().await.expect("refresh should succeed");

    let caps = device.capabilities().await;
    assert!(caps.fs);
    assert!(!caps.params && !caps.relay);
    assert_eq!(device.mtu().await, Some(MTU));
    assert!(!device.is_locked().await);

    device.deactivate().await;
    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    assert_eq!(
        received,
        vec![
            DeviceEvent::Activated,
            DeviceEvent::Refreshed,
            DeviceEvent::Disconnected
        ]
    );
}
