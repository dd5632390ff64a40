use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, TransportError};
use crate::hub::{Hub, Queue};
use crate::traits::{Channel, Device};

/// Line prefix marking an encoded frame in the serial stream.
pub const LINE_PREFIX: &[u8] = b"NAOS!";

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Channel over a serial byte stream.
///
/// Frames are exchanged as `\nNAOS!<base64>\n` lines. All other lines are
/// console output of the device and are only traced.
pub struct SerialChannel {
    hub: Hub,
    writer: Mutex<BoxedWriter>,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

impl SerialChannel {
    /// Create a channel from separate read and write halves.
    ///
    /// Must be called within a tokio runtime; a reader task is spawned.
    pub fn new<R, W>(reader: R, writer: W) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let hub = Hub::new();
        let task = tokio::spawn(read_lines(reader, hub.clone()));
        Arc::new(Self {
            hub,
            writer: Mutex::new(Box::new(writer)),
            reader: StdMutex::new(Some(task)),
        })
    }

    /// Create a channel from a bidirectional stream.
    pub fn from_stream<S>(stream: S) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer)
    }
}

async fn read_lines<R: AsyncRead + Unpin>(reader: R, hub: Hub) {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => {
                debug!("serial stream reached EOF");
                break;
            }
            Ok(_) => match decode_line(&line) {
                Some(Ok(frame)) => hub.dispatch(Bytes::from(frame)),
                Some(Err(err)) => warn!(%err, "dropping undecodable serial frame"),
                None => trace!(line = %String::from_utf8_lossy(&line).trim_end(), "device output"),
            },
            Err(err) => {
                warn!(%err, "serial read failed");
                break;
            }
        }
    }
    hub.close();
}

/// Encode a frame as a serial line.
pub fn encode_line(frame: &[u8]) -> Vec<u8> {
    let mut line = Vec::with_capacity(frame.len() * 4 / 3 + 12);
    line.push(b'\n');
    line.extend_from_slice(LINE_PREFIX);
    line.extend_from_slice(STANDARD.encode(frame).as_bytes());
    line.push(b'\n');
    line
}

/// Decode a serial line.
///
/// Returns `None` for lines that do not carry a frame.
pub fn decode_line(line: &[u8]) -> Option<std::result::Result<Vec<u8>, base64::DecodeError>> {
    let line = line.trim_ascii();
    let payload = line.strip_prefix(LINE_PREFIX)?;
    Some(STANDARD.decode(payload))
}

#[async_trait]
impl Channel for SerialChannel {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn subscribe(&self) -> Queue {
        self.hub.subscribe()
    }

    async fn write(&self, frame: &[u8]) -> Result<()> {
        if self.hub.is_closed() {
            return Err(TransportError::Closed);
        }
        let line = encode_line(frame);
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) {
        let task = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
            debug!("serial channel closed");
        }
        self.hub.close();
        let _ = self.writer.lock().await.shutdown().await;
    }

    fn valid(&self) -> bool {
        !self.hub.is_closed()
    }

    fn watch_closed(&self) -> watch::Receiver<bool> {
        self.hub.watch_closed()
    }
}

/// A device attached to a serial character device (e.g. `/dev/ttyUSB0`).
///
/// The port is expected to be configured (baud rate, raw mode) beforehand.
#[derive(Debug, Clone)]
pub struct SerialDevice {
    path: PathBuf,
}

impl SerialDevice {
    /// Create a device for a serial port path.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// The serial port path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Device for SerialDevice {
    fn id(&self) -> String {
        format!("serial/{}", self.path.display())
    }

    async fn open(&self) -> Result<Arc<dyn Channel>> {
        let open_error = |source| TransportError::Open {
            target: self.path.display().to_string(),
            source,
        };
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(open_error)?;
        let reader = file.try_clone().map_err(open_error)?;

        info!(path = ?self.path, "opened serial channel");
        let channel: Arc<dyn Channel> = SerialChannel::new(
            tokio::fs::File::from_std(reader),
            tokio::fs::File::from_std(file),
        );
        Ok(channel)
    }
}
