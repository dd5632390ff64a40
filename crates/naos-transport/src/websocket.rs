use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::hub::{Hub, Queue};
use crate::traits::{Channel, Device};

/// Prefix of binary WebSocket messages carrying a frame.
pub const MESSAGE_PREFIX: &[u8] = b"msg#";

/// Channel over a WebSocket connection to a device's HTTP server.
pub struct WebSocketChannel<S> {
    hub: Hub,
    sink: Mutex<SplitSink<WebSocketStream<S>, WsMessage>>,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

impl WebSocketChannel<MaybeTlsStream<TcpStream>> {
    /// Connect to a device WebSocket endpoint (e.g. `ws://10.0.0.5/naos.sock`).
    pub async fn connect(url: &str) -> Result<Arc<Self>> {
        let (stream, _) = tokio_tungstenite::connect_async(url).await?;
        info!(url, "connected websocket channel");
        Ok(Self::from_stream(stream))
    }
}

impl<S> WebSocketChannel<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Wrap an established WebSocket stream.
    pub fn from_stream(stream: WebSocketStream<S>) -> Arc<Self> {
        let (sink, stream) = stream.split();
        let hub = Hub::new();
        let task = tokio::spawn(read_messages(stream, hub.clone()));
        Arc::new(Self {
            hub,
            sink: Mutex::new(sink),
            reader: StdMutex::new(Some(task)),
        })
    }
}

async fn read_messages<S>(mut stream: SplitStream<WebSocketStream<S>>, hub: Hub)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(message) = stream.next().await {
        match message {
            Ok(WsMessage::Binary(data)) => match data.strip_prefix(MESSAGE_PREFIX) {
                Some(frame) => hub.dispatch(Bytes::copy_from_slice(frame)),
                None => debug!(len = data.len(), "ignoring unprefixed binary message"),
            },
            Ok(WsMessage::Close(_)) => {
                debug!("websocket closed by device");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(%err, "websocket read failed");
                break;
            }
        }
    }
    hub.close();
}

#[async_trait]
impl<S> Channel for WebSocketChannel<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    fn name(&self) -> &'static str {
        "http"
    }

    fn subscribe(&self) -> Queue {
        self.hub.subscribe()
    }

    async fn write(&self, frame: &[u8]) -> Result<()> {
        if self.hub.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut data = Vec::with_capacity(MESSAGE_PREFIX.len() + frame.len());
        data.extend_from_slice(MESSAGE_PREFIX);
        data.extend_from_slice(frame);
        self.sink.lock().await.send(WsMessage::Binary(data)).await?;
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
        }
        self.hub.close();
        let _ = self.sink.lock().await.close().await;
    }

    fn valid(&self) -> bool {
        !self.hub.is_closed()
    }

    fn watch_closed(&self) -> watch::Receiver<bool> {
        self.hub.watch_closed()
    }
}

/// A device reachable over WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketDevice {
    url: String,
}

impl WebSocketDevice {
    /// Create a device for a WebSocket URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// The WebSocket URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Device for WebSocketDevice {
    fn id(&self) -> String {
        format!("http/{}", self.url)
    }

    async fn open(&self) -> Result<Arc<dyn Channel>> {
        let channel: Arc<dyn Channel> = WebSocketChannel::connect(&self.url).await?;
        Ok(channel)
    }
}
