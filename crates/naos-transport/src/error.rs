/// Errors that can occur in channel and transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the link to the device.
    #[error("failed to open {target}: {source}")]
    Open {
        target: String,
        source: std::io::Error,
    },

    /// An I/O error occurred on the underlying link.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket protocol or connection error.
    #[cfg(feature = "websocket")]
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The channel has been closed.
    #[error("channel closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
