use std::time::Duration;

/// Violations of the message exchange rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A reply had an unexpected shape, endpoint or content.
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),

    /// A positive acknowledgement arrived where data was expected.
    #[error("unexpected acknowledgement")]
    UnexpectedAck,

    /// A reply carried an unknown type tag.
    #[error("unknown message")]
    UnknownMessage,
}

/// Errors reported by the device through acknowledgements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// The device does not know or has ended the session.
    #[error("invalid session")]
    InvalidSession,

    /// The addressed endpoint does not exist.
    #[error("invalid endpoint")]
    InvalidEndpoint,

    /// The endpoint rejected the command data.
    #[error("invalid data")]
    InvalidData,

    /// The endpoint failed to process the command.
    #[error("endpoint error")]
    EndpointError,

    /// The session must be unlocked first.
    #[error("session locked")]
    SessionLocked,
}

/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] naos_transport::TransportError),

    /// A received frame could not be decoded.
    #[error("invalid message: {0}")]
    Frame(#[from] naos_frame::FrameError),

    /// No matching frame arrived before the deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Protocol violation.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error reported by the device.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
}

impl SessionError {
    /// Whether this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SessionError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
