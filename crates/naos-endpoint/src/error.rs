use naos_session::{DeviceError, ProtocolError, SessionError};

/// Errors that can occur in endpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// Session-level error, including timeouts and device acknowledgements.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The file system endpoint reported a POSIX error.
    #[error("posix error: errno {errno}")]
    Posix { errno: u8 },

    /// A signed record failed verification.
    #[error("signature mismatch")]
    Signature,

    /// The caller supplied an argument the endpoint cannot encode.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl EndpointError {
    /// Whether this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, EndpointError::Session(err) if err.is_timeout())
    }

    /// The device error carried by this error, if any.
    pub fn device_error(&self) -> Option<DeviceError> {
        match self {
            EndpointError::Session(SessionError::Device(err)) => Some(*err),
            _ => None,
        }
    }

    /// The protocol violation carried by this error, if any.
    pub fn protocol_error(&self) -> Option<ProtocolError> {
        match self {
            EndpointError::Session(SessionError::Protocol(err)) => Some(*err),
            _ => None,
        }
    }
}

impl From<ProtocolError> for EndpointError {
    fn from(err: ProtocolError) -> Self {
        EndpointError::Session(err.into())
    }
}

impl From<DeviceError> for EndpointError {
    fn from(err: DeviceError) -> Self {
        EndpointError::Session(err.into())
    }
}

pub type Result<T> = std::result::Result<T, EndpointError>;

/// Shorthand for a malformed reply.
pub(crate) fn invalid(reason: &'static str) -> EndpointError {
    ProtocolError::InvalidMessage(reason).into()
}
