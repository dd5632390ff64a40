use std::time::Duration;

use naos_endpoint::EndpointError;
use naos_session::{DeviceError, SessionError};
use naos_transport::TransportError;

/// Errors that can occur in managed device operations.
#[derive(Debug, thiserror::Error)]
pub enum ManagedError {
    /// Endpoint or session error.
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    /// The device could not be opened.
    #[error("failed to open device: {0}")]
    Open(#[from] TransportError),

    /// Opening the device did not finish in time.
    #[error("opening device timed out after {0:?}")]
    OpenTimeout(Duration),

    /// The device has not been activated.
    #[error("device is not active")]
    Inactive,

    /// No parameter with this name is known.
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),
}

impl ManagedError {
    /// Whether this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            ManagedError::Endpoint(err) => err.is_timeout(),
            ManagedError::OpenTimeout(_) => true,
            _ => false,
        }
    }

    /// The device error carried by this error, if any.
    pub fn device_error(&self) -> Option<DeviceError> {
        match self {
            ManagedError::Endpoint(err) => err.device_error(),
            _ => None,
        }
    }
}

impl From<SessionError> for ManagedError {
    fn from(err: SessionError) -> Self {
        ManagedError::Endpoint(err.into())
    }
}

pub type Result<T> = std::result::Result<T, ManagedError>;
