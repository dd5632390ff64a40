use std::fmt;
use std::io;

use naos_device::ManagedError;
use naos_endpoint::EndpointError;
use naos_session::{DeviceError, SessionError};
use naos_transport::TransportError;

// Process exit codes.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound => USAGE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    let code = match &err {
        TransportError::Open { source, .. }
            if source.kind() == io::ErrorKind::PermissionDenied =>
        {
            PERMISSION_DENIED
        }
        TransportError::Io(source) if source.kind() == io::ErrorKind::TimedOut => TIMEOUT,
        _ => TRANSPORT_ERROR,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn session_error(context: &str, err: SessionError) -> CliError {
    let code = match err {
        SessionError::Transport(err) => return transport_error(context, err),
        SessionError::Timeout(_) => TIMEOUT,
        SessionError::Device(DeviceError::SessionLocked) => PERMISSION_DENIED,
        SessionError::Device(DeviceError::InvalidData) => DATA_INVALID,
        SessionError::Device(_) => FAILURE,
        SessionError::Frame(_) | SessionError::Protocol(_) => DATA_INVALID,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn endpoint_error(context: &str, err: EndpointError) -> CliError {
    match err {
        EndpointError::Session(err) => session_error(context, err),
        EndpointError::InvalidArgument(_) => CliError::new(USAGE, format!("{context}: {err}")),
        EndpointError::Signature => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        EndpointError::Posix { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn managed_error(context: &str, err: ManagedError) -> CliError {
    match err {
        ManagedError::Endpoint(err) => endpoint_error(context, err),
        ManagedError::Open(err) => transport_error(context, err),
        ManagedError::OpenTimeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        ManagedError::UnknownParameter(_) => CliError::new(USAGE, format!("{context}: {err}")),
        ManagedError::Inactive => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn missing_device_is_a_transport_error() {
        let err = TransportError::Open {
            target: "/dev/ttyNAOS".into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert_eq!(managed_error("open", ManagedError::Open(err)).code, TRANSPORT_ERROR);
    }

    #[test]
    fn device_errors_map_to_codes() {
        let locked = EndpointError::from(DeviceError::SessionLocked);
        assert_eq!(endpoint_error("x", locked).code, PERMISSION_DENIED);

        let timeout = EndpointError::from(SessionError::Timeout(Duration::from_secs(1)));
        assert_eq!(endpoint_error("x", timeout).code, TIMEOUT);

        let closed = SessionError::Transport(TransportError::Closed);
        assert_eq!(session_error("x", closed).code, TRANSPORT_ERROR);

        let unknown = ManagedError::UnknownParameter("foo".into());
        let err = managed_error("get", unknown);
        assert_eq!(err.code, USAGE);
        assert_eq!(err.message, "get: unknown parameter: foo");
    }
}
