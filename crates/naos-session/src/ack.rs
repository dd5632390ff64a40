//! Acknowledgement codes carried as single bytes on the `0xFE` endpoint.

use crate::error::{DeviceError, ProtocolError, Result};

/// Request succeeded.
pub const ACK_OK: u8 = 1;
/// The addressed endpoint does not exist.
pub const ACK_INVALID_ENDPOINT: u8 = 2;
/// The command data was rejected.
pub const ACK_INVALID_DATA: u8 = 3;
/// The endpoint failed to process the command.
pub const ACK_ENDPOINT_ERROR: u8 = 4;
/// The session is locked.
pub const ACK_SESSION_LOCKED: u8 = 5;

/// Decode an acknowledgement code.
pub fn check(code: u8) -> Result<()> {
    match code {
        ACK_OK => Ok(()),
        ACK_INVALID_ENDPOINT => Err(DeviceError::InvalidEndpoint.into()),
        ACK_INVALID_DATA => Err(DeviceError::InvalidData.into()),
        ACK_ENDPOINT_ERROR => Err(DeviceError::EndpointError.into()),
        ACK_SESSION_LOCKED => Err(DeviceError::SessionLocked.into()),
        _ => Err(ProtocolError::InvalidMessage("unknown acknowledgement code").into()),
    }
}

/// The code a device would send for an error, if any.
pub fn code_for(err: DeviceError) -> Option<u8> {
    match err {
        DeviceError::InvalidSession => None,
        DeviceError::InvalidEndpoint => Some(ACK_INVALID_ENDPOINT),
        DeviceError::InvalidData => Some(ACK_INVALID_DATA),
        DeviceError::EndpointError => Some(ACK_ENDPOINT_ERROR),
        DeviceError::SessionLocked => Some(ACK_SESSION_LOCKED),
    }
}
