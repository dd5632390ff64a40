//! Endpoint IDs.
//!
//! Endpoints `0x00` and `0xFD`-`0xFF` are reserved for session management.
//! Endpoints `0x01`-`0x07` address the built-in device services.

/// Session handshake (begin).
pub const HANDSHAKE: u8 = 0x00;

/// Parameter access.
pub const PARAMS: u8 = 0x01;

/// Firmware update.
pub const UPDATE: u8 = 0x02;

/// Filesystem access.
pub const FS: u8 = 0x03;

/// Relay tunneling to downstream devices.
pub const RELAY: u8 = 0x04;

/// Metrics.
pub const METRICS: u8 = 0x05;

/// Device identity and attestation.
pub const AUTH: u8 = 0x06;

/// Coredumps and log streaming.
pub const DEBUG: u8 = 0x07;

/// Session control (status, unlock, MTU).
pub const CONTROL: u8 = 0xFD;

/// Acknowledgements, ping and query.
pub const ACK: u8 = 0xFE;

/// Session end.
pub const END: u8 = 0xFF;

/// All built-in application endpoints in ascending order.
pub const APPLICATION: [u8; 7] = [PARAMS, UPDATE, FS, RELAY, METRICS, AUTH, DEBUG];

/// Returns a human-readable name for an endpoint ID.
pub fn endpoint_name(id: u8) -> &'static str {
    match id {
        HANDSHAKE => "HANDSHAKE",
        PARAMS => "PARAMS",
        UPDATE => "UPDATE",
        FS => "FS",
        RELAY => "RELAY",
        METRICS => "METRICS",
        AUTH => "AUTH",
        DEBUG => "DEBUG",
        CONTROL => "CONTROL",
        ACK => "ACK",
        END => "END",
        _ => "CUSTOM",
    }
}

/// Returns true if the endpoint ID is reserved for session management.
pub fn is_reserved(id: u8) -> bool {
    matches!(id, HANDSHAKE | CONTROL | ACK | END)
}
