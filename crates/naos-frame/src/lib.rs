//! Message framing with session and endpoint addressing for NAOS devices.
//!
//! Every frame exchanged with a device carries:
//! - A 1-byte version (always `1`)
//! - A 2-byte little-endian session ID
//! - A 1-byte endpoint ID
//!
//! followed by the payload. Transports carry exactly one frame per unit,
//! so no length prefix is needed.

pub mod codec;
pub mod endpoint;
pub mod error;

pub use codec::{decode_message, encode_message, Message, HEADER_SIZE, VERSION};
pub use endpoint::{
    endpoint_name, ACK, AUTH, CONTROL, DEBUG, END, FS, HANDSHAKE, METRICS, PARAMS, RELAY, UPDATE,
};
pub use error::{FrameError, Result};
