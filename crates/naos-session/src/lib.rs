//! Session layer for NAOS devices.
//!
//! A [`Session`] is one logical conversation with a device, multiplexed by a
//! device-assigned ID over a shared channel. Sessions provide:
//! - The begin handshake (random nonce echoed with the assigned ID)
//! - Acknowledged and fire-and-forget sends
//! - Streamed replies terminated by an acknowledgement
//! - Status, unlock and MTU queries on the control endpoint
//! - Graceful end with guaranteed unsubscription

pub mod ack;
pub mod control;
pub mod error;
pub mod handshake;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use control::SessionStatus;
pub use error::{DeviceError, ProtocolError, Result, SessionError};
pub use handshake::{DEFAULT_HANDSHAKE_TIMEOUT, NONCE_SIZE};
pub use session::{Session, SessionWriter, DEFAULT_TIMEOUT};
