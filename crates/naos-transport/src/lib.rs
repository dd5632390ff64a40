//! Channel abstraction and transports for NAOS devices.
//!
//! Provides a unified interface over the links a device can be reached by:
//! - Serial/UART lines carrying base64-encoded frames
//! - WebSocket connections to the device's HTTP server
//! - In-memory loopback links for simulators and tests
//!
//! This is the lowest layer of the stack. Every transport fans received frames
//! out through a [`Hub`] to subscribed [`Queue`]s.
//!
//! There is no BLE transport in this crate. A BLE link is provided by the
//! platform's Bluetooth stack; it implements [`Channel`] with the name `ble`,
//! writing one raw frame per characteristic write and dispatching each
//! indication into a [`Hub`].

pub mod error;
pub mod hub;
pub mod memory;
pub mod serial;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use error::{Result, TransportError};
pub use hub::{Hub, Queue};
pub use memory::{MemoryChannel, MemoryDevice, MemoryPeer};
pub use serial::{SerialChannel, SerialDevice};
pub use traits::{Channel, Device};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketChannel, WebSocketDevice};
