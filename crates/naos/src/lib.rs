//! Host-side protocol stack for NAOS devices.
//!
//! NAOS devices speak a small framed protocol over serial lines, WebSockets
//! and BLE. This crate bundles the layers of the stack.
//!
//! # Crate Structure
//!
//! - [`transport`]: channels to devices (serial, WebSocket, in-memory)
//! - [`frame`]: message framing with session and endpoint addressing
//! - [`session`]: sessions, acknowledgements and session control
//! - [`endpoint`]: clients for the device endpoints (params, fs, update, ...)
//! - [`device`]: managed devices with caching and background polling
//!   (behind the `device` feature)

/// Re-export transport types.
pub mod transport {
    pub use naos_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use naos_frame::*;
}

/// Re-export session types.
pub mod session {
    pub use naos_session::*;
}

/// Re-export endpoint clients.
pub mod endpoint {
    pub use naos_endpoint::*;
}

/// Re-export managed device types (requires `device` feature).
#[cfg(feature = "device")]
pub mod device {
    pub use naos_device::*;
}
