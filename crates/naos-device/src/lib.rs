//! Managed device orchestration for NAOS devices.
//!
//! A [`ManagedDevice`] keeps a channel to one device open, shares a single
//! lazily opened session between foreground requests and its background
//! pinger and parameter poller, and caches what the device offers:
//! capabilities, parameters and their values, relays, metrics and the MTU.
//! Changes are announced through a [`DeviceEvent`] stream.
//!
//! A [`Manager`] keeps track of several managed devices.

pub mod config;
pub mod error;
pub mod event;
pub mod managed;
pub mod manager;

#[cfg(test)]
pub(crate) mod simulator;

pub use config::DeviceConfig;
pub use error::{ManagedError, Result};
pub use event::{Capabilities, DeviceEvent};
pub use managed::ManagedDevice;
pub use manager::Manager;
