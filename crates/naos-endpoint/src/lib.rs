//! Endpoint clients for NAOS devices.
//!
//! Every endpoint is a small sub-protocol spoken over a [`Session`]:
//! - [`params`]: named, typed parameters with delta synchronization
//! - [`fs`]: file system access with chunked transfers
//! - [`update`]: firmware updates
//! - [`metrics`]: scalar and N-dimensional metrics
//! - [`relay`]: tunnelling to downstream devices
//! - [`auth`]: provisioning and attestation
//! - [`debug`]: coredumps and log streaming
//!
//! The operations are free functions taking the session as their first
//! argument. Callers serialize access to shared sessions themselves.
//!
//! [`Session`]: naos_session::Session

pub mod auth;
pub mod debug;
pub mod error;
pub mod fs;
pub mod metrics;
pub mod params;
pub mod relay;
pub mod transfer;
pub mod update;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::AuthData;
pub use error::{EndpointError, Result};
pub use fs::FsInfo;
pub use metrics::{MetricInfo, MetricKind, MetricLayout, MetricType, MetricValues};
pub use params::{ParamInfo, ParamMode, ParamType, ParamUpdate, ParamValue};
pub use relay::{ChannelSource, RelayChannel, RelayConfig, RelayDevice, SessionSource};
pub use transfer::{Progress, TransferConfig};
