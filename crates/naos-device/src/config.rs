use std::time::Duration;

use naos_endpoint::TransferConfig;
use naos_session::{DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_TIMEOUT};

/// Managed device settings.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Timeout for opening the channel and each session handshake.
    pub open_timeout: Duration,
    /// Timeout for each request/reply exchange.
    pub request_timeout: Duration,
    /// Interval of the liveness ping on the shared session.
    pub ping_interval: Duration,
    /// Interval of the parameter change poll.
    pub poll_interval: Duration,
    /// Timeout for the device to confirm ended sessions; zero does not wait.
    pub end_timeout: Duration,
    /// Capacity of the event stream; slow subscribers observe lag.
    pub event_capacity: usize,
    /// Settings for bulk transfers on dedicated sessions.
    pub transfer: TransferConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            open_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            request_timeout: DEFAULT_TIMEOUT,
            ping_interval: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            end_timeout: Duration::ZERO,
            event_capacity: 64,
            transfer: TransferConfig::default(),
        }
    }
}
