//! Chunk sizing and acknowledgement cadence shared by bulk transfers.

use std::time::Duration;

use naos_frame::HEADER_SIZE;
use naos_session::{Session, SessionError, DEFAULT_TIMEOUT};
use tracing::debug;

use crate::error::Result;

/// Range size used for reads when the MTU is unavailable.
pub const FALLBACK_READ_CHUNK: usize = 5000;

/// Chunk size used for writes when the MTU is unavailable.
pub const FALLBACK_WRITE_CHUNK: usize = 500;

/// Every n-th written chunk is acknowledged; the rest are sent silently.
pub const DEFAULT_ACK_INTERVAL: usize = 10;

/// Progress callback receiving `(done, total)` in bytes.
pub type Progress<'a> = &'a mut (dyn FnMut(usize, usize) + Send);

/// Bulk transfer settings.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Fixed range size for reads; derived from the MTU when `None`.
    pub read_chunk: Option<usize>,
    /// Fixed chunk size for writes; derived from the MTU when `None`.
    pub write_chunk: Option<usize>,
    /// Acknowledgement cadence for writes.
    pub ack_interval: usize,
    /// Timeout for every acknowledged exchange.
    pub timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            read_chunk: None,
            write_chunk: None,
            ack_interval: DEFAULT_ACK_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl TransferConfig {
    /// Whether the chunk at `index` is sent with acknowledgement.
    pub fn acked(&self, index: usize) -> bool {
        index % self.ack_interval.max(1) == 0
    }

    /// Range size for reads whose replies carry `overhead` bytes of header.
    ///
    /// A range spans as many MTU-sized reply frames as one write burst.
    pub async fn read_chunk(&self, session: &mut Session, overhead: usize) -> Result<usize> {
        if let Some(size) = self.read_chunk {
            return Ok(size.max(1));
        }
        Ok(match payload_size(session, overhead, self.timeout).await? {
            Some(size) => size * self.ack_interval.max(1),
            None => FALLBACK_READ_CHUNK,
        })
    }

    /// Chunk size for writes whose commands carry `overhead` bytes of header.
    pub async fn write_chunk(&self, session: &mut Session, overhead: usize) -> Result<usize> {
        if let Some(size) = self.write_chunk {
            return Ok(size.max(1));
        }
        Ok(payload_size(session, overhead, self.timeout)
            .await?
            .unwrap_or(FALLBACK_WRITE_CHUNK))
    }
}

async fn payload_size(
    session: &mut Session,
    overhead: usize,
    timeout: Duration,
) -> Result<Option<usize>> {
    match session.get_mtu(timeout).await {
        Ok(mtu) => {
            let size = (mtu as usize).saturating_sub(HEADER_SIZE + overhead);
            Ok((size > 0).then_some(size))
        }
        Err(SessionError::Device(err)) => {
            debug!(%err, "mtu unavailable, using fallback chunk size");
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}
