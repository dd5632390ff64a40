//! Debug endpoint client: coredumps and live log streaming.

use std::time::Duration;

use naos_frame::{ACK, DEBUG, END};
use naos_session::{ack, DeviceError, ProtocolError, Session, DEFAULT_TIMEOUT};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{invalid, Result};
use crate::transfer::{Progress, TransferConfig};

const CMD_CHECK: u8 = 0;
const CMD_READ: u8 = 1;
const CMD_DELETE: u8 = 2;
const CMD_START_LOG: u8 = 3;
const CMD_STOP_LOG: u8 = 4;

/// Header bytes of a coredump chunk (`[offset u32]`).
const READ_OVERHEAD: usize = 4;

/// Log streaming settings.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Timeout of the acknowledged start and of every read.
    pub timeout: Duration,
    /// Silence after which the stream is restarted.
    pub restart_after: Duration,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            restart_after: Duration::from_secs(20),
        }
    }
}

/// Size and crash reason of the stored coredump. A size of zero means
/// there is none.
pub async fn check(session: &mut Session, timeout: Duration) -> Result<(u32, String)> {
    session.write(DEBUG, &[CMD_CHECK]).await?;
    let reply = session
        .receive(DEBUG, false, timeout)
        .await?
        .ok_or(ProtocolError::UnexpectedAck)?;
    if reply.len() < 4 {
        return Err(invalid("coredump info too short"));
    }

    let size = u32::from_le_bytes([reply[0], reply[1], reply[2], reply[3]]);
    let reason = String::from_utf8_lossy(&reply[4..]).into_owned();
    Ok((size, reason))
}

/// Read a range of the coredump, verifying chunk offsets.
pub async fn read(
    session: &mut Session,
    offset: u32,
    len: u32,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let mut cmd = Vec::with_capacity(9);
    cmd.push(CMD_READ);
    cmd.extend_from_slice(&offset.to_le_bytes());
    cmd.extend_from_slice(&len.to_le_bytes());
    session.write(DEBUG, &cmd).await?;

    let mut data = Vec::with_capacity(len as usize);
    while let Some(reply) = session.receive(DEBUG, true, timeout).await? {
        if reply.len() < READ_OVERHEAD {
            return Err(invalid("coredump chunk too short"));
        }
        let at = u32::from_le_bytes([reply[0], reply[1], reply[2], reply[3]]);
        if at as usize != offset as usize + data.len() {
            return Err(invalid("coredump chunk at unexpected offset"));
        }
        data.extend_from_slice(&reply[READ_OVERHEAD..]);
    }

    Ok(data)
}

/// Read the whole coredump.
pub async fn read_coredump(
    session: &mut Session,
    config: &TransferConfig,
    progress: Progress<'_>,
) -> Result<Vec<u8>> {
    let (size, _) = check(session, config.timeout).await?;
    let chunk = config.read_chunk(session, READ_OVERHEAD).await?;
    let chunk = u32::try_from(chunk).unwrap_or(u32::MAX);

    let mut data = Vec::with_capacity(size as usize);
    while (data.len() as u32) < size {
        let done = data.len() as u32;
        let part = read(session, done, chunk.min(size - done), config.timeout).await?;
        if part.is_empty() {
            return Err(invalid("coredump ended early"));
        }
        data.extend_from_slice(&part);
        progress(data.len(), size as usize);
    }

    Ok(data)
}

/// Delete the stored coredump.
pub async fn delete(session: &mut Session, timeout: Duration) -> Result<()> {
    session.send(DEBUG, &[CMD_DELETE], timeout).await?;
    Ok(())
}

/// Stream device log lines until `token` is cancelled.
///
/// Acknowledgements arriving on the stream are heartbeats, not terminators.
/// When nothing has arrived for `restart_after`, the stream is restarted
/// without waiting for an acknowledgement. Cancellation sends a stop command.
pub async fn stream_log(
    session: &mut Session,
    token: &CancellationToken,
    on_line: &mut (dyn FnMut(&str) + Send),
    config: &LogConfig,
) -> Result<()> {
    session.send(DEBUG, &[CMD_START_LOG], config.timeout).await?;

    let mut last = Instant::now();
    loop {
        let result = tokio::select! {
            _ = token.cancelled() => {
                session.write(DEBUG, &[CMD_STOP_LOG]).await?;
                return Ok(());
            }
            result = session.read(config.timeout) => result,
        };

        match result {
            Ok(msg) if msg.endpoint == ACK => {
                if let [code] = msg.data[..] {
                    ack::check(code)?;
                }
                last = Instant::now();
            }
            Ok(msg) if msg.endpoint == DEBUG => {
                last = Instant::now();
                on_line(&String::from_utf8_lossy(&msg.data));
            }
            Ok(msg) if msg.endpoint == END => return Err(DeviceError::InvalidSession.into()),
            Ok(_) => return Err(invalid("unexpected message on log stream")),
            Err(err) if err.is_timeout() => {
                if last.elapsed() < config.restart_after {
                    continue;
                }
                debug!("log stream silent, restarting");
                session.write(DEBUG, &[CMD_START_LOG]).await?;
                last = Instant::now();
            }
            Err(err) => return Err(err.into()),
        }
    }
}
