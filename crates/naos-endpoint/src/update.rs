//! Firmware update endpoint client.

use std::time::Duration;

use naos_frame::UPDATE;
use naos_session::{ProtocolError, Session};
use tracing::{debug, warn};

use crate::error::{invalid, EndpointError, Result};
use crate::transfer::{Progress, TransferConfig};

const CMD_BEGIN: u8 = 0;
const CMD_WRITE: u8 = 1;
const CMD_ABORT: u8 = 2;
const CMD_FINISH: u8 = 3;

const REPLY_BEGUN: u8 = 0;
const REPLY_FINISHED: u8 = 1;

const WRITE_SILENT: u8 = 1 << 0;

/// Header bytes of a write command (`[1][flags]`).
const WRITE_OVERHEAD: usize = 2;

/// Timeout for the device to verify and commit an image.
pub const FINISH_TIMEOUT: Duration = Duration::from_secs(30);

/// Announce an update of `size` bytes.
pub async fn begin(session: &mut Session, size: u32, timeout: Duration) -> Result<()> {
    let mut cmd = vec![CMD_BEGIN];
    cmd.extend_from_slice(&size.to_le_bytes());
    session.write(UPDATE, &cmd).await?;
    expect_reply(session, REPLY_BEGUN, timeout).await
}

/// Write the next image chunk.
///
/// A zero `ack_timeout` sends the chunk silently.
pub async fn write(session: &mut Session, chunk: &[u8], ack_timeout: Duration) -> Result<()> {
    let silent = ack_timeout.is_zero();
    let mut cmd = Vec::with_capacity(WRITE_OVERHEAD + chunk.len());
    cmd.extend_from_slice(&[CMD_WRITE, if silent { WRITE_SILENT } else { 0 }]);
    cmd.extend_from_slice(chunk);
    session.send(UPDATE, &cmd, ack_timeout).await?;
    Ok(())
}

/// Abort a begun update.
pub async fn abort(session: &mut Session, timeout: Duration) -> Result<()> {
    session.send(UPDATE, &[CMD_ABORT], timeout).await?;
    Ok(())
}

/// Commit the written image.
pub async fn finish(session: &mut Session, timeout: Duration) -> Result<()> {
    session.write(UPDATE, &[CMD_FINISH]).await?;
    expect_reply(session, REPLY_FINISHED, timeout).await
}

/// Transfer and commit a complete image.
///
/// Chunks follow the acknowledgement cadence of the transfer settings. A
/// failed transfer is aborted on a best-effort basis.
pub async fn run(
    session: &mut Session,
    image: &[u8],
    config: &TransferConfig,
    progress: Progress<'_>,
) -> Result<()> {
    let size = u32::try_from(image.len()).map_err(|_| {
        EndpointError::InvalidArgument(format!("image of {} bytes is too large", image.len()))
    })?;
    let chunk = config.write_chunk(session, WRITE_OVERHEAD).await?;

    begin(session, size, config.timeout).await?;
    debug!(size, chunk, "update begun");

    let mut done = 0;
    for (index, part) in image.chunks(chunk).enumerate() {
        let ack = if config.acked(index) {
            config.timeout
        } else {
            Duration::ZERO
        };
        if let Err(err) = write(session, part, ack).await {
            warn!(%err, done, "update write failed, aborting");
            let _ = abort(session, Duration::ZERO).await;
            return Err(err);
        }
        done += part.len();
        progress(done, image.len());
    }

    finish(session, FINISH_TIMEOUT.max(config.timeout)).await
}

async fn expect_reply(session: &mut Session, tag: u8, timeout: Duration) -> Result<()> {
    let reply = session
        .receive(UPDATE, false, timeout)
        .await?
        .ok_or(ProtocolError::UnexpectedAck)?;
    if reply[..] != [tag] {
        return Err(invalid("unexpected update reply"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use naos_frame::Message;

    use super::*;
    use crate::testing::{ack, open_session, reply};

    fn updater(msg: &Message) -> Vec<Message> {
        match msg.data[0] {
            CMD_BEGIN => vec![reply(msg, vec![REPLY_BEGUN])],
            CMD_WRITE if msg.data[1] & WRITE_SILENT != 0 => Vec::new(),
            CMD_WRITE | CMD_ABORT => vec![ack(msg, 1)],
            CMD_FINISH => vec![reply(msg, vec![REPLY_FINISHED])],
            _ => vec![ack(msg, 3)],
        }
    }

    #[tokio::test]
    async fn run_streams_with_write_cadence() {
        let (mut session, log) = open_session(updater).await;
        let image = vec![0x5A; 2500];
        let config = TransferConfig {
            write_chunk: Some(100),
            ..TransferConfig::default()
        };

        let mut last = (0, 0);
        run(&mut session, &image, &config, &mut |done, total| last = (done, total))
            .await
            .unwrap();
        assert_eq!(last, (2500, 2500));

        let log = log.lock().unwrap();
        assert_eq!(log[0].data.as_ref(), &[CMD_BEGIN, 0xC4, 0x09, 0, 0]);
        let writes: Vec<&Message> = log.iter().filter(|m| m.data[0] == CMD_WRITE).collect();
        assert_eq!(writes.len(), 25);
        let acked: Vec<usize> = writes
            .iter()
            .enumerate()
            .filter(|(_, m)| m.data[1] & WRITE_SILENT == 0)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(acked, vec![0, 10, 20]);
        let body: Vec<u8> = writes.iter().flat_map(|m| m.data[2..].to_vec()).collect();
        assert_eq!(body, image);
        assert_eq!(log.last().unwrap().data.as_ref(), &[CMD_FINISH]);
    }

    #[tokio::test]
    async fn failed_write_aborts() {
        let (mut session, log) = open_session(|msg| match msg.data[0] {
            CMD_WRITE => vec![ack(msg, 4)],
            _ => updater(msg),
        })
        .await;
        let config = TransferConfig {
            write_chunk: Some(10),
            ..TransferConfig::default()
        };

        let err = run(&mut session, &[1; 30], &config, &mut |_, _| {})
            .await
            .unwrap_err();
        assert_eq!(
            err.device_error(),
            Some(naos_session::DeviceError::EndpointError)
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(log.lock().unwrap().last().unwrap().data.as_ref(), &[CMD_ABORT]);
    }

    #[tokio::test]
    async fn begin_rejects_unexpected_reply() {
        let (mut session, _log) =
            open_session(|msg| vec![reply(msg, vec![REPLY_FINISHED])]).await;
        let err = begin(&mut session, 10, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.protocol_error().is_some());
    }
}
