//! File system endpoint client.
//!
//! Failed commands are answered with `[0][errno]` instead of an
//! acknowledgement; they surface as [`EndpointError::Posix`].

use std::time::Duration;

use bytes::Bytes;
use naos_frame::FS;
use naos_session::{ProtocolError, Session};
use serde::Serialize;
use tracing::debug;

use crate::error::{invalid, EndpointError, Result};
use crate::transfer::{Progress, TransferConfig};

/// Create the file if it does not exist.
pub const OPEN_CREATE: u8 = 1 << 0;
/// Fail if the file already exists.
pub const OPEN_EXCLUSIVE: u8 = 1 << 1;
/// Truncate the file when opening.
pub const OPEN_TRUNCATE: u8 = 1 << 2;
/// Append all writes.
pub const OPEN_APPEND: u8 = 1 << 3;

const WRITE_SILENT: u8 = 1 << 0;

const CMD_STAT: u8 = 0;
const CMD_LIST: u8 = 1;
const CMD_OPEN: u8 = 2;
const CMD_READ: u8 = 3;
const CMD_WRITE: u8 = 4;
const CMD_CLOSE: u8 = 5;
const CMD_RENAME: u8 = 6;
const CMD_REMOVE: u8 = 7;
const CMD_SHA256: u8 = 8;
const CMD_MKDIR: u8 = 9;

const REPLY_ERROR: u8 = 0;
const REPLY_INFO: u8 = 1;
const REPLY_CHUNK: u8 = 2;
const REPLY_HASH: u8 = 3;

/// Header bytes of a read reply (`[2][offset u32]`).
const READ_OVERHEAD: usize = 5;
/// Header bytes of a write command (`[4][flags][offset u32]`).
const WRITE_OVERHEAD: usize = 6;

/// File or directory metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FsInfo {
    pub name: String,
    pub is_dir: bool,
    pub size: u32,
}

/// Stat a file or directory.
pub async fn stat(session: &mut Session, path: &str, timeout: Duration) -> Result<FsInfo> {
    let reply = request(session, &command(CMD_STAT, path), REPLY_INFO, timeout).await?;
    if reply.len() < 6 {
        return Err(invalid("file info too short"));
    }

    let name = path.rsplit('/').next().unwrap_or(path).to_string();
    Ok(FsInfo {
        name,
        is_dir: reply[1] == 1,
        size: u32_at(&reply, 2),
    })
}

/// List a directory.
pub async fn list(session: &mut Session, dir: &str, timeout: Duration) -> Result<Vec<FsInfo>> {
    session.write(FS, &command(CMD_LIST, dir)).await?;

    let mut infos = Vec::new();
    while let Some(reply) = session.receive(FS, true, timeout).await? {
        if reply[..].first() != Some(&REPLY_INFO) {
            return Err(reply_error(&reply));
        }
        if reply.len() < 6 {
            return Err(invalid("file info too short"));
        }
        infos.push(FsInfo {
            name: String::from_utf8_lossy(&reply[6..]).into_owned(),
            is_dir: reply[1] == 1,
            size: u32_at(&reply, 2),
        });
    }

    Ok(infos)
}

/// Open a file for subsequent reads and writes.
pub async fn open(session: &mut Session, path: &str, flags: u8, timeout: Duration) -> Result<()> {
    let mut cmd = Vec::with_capacity(2 + path.len());
    cmd.extend_from_slice(&[CMD_OPEN, flags]);
    cmd.extend_from_slice(path.as_bytes());
    acked(session, &cmd, timeout).await
}

/// Read a range of the open file.
///
/// The device streams chunks tagged with their absolute offset; every chunk
/// must continue exactly where the previous one ended.
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
    session.write(FS, &cmd).await?;

    let mut data = Vec::with_capacity(len as usize);
    while let Some(reply) = session.receive(FS, true, timeout).await? {
        if reply[..].first() != Some(&REPLY_CHUNK) {
            return Err(reply_error(&reply));
        }
        if reply.len() < 1 + 4 {
            return Err(invalid("file chunk too short"));
        }
        let expected = offset as usize + data.len();
        if u32_at(&reply, 1) as usize != expected {
            return Err(invalid("file chunk at unexpected offset"));
        }
        data.extend_from_slice(&reply[5..]);
    }

    Ok(data)
}

/// Write data at an offset of the open file.
///
/// A zero `ack_timeout` sends the chunk silently without awaiting a result.
pub async fn write(
    session: &mut Session,
    offset: u32,
    data: &[u8],
    ack_timeout: Duration,
) -> Result<()> {
    let silent = ack_timeout.is_zero();
    let mut cmd = Vec::with_capacity(WRITE_OVERHEAD + data.len());
    cmd.extend_from_slice(&[CMD_WRITE, if silent { WRITE_SILENT } else { 0 }]);
    cmd.extend_from_slice(&offset.to_le_bytes());
    cmd.extend_from_slice(data);

    if silent {
        session.write(FS, &cmd).await?;
        return Ok(());
    }
    acked(session, &cmd, ack_timeout).await
}

/// Close the open file, committing pending writes.
pub async fn close(session: &mut Session, timeout: Duration) -> Result<()> {
    acked(session, &[CMD_CLOSE], timeout).await
}

/// Rename a file or directory.
pub async fn rename(session: &mut Session, from: &str, to: &str, timeout: Duration) -> Result<()> {
    let mut cmd = command(CMD_RENAME, from);
    cmd.push(0);
    cmd.extend_from_slice(to.as_bytes());
    acked(session, &cmd, timeout).await
}

/// Remove a file or empty directory.
pub async fn remove(session: &mut Session, path: &str, timeout: Duration) -> Result<()> {
    acked(session, &command(CMD_REMOVE, path), timeout).await
}

/// Compute the SHA-256 digest of a file on the device.
pub async fn sha256(session: &mut Session, path: &str, timeout: Duration) -> Result<[u8; 32]> {
    let reply = request(session, &command(CMD_SHA256, path), REPLY_HASH, timeout).await?;
    reply[1..]
        .try_into()
        .map_err(|_| invalid("digest has wrong length"))
}

/// Create a directory and its parents.
pub async fn mkdir(session: &mut Session, path: &str, timeout: Duration) -> Result<()> {
    acked(session, &command(CMD_MKDIR, path), timeout).await
}

/// Read a whole file.
pub async fn read_file(
    session: &mut Session,
    path: &str,
    config: &TransferConfig,
    progress: Progress<'_>,
) -> Result<Vec<u8>> {
    let info = stat(session, path, config.timeout).await?;
    read_file_range(session, path, 0, info.size, config, progress).await
}

/// Read up to `len` bytes of a file starting at `offset`.
///
/// The range is fetched in chunks sized by the transfer settings. Reading
/// stops early at the end of the file.
pub async fn read_file_range(
    session: &mut Session,
    path: &str,
    offset: u32,
    len: u32,
    config: &TransferConfig,
    progress: Progress<'_>,
) -> Result<Vec<u8>> {
    if offset.checked_add(len).is_none() {
        return Err(EndpointError::InvalidArgument(format!(
            "range of {len} bytes at offset {offset} exceeds 4 GiB"
        )));
    }
    let chunk = config.read_chunk(session, READ_OVERHEAD).await?;
    let chunk = u32::try_from(chunk).unwrap_or(u32::MAX);

    open(session, path, 0, config.timeout).await?;

    let mut data = Vec::with_capacity(len as usize);
    let mut done = 0u32;
    while done < len {
        let want = chunk.min(len - done);
        let part = read(session, offset + done, want, config.timeout).await?;
        let short = part.len() < want as usize;
        done += part.len() as u32;
        data.extend_from_slice(&part);
        progress(done as usize, len as usize);
        if short {
            debug!(path, done, len, "file ended before requested range");
            break;
        }
    }

    close(session, config.timeout).await?;
    Ok(data)
}

/// Create or replace a file with `data`.
///
/// Chunks are acknowledged according to the transfer cadence; the final
/// close confirms every silent chunk.
pub async fn write_file(
    session: &mut Session,
    path: &str,
    data: &[u8],
    config: &TransferConfig,
    progress: Progress<'_>,
) -> Result<()> {
    if u32::try_from(data.len()).is_err() {
        return Err(EndpointError::InvalidArgument(format!(
            "file of {} bytes is too large",
            data.len()
        )));
    }
    let chunk = config.write_chunk(session, WRITE_OVERHEAD).await?;

    open(session, path, OPEN_CREATE | OPEN_TRUNCATE, config.timeout).await?;

    let mut offset = 0usize;
    for (index, part) in data.chunks(chunk).enumerate() {
        let ack = if config.acked(index) {
            config.timeout
        } else {
            Duration::ZERO
        };
        write(session, offset as u32, part, ack).await?;
        offset += part.len();
        progress(offset, data.len());
    }

    close(session, config.timeout).await
}

fn command(cmd: u8, path: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + path.len());
    buf.push(cmd);
    buf.extend_from_slice(path.as_bytes());
    buf
}

fn u32_at(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn reply_error(reply: &[u8]) -> EndpointError {
    match reply {
        [REPLY_ERROR, errno, ..] => EndpointError::Posix { errno: *errno },
        _ => ProtocolError::UnknownMessage.into(),
    }
}

async fn acked(session: &mut Session, cmd: &[u8], timeout: Duration) -> Result<()> {
    session.write(FS, cmd).await?;
    match session.receive(FS, true, timeout).await? {
        None => Ok(()),
        Some(reply) => Err(reply_error(&reply)),
    }
}

async fn request(session: &mut Session, cmd: &[u8], tag: u8, timeout: Duration) -> Result<Bytes> {
    session.write(FS, cmd).await?;
    let reply = session
        .receive(FS, false, timeout)
        .await?
        .ok_or(ProtocolError::UnexpectedAck)?;
    if reply[..].first() != Some(&tag) {
        return Err(reply_error(&reply));
    }
    Ok(reply)
}
