//! Parameter endpoint client.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use naos_frame::PARAMS;
use naos_session::{ProtocolError, Session};
use serde::Serialize;

use crate::error::{invalid, EndpointError, Result};

const CMD_GET: u8 = 0;
const CMD_SET: u8 = 1;
const CMD_LIST: u8 = 2;
const CMD_READ: u8 = 3;
const CMD_WRITE: u8 = 4;
const CMD_COLLECT: u8 = 5;
const CMD_CLEAR: u8 = 6;

/// Parameter value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Raw,
    String,
    Bool,
    Long,
    Double,
    Action,
}

impl ParamType {
    /// Decode a wire type tag.
    pub fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => ParamType::Raw,
            1 => ParamType::String,
            2 => ParamType::Bool,
            3 => ParamType::Long,
            4 => ParamType::Double,
            5 => ParamType::Action,
            _ => return None,
        })
    }

    /// Lower-case type name.
    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::Raw => "raw",
            ParamType::String => "string",
            ParamType::Bool => "bool",
            ParamType::Long => "long",
            ParamType::Double => "double",
            ParamType::Action => "action",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameter mode bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ParamMode(pub u8);

impl ParamMode {
    /// Not persisted across restarts.
    pub const VOLATILE: u8 = 1;
    /// Defined by the firmware framework.
    pub const SYSTEM: u8 = 2;
    /// Defined by the application.
    pub const APPLICATION: u8 = 4;
    /// Only accessible on unlocked sessions.
    pub const LOCKED: u8 = 8;

    /// Whether all bits of `mask` are set.
    pub fn contains(self, mask: u8) -> bool {
        self.0 & mask == mask
    }
}

/// A parameter announced by the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamInfo {
    #[serde(rename = "ref")]
    pub reference: u8,
    #[serde(rename = "type")]
    pub kind: ParamType,
    pub mode: ParamMode,
    pub name: String,
}

/// A changed parameter value returned by [`collect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamUpdate {
    pub reference: u8,
    /// Device change tick of the value.
    pub age: u64,
    pub value: Bytes,
}

/// A parameter value interpreted according to its type.
///
/// Devices transfer scalar values in their textual form.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Raw(Vec<u8>),
    String(String),
    Bool(bool),
    Long(i64),
    Double(f64),
    Action,
}

impl ParamValue {
    /// Interpret raw value bytes.
    pub fn decode(kind: ParamType, raw: &[u8]) -> Result<Self> {
        let text = || {
            std::str::from_utf8(raw).map_err(|_| invalid("parameter value is not utf-8"))
        };
        Ok(match kind {
            ParamType::Raw => ParamValue::Raw(raw.to_vec()),
            ParamType::String => ParamValue::String(text()?.to_string()),
            ParamType::Bool => ParamValue::Bool(text()? == "1"),
            ParamType::Long => ParamValue::Long(
                text()?
                    .trim()
                    .parse()
                    .map_err(|_| invalid("malformed long parameter"))?,
            ),
            ParamType::Double => ParamValue::Double(
                text()?
                    .trim()
                    .parse()
                    .map_err(|_| invalid("malformed double parameter"))?,
            ),
            ParamType::Action => ParamValue::Action,
        })
    }

    /// Parse user input for a parameter of the given type.
    pub fn parse(kind: ParamType, input: &str) -> Result<Self> {
        let bad = || EndpointError::InvalidArgument(format!("{input:?} is not a valid {kind}"));
        Ok(match kind {
            ParamType::Raw => ParamValue::Raw(input.as_bytes().to_vec()),
            ParamType::String => ParamValue::String(input.to_string()),
            ParamType::Bool => match input {
                "1" | "true" | "on" => ParamValue::Bool(true),
                "0" | "false" | "off" => ParamValue::Bool(false),
                _ => return Err(bad()),
            },
            ParamType::Long => ParamValue::Long(input.parse().map_err(|_| bad())?),
            ParamType::Double => ParamValue::Double(input.parse().map_err(|_| bad())?),
            ParamType::Action => ParamValue::Action,
        })
    }

    /// Encode for transfer.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ParamValue::Raw(raw) => raw.clone(),
            ParamValue::String(text) => text.as_bytes().to_vec(),
            ParamValue::Bool(value) => vec![if *value { b'1' } else { b'0' }],
            ParamValue::Long(value) => value.to_string().into_bytes(),
            ParamValue::Double(value) => value.to_string().into_bytes(),
            ParamValue::Action => Vec::new(),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Raw(raw) => write!(f, "{}", String::from_utf8_lossy(raw)),
            ParamValue::String(text) => f.write_str(text),
            ParamValue::Bool(value) => write!(f, "{value}"),
            ParamValue::Long(value) => write!(f, "{value}"),
            ParamValue::Double(value) => write!(f, "{value}"),
            ParamValue::Action => f.write_str("<action>"),
        }
    }
}

/// Get a parameter value by name.
pub async fn get(session: &mut Session, name: &str, timeout: Duration) -> Result<Bytes> {
    let mut cmd = vec![CMD_GET];
    cmd.extend_from_slice(name.as_bytes());
    request(session, &cmd, timeout).await
}

/// Set a parameter value by name.
pub async fn set(session: &mut Session, name: &str, value: &[u8], timeout: Duration) -> Result<()> {
    let mut cmd = Vec::with_capacity(2 + name.len() + value.len());
    cmd.push(CMD_SET);
    cmd.extend_from_slice(name.as_bytes());
    cmd.push(0);
    cmd.extend_from_slice(value);
    session.send(PARAMS, &cmd, timeout).await?;
    Ok(())
}

/// List all parameters.
pub async fn list(session: &mut Session, timeout: Duration) -> Result<Vec<ParamInfo>> {
    session.write(PARAMS, &[CMD_LIST]).await?;

    let mut params = Vec::new();
    while let Some(reply) = session.receive(PARAMS, true, timeout).await? {
        if reply.len() < 4 {
            return Err(invalid("parameter info too short"));
        }
        let kind = ParamType::from_u8(reply[1]).ok_or(ProtocolError::UnknownMessage)?;
        params.push(ParamInfo {
            reference: reply[0],
            kind,
            mode: ParamMode(reply[2]),
            name: String::from_utf8_lossy(&reply[3..]).into_owned(),
        });
    }

    Ok(params)
}

/// Read a parameter value by reference.
pub async fn read(session: &mut Session, reference: u8, timeout: Duration) -> Result<Bytes> {
    request(session, &[CMD_READ, reference], timeout).await
}

/// Write a parameter value by reference.
pub async fn write(
    session: &mut Session,
    reference: u8,
    value: &[u8],
    timeout: Duration,
) -> Result<()> {
    let mut cmd = Vec::with_capacity(2 + value.len());
    cmd.extend_from_slice(&[CMD_WRITE, reference]);
    cmd.extend_from_slice(value);
    session.send(PARAMS, &cmd, timeout).await?;
    Ok(())
}

/// Collect values changed after `since`.
///
/// `refs` selects the parameters to consider, all of them when `None`. The
/// highest returned age is the watermark for the next call.
pub async fn collect(
    session: &mut Session,
    refs: Option<&[u8]>,
    since: u64,
    timeout: Duration,
) -> Result<Vec<ParamUpdate>> {
    let bitmap = match refs {
        None => u64::MAX,
        Some(refs) => bitmap(refs)?,
    };

    let mut cmd = Vec::with_capacity(17);
    cmd.push(CMD_COLLECT);
    cmd.extend_from_slice(&bitmap.to_le_bytes());
    cmd.extend_from_slice(&since.to_le_bytes());
    session.write(PARAMS, &cmd).await?;

    let mut updates = Vec::new();
    while let Some(reply) = session.receive(PARAMS, true, timeout).await? {
        if reply.len() < 9 {
            return Err(invalid("parameter update too short"));
        }
        let mut age = [0u8; 8];
        age.copy_from_slice(&reply[1..9]);
        updates.push(ParamUpdate {
            reference: reply[0],
            age: u64::from_le_bytes(age),
            value: reply.slice(9..),
        });
    }

    Ok(updates)
}

/// Clear a parameter value by reference.
pub async fn clear(session: &mut Session, reference: u8, timeout: Duration) -> Result<()> {
    session.send(PARAMS, &[CMD_CLEAR, reference], timeout).await?;
    Ok(())
}

/// The highest age among `updates`, or `since` if there are none.
pub fn watermark(updates: &[ParamUpdate], since: u64) -> u64 {
    updates.iter().map(|u| u.age).fold(since, u64::max)
}

fn bitmap(refs: &[u8]) -> Result<u64> {
    refs.iter().try_fold(0u64, |map, &reference| {
        if reference >= 64 {
            return Err(EndpointError::InvalidArgument(format!(
                "parameter reference {reference} cannot be collected"
            )));
        }
        Ok(map | 1u64 << reference)
    })
}

async fn request(session: &mut Session, cmd: &[u8], timeout: Duration) -> Result<Bytes> {
    session.write(PARAMS, cmd).await?;
    session
        .receive(PARAMS, false, timeout)
        .await?
        .ok_or_else(|| ProtocolError::UnexpectedAck.into())
}
