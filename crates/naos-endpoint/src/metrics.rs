//! Metrics endpoint client.
//!
//! A metric is either a scalar or an N-dimensional array. Its layout names
//! every axis ("key") and the labels along it ("values"); flat array
//! indices are row-major with the last axis varying fastest.

use std::time::Duration;

use bytes::Bytes;
use naos_frame::METRICS;
use naos_session::{ProtocolError, Session};
use serde::Serialize;

use crate::error::{invalid, Result};

const CMD_LIST: u8 = 0;
const CMD_DESCRIBE: u8 = 1;
const CMD_READ: u8 = 2;

const PART_KEY: u8 = 0;
const PART_VALUE: u8 = 1;

/// Label of a metric with a single value.
pub const SCALAR: &str = "scalar";

/// How a metric evolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
}

/// Element type of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// 32-bit signed integers.
    Long,
    /// 32-bit floats.
    Float,
    /// 64-bit floats.
    Double,
}

impl MetricType {
    /// Encoded size of one element.
    pub fn width(self) -> usize {
        match self {
            MetricType::Long | MetricType::Float => 4,
            MetricType::Double => 8,
        }
    }
}

/// A metric announced by the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricInfo {
    #[serde(rename = "ref")]
    pub reference: u8,
    pub kind: MetricKind,
    #[serde(rename = "type")]
    pub data_type: MetricType,
    pub name: String,
    /// Number of elements; greater than one for vector metrics.
    pub size: u8,
}

/// Axis names and per-axis labels of a metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricLayout {
    pub keys: Vec<String>,
    pub values: Vec<Vec<String>>,
}

impl MetricLayout {
    /// Total number of elements described by the layout.
    pub fn size(&self) -> usize {
        self.values.iter().map(Vec::len).product()
    }

    /// Label of the element at flat `index`, e.g. `"x=b y=q "`.
    pub fn label(&self, index: usize) -> String {
        if self.size() <= 1 {
            return SCALAR.to_string();
        }

        let mut rest = index;
        let mut label = String::new();
        for (key, values) in self.keys.iter().zip(&self.values).rev() {
            let value = &values[rest % values.len()];
            rest /= values.len();
            label.insert_str(0, &format!("{key}={value} "));
        }
        label
    }

    /// Labels of all elements in flat index order.
    pub fn labels(&self) -> Vec<String> {
        (0..self.size().max(1)).map(|i| self.label(i)).collect()
    }
}

/// Decoded metric values.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValues {
    Long(Vec<i32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl MetricValues {
    /// Decode a little-endian value array of `size` elements.
    pub fn decode(data_type: MetricType, size: usize, raw: &[u8]) -> Result<Self> {
        if raw.len() != size * data_type.width() {
            return Err(invalid("metric data has wrong length"));
        }
        Ok(match data_type {
            MetricType::Long => MetricValues::Long(
                raw.chunks_exact(4)
                    .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
            ),
            MetricType::Float => MetricValues::Float(
                raw.chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
            ),
            MetricType::Double => MetricValues::Double(
                raw.chunks_exact(8)
                    .map(|b| {
                        let mut buf = [0u8; 8];
                        buf.copy_from_slice(b);
                        f64::from_le_bytes(buf)
                    })
                    .collect(),
            ),
        })
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            MetricValues::Long(v) => v.len(),
            MetricValues::Float(v) => v.len(),
            MetricValues::Double(v) => v.len(),
        }
    }

    /// Whether there are no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index` widened to `f64`.
    pub fn get(&self, index: usize) -> Option<f64> {
        match self {
            MetricValues::Long(v) => v.get(index).map(|x| *x as f64),
            MetricValues::Float(v) => v.get(index).map(|x| *x as f64),
            MetricValues::Double(v) => v.get(index).copied(),
        }
    }
}

/// List all metrics.
pub async fn list(session: &mut Session, timeout: Duration) -> Result<Vec<MetricInfo>> {
    session.write(METRICS, &[CMD_LIST]).await?;

    let mut metrics = Vec::new();
    while let Some(reply) = session.receive(METRICS, true, timeout).await? {
        if reply.len() < 4 {
            return Err(invalid("metric info too short"));
        }
        let kind = match reply[1] {
            0 => MetricKind::Counter,
            1 => MetricKind::Gauge,
            _ => return Err(ProtocolError::UnknownMessage.into()),
        };
        let data_type = match reply[2] {
            0 => MetricType::Long,
            1 => MetricType::Float,
            2 => MetricType::Double,
            _ => return Err(ProtocolError::UnknownMessage.into()),
        };
        metrics.push(MetricInfo {
            reference: reply[0],
            kind,
            data_type,
            size: reply[3],
            name: String::from_utf8_lossy(&reply[4..]).into_owned(),
        });
    }

    Ok(metrics)
}

/// Fetch the layout of a metric.
pub async fn describe(
    session: &mut Session,
    reference: u8,
    timeout: Duration,
) -> Result<MetricLayout> {
    session.write(METRICS, &[CMD_DESCRIBE, reference]).await?;

    let mut layout = MetricLayout::default();
    while let Some(reply) = session.receive(METRICS, true, timeout).await? {
        match reply[..] {
            [PART_KEY, index, ref name @ ..] => {
                let index = index as usize;
                if layout.keys.len() <= index {
                    layout.keys.resize(index + 1, String::new());
                    layout.values.resize(index + 1, Vec::new());
                }
                layout.keys[index] = String::from_utf8_lossy(name).into_owned();
            }
            [PART_VALUE, key, pos, ref name @ ..] => {
                let (key, pos) = (key as usize, pos as usize);
                if layout.values.len() <= key {
                    layout.keys.resize(key + 1, String::new());
                    layout.values.resize(key + 1, Vec::new());
                }
                let axis = &mut layout.values[key];
                if axis.len() <= pos {
                    axis.resize(pos + 1, String::new());
                }
                axis[pos] = String::from_utf8_lossy(name).into_owned();
            }
            _ => return Err(ProtocolError::UnknownMessage.into()),
        }
    }

    Ok(layout)
}

/// Read the raw value array of a metric.
pub async fn read(session: &mut Session, reference: u8, timeout: Duration) -> Result<Bytes> {
    session.write(METRICS, &[CMD_READ, reference]).await?;
    session
        .receive(METRICS, false, timeout)
        .await?
        .ok_or_else(|| ProtocolError::UnexpectedAck.into())
}

/// Read and decode the values of a metric.
pub async fn read_values(
    session: &mut Session,
    info: &MetricInfo,
    timeout: Duration,
) -> Result<MetricValues> {
    let raw = read(session, info.reference, timeout).await?;
    MetricValues::decode(info.data_type, info.size as usize, &raw)
}
