//! Authentication endpoint client.
//!
//! A provisioned device holds a secret key and an identity record. The record
//! is returned with a truncated HMAC-SHA256 signature, and challenges are
//! answered with the full HMAC so a key holder can attest the device.

use std::time::Duration;

use hmac::{Hmac, Mac};
use naos_frame::AUTH;
use naos_session::{ProtocolError, Session};
use serde::Serialize;
use sha2::Sha256;

use crate::error::{invalid, EndpointError, Result};

type HmacSha256 = Hmac<Sha256>;

const CMD_STATUS: u8 = 0;
const CMD_PROVISION: u8 = 1;
const CMD_DESCRIBE: u8 = 2;
const CMD_ATTEST: u8 = 3;

/// Size of the provisioning key.
pub const KEY_SIZE: usize = 32;
/// Size of an encoded identity record.
pub const DATA_SIZE: usize = 26;
/// Size of the truncated record signature.
pub const SIGNATURE_SIZE: usize = 5;
/// Size of attestation challenges and responses.
pub const CHALLENGE_SIZE: usize = 32;

/// Identity record of a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuthData {
    pub uuid: [u8; 16],
    pub product: u16,
    pub revision: u16,
    pub batch: u16,
    /// Manufacturing date as a unix timestamp.
    pub date: u32,
}

impl AuthData {
    /// Encode the record.
    pub fn encode(&self) -> [u8; DATA_SIZE] {
        let mut buf = [0u8; DATA_SIZE];
        buf[..16].copy_from_slice(&self.uuid);
        buf[16..18].copy_from_slice(&self.product.to_le_bytes());
        buf[18..20].copy_from_slice(&self.revision.to_le_bytes());
        buf[20..22].copy_from_slice(&self.batch.to_le_bytes());
        buf[22..26].copy_from_slice(&self.date.to_le_bytes());
        buf
    }

    /// Decode a record.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != DATA_SIZE {
            return Err(invalid("auth data has wrong length"));
        }
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&buf[..16]);
        Ok(Self {
            uuid,
            product: u16::from_le_bytes([buf[16], buf[17]]),
            revision: u16::from_le_bytes([buf[18], buf[19]]),
            batch: u16::from_le_bytes([buf[20], buf[21]]),
            date: u32::from_le_bytes([buf[22], buf[23], buf[24], buf[25]]),
        })
    }

    /// Compute the truncated signature of the record under `key`.
    pub fn sign(&self, key: &[u8]) -> Result<[u8; SIGNATURE_SIZE]> {
        let digest = hmac(key, &self.encode())?;
        let mut signature = [0u8; SIGNATURE_SIZE];
        signature.copy_from_slice(&digest[..SIGNATURE_SIZE]);
        Ok(signature)
    }
}

/// Whether the device has been provisioned.
pub async fn status(session: &mut Session, timeout: Duration) -> Result<bool> {
    let reply = request(session, &[CMD_STATUS], timeout).await?;
    match reply[..] {
        [flag] => Ok(flag == 1),
        _ => Err(invalid("auth status has wrong length")),
    }
}

/// Provision the device with a key and identity record.
pub async fn provision(
    session: &mut Session,
    key: &[u8; KEY_SIZE],
    data: &AuthData,
    timeout: Duration,
) -> Result<()> {
    let mut cmd = Vec::with_capacity(1 + KEY_SIZE + DATA_SIZE);
    cmd.push(CMD_PROVISION);
    cmd.extend_from_slice(key);
    cmd.extend_from_slice(&data.encode());
    session.send(AUTH, &cmd, timeout).await?;
    Ok(())
}

/// Fetch the identity record and verify its signature under `key`.
pub async fn describe(session: &mut Session, key: &[u8], timeout: Duration) -> Result<AuthData> {
    let reply = request(session, &[CMD_DESCRIBE], timeout).await?;
    if reply.len() != DATA_SIZE + SIGNATURE_SIZE {
        return Err(invalid("auth record has wrong length"));
    }

    let data = AuthData::decode(&reply[..DATA_SIZE])?;
    let mut mac = new_mac(key)?;
    mac.update(&reply[..DATA_SIZE]);
    mac.verify_truncated_left(&reply[DATA_SIZE..])
        .map_err(|_| EndpointError::Signature)?;

    Ok(data)
}

/// Have the device answer a challenge.
pub async fn attest(
    session: &mut Session,
    challenge: &[u8; CHALLENGE_SIZE],
    timeout: Duration,
) -> Result<[u8; CHALLENGE_SIZE]> {
    let mut cmd = Vec::with_capacity(1 + CHALLENGE_SIZE);
    cmd.push(CMD_ATTEST);
    cmd.extend_from_slice(challenge);

    let reply = request(session, &cmd, timeout).await?;
    reply[..]
        .try_into()
        .map_err(|_| invalid("attestation has wrong length"))
}

/// Check an attestation response against the expected key.
pub fn verify_attestation(key: &[u8], challenge: &[u8], response: &[u8]) -> Result<bool> {
    let mut mac = new_mac(key)?;
    mac.update(challenge);
    Ok(mac.verify_slice(response).is_ok())
}

/// A fresh random challenge.
pub fn random_challenge() -> [u8; CHALLENGE_SIZE] {
    rand::random()
}

fn new_mac(key: &[u8]) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(key)
        .map_err(|_| EndpointError::InvalidArgument("invalid hmac key".into()))
}

fn hmac(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = new_mac(key)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

async fn request(session: &mut Session, cmd: &[u8], timeout: Duration) -> Result<bytes::Bytes> {
    session.write(AUTH, cmd).await?;
    session
        .receive(AUTH, false, timeout)
        .await?
        .ok_or_else(|| ProtocolError::UnexpectedAck.into())
}
