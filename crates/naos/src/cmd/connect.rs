use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use naos_device::{DeviceConfig, ManagedDevice};
use naos_endpoint::TransferConfig;
use naos_session::Session;
use naos_transport::{Device, SerialDevice, WebSocketDevice};
use tracing::debug;

use crate::cmd::parse_duration;
use crate::exit::{endpoint_error, managed_error, CliError, CliResult, PERMISSION_DENIED, USAGE};

/// How to reach the device.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Serial device the NAOS device is attached to.
    #[arg(long, env = "NAOS_SERIAL", value_name = "PATH", global = true)]
    pub serial: Option<PathBuf>,

    /// WebSocket URL of the device.
    #[arg(long, env = "NAOS_WS", value_name = "URL", global = true)]
    pub ws: Option<String>,

    /// Timeout for opening and for each request (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s", value_parser = parse_duration, global = true)]
    pub timeout: Duration,

    /// Password used to unlock locked devices.
    #[arg(long, env = "NAOS_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,
}

impl TargetArgs {
    pub fn device(&self) -> CliResult<Arc<dyn Device>> {
        match (&self.serial, &self.ws) {
            (Some(path), None) => Ok(Arc::new(SerialDevice::new(path))),
            (None, Some(url)) => Ok(Arc::new(WebSocketDevice::new(url.clone()))),
            (Some(_), Some(_)) => Err(CliError::new(
                USAGE,
                "--serial and --ws cannot be used together",
            )),
            (None, None) => Err(CliError::new(
                USAGE,
                "no device given, use --serial or --ws",
            )),
        }
    }

    pub fn config(&self) -> DeviceConfig {
        DeviceConfig {
            open_timeout: self.timeout,
            request_timeout: self.timeout,
            transfer: TransferConfig {
                timeout: self.timeout,
                ..TransferConfig::default()
            },
            ..DeviceConfig::default()
        }
    }
}

/// Open the device without unlocking it.
pub async fn activate(target: &TargetArgs) -> CliResult<ManagedDevice> {
    let device = ManagedDevice::new(target.device()?, target.config());
    device
        .activate()
        .await
        .map_err(|err| managed_error("open failed", err))?;
    Ok(device)
}

/// Open the device and unlock it with the global password if it is locked.
pub async fn connect(target: &TargetArgs) -> CliResult<ManagedDevice> {
    let device = activate(target).await?;
    if let Some(password) = &target.password {
        if let Err(err) = unlock(&device, password).await {
            device.deactivate().await;
            return Err(err);
        }
    }
    Ok(device)
}

/// Unlock a locked device. Returns whether it was locked.
pub async fn unlock(device: &ManagedDevice, password: &str) -> CliResult<bool> {
    let locked = device
        .locked()
        .await
        .map_err(|err| managed_error("status failed", err))?;
    if !locked {
        return Ok(false);
    }
    let ok = device
        .unlock(password)
        .await
        .map_err(|err| managed_error("unlock failed", err))?;
    if !ok {
        return Err(CliError::new(PERMISSION_DENIED, "unlock failed: password rejected"));
    }
    Ok(true)
}

/// A connected device with a dedicated session.
pub struct Connection {
    pub device: ManagedDevice,
    pub session: Session,
}

impl Connection {
    pub async fn open(target: &TargetArgs) -> CliResult<Self> {
        let device = connect(target).await?;
        match device.new_session().await {
            Ok(session) => Ok(Self { device, session }),
            Err(err) => {
                device.deactivate().await;
                Err(managed_error("session failed", err))
            }
        }
    }

    /// End the session, close the device and report the command result.
    pub async fn finish<T>(self, context: &str, result: naos_endpoint::Result<T>) -> CliResult<T> {
        if let Err(err) = self.session.end(Duration::ZERO).await {
            debug!(%err, "failed to end session");
        }
        self.device.deactivate().await;
        result.map_err(|err| endpoint_error(context, err))
    }
}
