use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::exit::{CliError, CliResult, INTERNAL};
use crate::output::OutputFormat;

pub mod auth;
pub mod connect;
pub mod debug;
pub mod fs;
pub mod info;
pub mod metrics;
pub mod params;
pub mod ping;
pub mod relay;
pub mod unlock;
pub mod update;
pub mod version;

pub use connect::TargetArgs;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show capabilities, lock state and MTU of a device.
    Info,
    /// Measure round trips to a device.
    Ping(PingArgs),
    /// Query the lock state and unlock a device.
    Unlock(UnlockArgs),
    /// List, read and write parameters.
    Params {
        #[command(subcommand)]
        command: ParamsCommand,
    },
    /// Access the device file system.
    Fs {
        #[command(subcommand)]
        command: FsCommand,
    },
    /// Flash a firmware image.
    Update(UpdateArgs),
    /// List and read metrics.
    Metrics {
        #[command(subcommand)]
        command: MetricsCommand,
    },
    /// Inspect downstream devices.
    Relay {
        #[command(subcommand)]
        command: RelayCommand,
    },
    /// Check device identity and attestation.
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },
    /// Stream logs and fetch coredumps.
    Debug {
        #[command(subcommand)]
        command: DebugCommand,
    },
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, target: &TargetArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Info => info::run(target, format).await,
        Command::Ping(args) => ping::run(args, target, format).await,
        Command::Unlock(args) => unlock::run(args, target, format).await,
        Command::Params { command } => params::run(command, target, format).await,
        Command::Fs { command } => fs::run(command, target, format).await,
        Command::Update(args) => update::run(args, target).await,
        Command::Metrics { command } => metrics::run(command, target, format).await,
        Command::Relay { command } => relay::run(command, target, format).await,
        Command::Auth { command } => auth::run(command, target, format).await,
        Command::Debug { command } => debug::run(command, target, format).await,
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct PingArgs {
    /// Number of pings.
    #[arg(long, short = 'c', default_value_t = 1)]
    pub count: u32,
    /// Pause between pings (e.g. 1s, 200ms).
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub interval: Duration,
}

#[derive(Args, Debug)]
pub struct UnlockArgs {
    /// Password; defaults to the global --password.
    pub password: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum ParamsCommand {
    /// List parameters with their current values.
    List,
    /// Read a parameter.
    Get { name: String },
    /// Write a parameter.
    Set { name: String, value: String },
    /// Clear a parameter.
    Clear { name: String },
    /// Show values changed after an age.
    Collect {
        #[arg(long, default_value_t = 0)]
        since: u64,
    },
    /// Print parameter changes until interrupted.
    Watch,
}

#[derive(Subcommand, Debug)]
pub enum FsCommand {
    /// Show file or directory info.
    Stat { path: String },
    /// List a directory.
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Download a file.
    Get(FsGetArgs),
    /// Upload a file.
    Put { local: PathBuf, remote: String },
    /// Remove a file.
    Rm { path: String },
    /// Rename a file.
    Mv { from: String, to: String },
    /// Create a directory.
    Mkdir { path: String },
    /// Print the SHA-256 of a file.
    Sha256 { path: String },
}

#[derive(Args, Debug)]
pub struct FsGetArgs {
    pub remote: String,
    /// Destination file; stdout when omitted.
    pub local: Option<PathBuf>,
    /// Start offset.
    #[arg(long, default_value_t = 0)]
    pub offset: u32,
    /// Number of bytes; the rest of the file when omitted.
    #[arg(long)]
    pub len: Option<u32>,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Firmware image.
    pub image: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum MetricsCommand {
    /// List metrics.
    List,
    /// Read a metric by name.
    Read { name: String },
}

#[derive(Subcommand, Debug)]
pub enum RelayCommand {
    /// List downstream devices.
    Scan,
}

#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    /// Show whether the device is provisioned.
    Status,
    /// Read and verify the identity record.
    Describe(KeyArgs),
    /// Challenge the device to prove it holds the key.
    Attest(KeyArgs),
}

#[derive(Args, Debug)]
pub struct KeyArgs {
    /// Hex-encoded 32-byte provisioning key.
    #[arg(long, env = "NAOS_AUTH_KEY", hide_env_values = true, value_parser = parse_key)]
    pub key: [u8; 32],
}

#[derive(Subcommand, Debug)]
pub enum DebugCommand {
    /// Stream device logs until interrupted.
    Log,
    /// Download the stored coredump.
    Coredump {
        /// Destination file; stdout when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Delete the coredump after downloading it.
        #[arg(long)]
        delete: bool,
    },
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration: {input}"))?;
    if value == 0 {
        return Err("duration must be greater than zero".to_string());
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

fn parse_key(input: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(input.trim()).map_err(|err| format!("invalid key: {err}"))?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| format!("key must be 32 bytes, got {}", bytes.len()))
}

/// A token cancelled by the first Ctrl-C.
pub fn cancel_on_ctrlc() -> CliResult<CancellationToken> {
    let token = CancellationToken::new();
    let handle = token.clone();
    ctrlc::set_handler(move || handle.cancel())
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;
    Ok(token)
}
