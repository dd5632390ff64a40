use serde::Serialize;

use crate::cmd::connect::{activate, unlock};
use crate::cmd::{TargetArgs, UnlockArgs};
use crate::exit::{CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct UnlockOutput {
    device: String,
    was_locked: bool,
    locked: bool,
}

pub async fn run(args: UnlockArgs, target: &TargetArgs, format: OutputFormat) -> CliResult<i32> {
    let password = args
        .password
        .or_else(|| target.password.clone())
        .ok_or_else(|| CliError::new(USAGE, "no password given"))?;

    let device = activate(target).await?;
    let result = unlock(&device, &password).await;
    let locked = device.is_locked().await;
    device.deactivate().await;

    let out = UnlockOutput {
        device: device.id(),
        was_locked: result?,
        locked,
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Raw => println!("{}", !out.locked),
        OutputFormat::Table | OutputFormat::Pretty => {
            if out.was_locked {
                println!("{}: unlocked", out.device);
            } else {
                println!("{}: not locked", out.device);
            }
        }
    }
    Ok(SUCCESS)
}
