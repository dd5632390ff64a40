use serde::Serialize;

use crate::cmd::connect::connect;
use crate::cmd::{RelayCommand, TargetArgs};
use crate::exit::{managed_error, CliResult, SUCCESS};
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct RelayOutput {
    index: u8,
    device: String,
}

pub async fn run(
    command: RelayCommand,
    target: &TargetArgs,
    format: OutputFormat,
) -> CliResult<i32> {
    match command {
        RelayCommand::Scan => scan(target, format).await,
    }
}

async fn scan(target: &TargetArgs, format: OutputFormat) -> CliResult<i32> {
    let device = connect(target).await?;
    let refreshed = device.refresh().await;
    let relays = device.relay_devices().await;
    device.deactivate().await;
    refreshed.map_err(|err| managed_error("scan failed", err))?;

    let out: Vec<RelayOutput> = relays
        .iter()
        .map(|relay| RelayOutput {
            index: relay.index(),
            device: naos_transport::Device::id(relay),
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_table(
            &["INDEX", "DEVICE"],
            out.iter()
                .map(|r| vec![r.index.to_string(), r.device.clone()]),
        ),
        OutputFormat::Pretty | OutputFormat::Raw => {
            for r in &out {
                println!("{}", r.index);
            }
        }
    }
    Ok(SUCCESS)
}
