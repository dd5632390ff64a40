use naos_device::Capabilities;
use serde::Serialize;

use crate::cmd::connect::connect;
use crate::cmd::TargetArgs;
use crate::exit::{managed_error, CliResult, SUCCESS};
use crate::output::{print_table, OutputFormat};

#[derive(Serialize)]
struct InfoOutput {
    device: String,
    locked: bool,
    protected: bool,
    mtu: Option<u16>,
    capabilities: Capabilities,
    parameters: usize,
    metrics: usize,
    relays: Vec<String>,
}

pub async fn run(target: &TargetArgs, format: OutputFormat) -> CliResult<i32> {
    let device = connect(target).await?;
    let refreshed = device.refresh().await;
    if let Err(err) = refreshed {
        device.deactivate().await;
        return Err(managed_error("refresh failed", err));
    }

    let out = InfoOutput {
        device: device.id(),
        locked: device.is_locked().await,
        protected: device.is_protected().await,
        mtu: device.mtu().await,
        capabilities: device.capabilities().await,
        parameters: device.parameters().await.len(),
        metrics: device.metrics().await.len(),
        relays: device
            .relay_devices()
            .await
            .iter()
            .map(naos_transport::Device::id)
            .collect(),
    };
    device.deactivate().await;

    print_info(&out, format);
    Ok(SUCCESS)
}

fn endpoints(caps: &Capabilities) -> String {
    let names = [
        ("params", caps.params),
        ("update", caps.update),
        ("fs", caps.fs),
        ("relay", caps.relay),
        ("metrics", caps.metrics),
        ("auth", caps.auth),
        ("debug", caps.debug),
    ];
    let present: Vec<&str> = names
        .iter()
        .filter(|(_, present)| *present)
        .map(|(name, _)| *name)
        .collect();
    if present.is_empty() {
        "none".to_string()
    } else {
        present.join(", ")
    }
}

fn print_info(out: &InfoOutput, format: OutputFormat) {
    let mtu = out
        .mtu
        .map(|mtu| mtu.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    match format {
        OutputFormat::Json => crate::output::print_json(out),
        OutputFormat::Table => print_table(
            &["FIELD", "VALUE"],
            [
                vec!["device".into(), out.device.clone()],
                vec!["locked".into(), out.locked.to_string()],
                vec!["mtu".into(), mtu],
                vec!["endpoints".into(), endpoints(&out.capabilities)],
                vec!["parameters".into(), out.parameters.to_string()],
                vec!["metrics".into(), out.metrics.to_string()],
                vec!["relays".into(), out.relays.join(", ")],
            ],
        ),
        OutputFormat::Pretty => {
            println!("Device Info:");
            println!("  Device:     {}", out.device);
            println!(
                "  Locked:     {}{}",
                out.locked,
                if out.protected { " (protected)" } else { "" }
            );
            println!("  MTU:        {mtu}");
            println!("  Endpoints:  {}", endpoints(&out.capabilities));
            println!("  Parameters: {}", out.parameters);
            println!("  Metrics:    {}", out.metrics);
            if !out.relays.is_empty() {
                println!("  Relays:     {}", out.relays.join(", "));
            }
        }
        OutputFormat::Raw => println!("{}", out.device),
    }
}
