use naos_device::{DeviceEvent, ManagedDevice};
use naos_endpoint::params::{self, ParamInfo, ParamMode, ParamType, ParamValue};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use crate::cmd::connect::{connect, Connection};
use crate::cmd::{cancel_on_ctrlc, ParamsCommand, TargetArgs};
use crate::exit::{endpoint_error, managed_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{preview, print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct ParamOutput {
    #[serde(flatten)]
    info: ParamInfo,
    value: Option<String>,
}

#[derive(Serialize)]
struct UpdateOutput {
    #[serde(rename = "ref")]
    reference: u8,
    name: Option<String>,
    age: u64,
    value: String,
}

pub async fn run(
    command: ParamsCommand,
    target: &TargetArgs,
    format: OutputFormat,
) -> CliResult<i32> {
    match command {
        ParamsCommand::List => list(target, format).await,
        ParamsCommand::Get { name } => get(target, &name, format).await,
        ParamsCommand::Set { name, value } => set(target, &name, &value).await,
        ParamsCommand::Clear { name } => clear(target, &name).await,
        ParamsCommand::Collect { since } => collect(target, since, format).await,
        ParamsCommand::Watch => watch(target, format).await,
    }
}

/// Connect and load the parameter list and values.
async fn loaded(target: &TargetArgs) -> CliResult<ManagedDevice> {
    let device = connect(target).await?;
    if let Err(err) = device.refresh().await {
        device.deactivate().await;
        return Err(managed_error("refresh failed", err));
    }
    Ok(device)
}

fn mode_flags(mode: ParamMode) -> String {
    [
        (ParamMode::VOLATILE, 'v'),
        (ParamMode::SYSTEM, 's'),
        (ParamMode::APPLICATION, 'a'),
        (ParamMode::LOCKED, 'l'),
    ]
    .iter()
    .map(|&(bit, flag)| if mode.contains(bit) { flag } else { '-' })
    .collect()
}

fn display(kind: ParamType, raw: &[u8]) -> String {
    match ParamValue::decode(kind, raw) {
        Ok(ParamValue::Raw(raw)) => preview(&raw),
        Ok(value) => value.to_string(),
        Err(_) => preview(raw),
    }
}

async fn list(target: &TargetArgs, format: OutputFormat) -> CliResult<i32> {
    let device = loaded(target).await?;
    let mut out = Vec::new();
    for info in device.parameters().await {
        let value = match info.kind {
            ParamType::Action => None,
            kind => device
                .value(&info.name)
                .await
                .map(|raw| display(kind, &raw)),
        };
        out.push(ParamOutput { info, value });
    }
    device.deactivate().await;

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_table(
            &["REF", "NAME", "TYPE", "MODE", "VALUE"],
            out.iter().map(|p| {
                vec![
                    p.info.reference.to_string(),
                    p.info.name.clone(),
                    p.info.kind.to_string(),
                    mode_flags(p.info.mode),
                    p.value.clone().unwrap_or_default(),
                ]
            }),
        ),
        OutputFormat::Pretty | OutputFormat::Raw => {
            for p in &out {
                println!("{}={}", p.info.name, p.value.as_deref().unwrap_or(""));
            }
        }
    }
    Ok(SUCCESS)
}

fn kind_of(params: &[ParamInfo], name: &str) -> CliResult<ParamType> {
    params
        .iter()
        .find(|p| p.name == name)
        .map(|p| p.kind)
        .ok_or_else(|| CliError::new(USAGE, format!("unknown parameter: {name}")))
}

async fn get(target: &TargetArgs, name: &str, format: OutputFormat) -> CliResult<i32> {
    let device = loaded(target).await?;
    let kind = kind_of(&device.parameters().await, name);
    let value = device.read_param(name).await;
    device.deactivate().await;

    let kind = kind?;
    let raw = value.map_err(|err| managed_error("read failed", err))?;
    match format {
        OutputFormat::Raw => crate::output::print_raw(&raw),
        OutputFormat::Json => print_json(&serde_json::json!({
            "name": name,
            "type": kind,
            "value": display(kind, &raw),
        })),
        OutputFormat::Table | OutputFormat::Pretty => println!("{}", display(kind, &raw)),
    }
    Ok(SUCCESS)
}

async fn set(target: &TargetArgs, name: &str, input: &str) -> CliResult<i32> {
    let device = loaded(target).await?;
    let result = match kind_of(&device.parameters().await, name) {
        Ok(kind) => match ParamValue::parse(kind, input) {
            Ok(value) => device
                .write_param(name, &value.encode())
                .await
                .map_err(|err| managed_error("write failed", err)),
            Err(err) => Err(endpoint_error("invalid value", err)),
        },
        Err(err) => Err(err),
    };
    device.deactivate().await;
    result.map(|()| SUCCESS)
}

async fn clear(target: &TargetArgs, name: &str) -> CliResult<i32> {
    let device = loaded(target).await?;
    let result = device.clear_param(name).await;
    device.deactivate().await;
    result.map_err(|err| managed_error("clear failed", err))?;
    Ok(SUCCESS)
}

async fn collect(target: &TargetArgs, since: u64, format: OutputFormat) -> CliResult<i32> {
    let mut conn = Connection::open(target).await?;
    let infos = params::list(&mut conn.session, target.timeout).await;
    let updates = match infos {
        Ok(infos) => params::collect(&mut conn.session, None, since, target.timeout)
            .await
            .map(|updates| (infos, updates)),
        Err(err) => Err(err),
    };
    let (infos, updates) = conn.finish("collect failed", updates).await?;

    let out: Vec<UpdateOutput> = updates
        .into_iter()
        .map(|update| {
            let info = infos.iter().find(|p| p.reference == update.reference);
            UpdateOutput {
                reference: update.reference,
                name: info.map(|p| p.name.clone()),
                age: update.age,
                value: match info {
                    Some(info) => display(info.kind, &update.value),
                    None => preview(&update.value),
                },
            }
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_table(
            &["REF", "NAME", "AGE", "VALUE"],
            out.iter().map(|u| {
                vec![
                    u.reference.to_string(),
                    u.name.clone().unwrap_or_default(),
                    u.age.to_string(),
                    u.value.clone(),
                ]
            }),
        ),
        OutputFormat::Pretty | OutputFormat::Raw => {
            for u in &out {
                println!("{}@{}={}", u.name.as_deref().unwrap_or("?"), u.age, u.value);
            }
        }
    }
    Ok(SUCCESS)
}

async fn watch(target: &TargetArgs, format: OutputFormat) -> CliResult<i32> {
    let token = cancel_on_ctrlc()?;
    let device = loaded(target).await?;
    let mut events = device.subscribe();

    let result = loop {
        let event = tokio::select! {
            _ = token.cancelled() => break Ok(SUCCESS),
            event = events.recv() => event,
        };
        match event {
            Ok(DeviceEvent::ParamUpdated { reference, name }) => {
                let kind = kind_of(&device.parameters().await, &name).unwrap_or(ParamType::Raw);
                let value = device
                    .value(&name)
                    .await
                    .map(|raw| display(kind, &raw))
                    .unwrap_or_default();
                match format {
                    OutputFormat::Json => print_json(&serde_json::json!({
                        "ref": reference,
                        "name": name,
                        "value": value,
                    })),
                    _ => println!("{name}={value}"),
                }
            }
            Ok(DeviceEvent::Disconnected) | Err(RecvError::Closed) => {
                break Err(CliError::new(crate::exit::TRANSPORT_ERROR, "device disconnected"));
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
        }
    };

    device.deactivate().await;
    result
}
