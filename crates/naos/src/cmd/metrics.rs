use std::time::Duration;

use naos_endpoint::metrics::{self, MetricLayout};
use naos_endpoint::{EndpointError, MetricInfo};
use naos_session::Session;
use serde::Serialize;

use crate::cmd::connect::Connection;
use crate::cmd::{MetricsCommand, TargetArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct Sample {
    label: String,
    value: f64,
}

pub async fn run(
    command: MetricsCommand,
    target: &TargetArgs,
    format: OutputFormat,
) -> CliResult<i32> {
    let mut conn = Connection::open(target).await?;
    match command {
        MetricsCommand::List => {
            let result = metrics::list(&mut conn.session, target.timeout).await;
            let infos = conn.finish("list failed", result).await?;
            print_list(&infos, format);
        }
        MetricsCommand::Read { name } => {
            let result = sample(&mut conn.session, &name, target.timeout).await;
            let samples = conn.finish("read failed", result).await?;
            print_samples(&samples, format);
        }
    }
    Ok(SUCCESS)
}

async fn sample(
    session: &mut Session,
    name: &str,
    timeout: Duration,
) -> naos_endpoint::Result<Vec<Sample>> {
    let infos = metrics::list(session, timeout).await?;
    let info = infos
        .iter()
        .find(|m| m.name == name)
        .ok_or_else(|| EndpointError::InvalidArgument(format!("unknown metric: {name}")))?;

    let layout = if info.size > 1 {
        metrics::describe(session, info.reference, timeout).await?
    } else {
        MetricLayout::default()
    };
    let values = metrics::read_values(session, info, timeout).await?;

    Ok(layout
        .labels()
        .into_iter()
        .enumerate()
        .filter_map(|(index, label)| {
            values.get(index).map(|value| Sample {
                label: label.trim_end().to_string(),
                value,
            })
        })
        .collect())
}

fn print_list(infos: &[MetricInfo], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(infos),
        OutputFormat::Table => print_table(
            &["REF", "NAME", "KIND", "TYPE", "SIZE"],
            infos.iter().map(|m| {
                vec![
                    m.reference.to_string(),
                    m.name.clone(),
                    format!("{:?}", m.kind).to_lowercase(),
                    format!("{:?}", m.data_type).to_lowercase(),
                    m.size.to_string(),
                ]
            }),
        ),
        OutputFormat::Pretty | OutputFormat::Raw => {
            for m in infos {
                println!("{}", m.name);
            }
        }
    }
}

fn print_samples(samples: &[Sample], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(samples),
        OutputFormat::Table => print_table(
            &["LABEL", "VALUE"],
            samples
                .iter()
                .map(|s| vec![s.label.clone(), s.value.to_string()]),
        ),
        OutputFormat::Pretty | OutputFormat::Raw => {
            for s in samples {
                println!("{} {}", s.label, s.value);
            }
        }
    }
}
