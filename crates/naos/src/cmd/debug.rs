use std::io::Write;

use naos_endpoint::debug::{self, LogConfig};
use naos_session::Session;

use crate::cmd::connect::Connection;
use crate::cmd::{cancel_on_ctrlc, DebugCommand, TargetArgs};
use crate::exit::{io_error, CliResult, SUCCESS};
use crate::output::{print_json, print_raw, progress, OutputFormat};

pub async fn run(
    command: DebugCommand,
    target: &TargetArgs,
    format: OutputFormat,
) -> CliResult<i32> {
    match command {
        DebugCommand::Log => log(target, format).await,
        DebugCommand::Coredump { out, delete } => {
            let mut conn = Connection::open(target).await?;
            let result = coredump(&mut conn, delete).await;
            let dump = conn.finish("coredump failed", result).await?;

            match (dump, out) {
                (None, _) => eprintln!("no coredump stored"),
                (Some((reason, data)), Some(path)) => {
                    tokio::fs::write(&path, &data)
                        .await
                        .map_err(|err| io_error(&format!("write {}", path.display()), err))?;
                    eprintln!("coredump ({reason}) of {} bytes saved", data.len());
                }
                (Some((_, data)), None) => print_raw(&data),
            }
            Ok(SUCCESS)
        }
    }
}

/// Fetch the coredump and its reason, if one is stored.
async fn coredump(
    conn: &mut Connection,
    delete: bool,
) -> naos_endpoint::Result<Option<(String, Vec<u8>)>> {
    let config = conn.device.config().transfer.clone();
    let session: &mut Session = &mut conn.session;

    let (size, reason) = debug::check(session, config.timeout).await?;
    if size == 0 {
        return Ok(None);
    }
    let data = debug::read_coredump(session, &config, &mut progress("coredump")).await?;
    if delete {
        debug::delete(session, config.timeout).await?;
    }
    Ok(Some((reason, data)))
}

async fn log(target: &TargetArgs, format: OutputFormat) -> CliResult<i32> {
    let token = cancel_on_ctrlc()?;
    let mut conn = Connection::open(target).await?;
    let config = LogConfig {
        timeout: target.timeout,
        ..LogConfig::default()
    };

    let mut on_line = |line: &str| match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "line": line })),
        _ => {
            let mut out = std::io::stdout();
            let _ = writeln!(out, "{}", line.trim_end());
            let _ = out.flush();
        }
    };
    let result = debug::stream_log(&mut conn.session, &token, &mut on_line, &config).await;
    conn.finish("log stream failed", result).await?;
    Ok(SUCCESS)
}
