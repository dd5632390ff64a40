use std::time::Instant;

use serde::Serialize;

use crate::cmd::connect::Connection;
use crate::cmd::{PingArgs, TargetArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct PingOutput {
    seq: u32,
    session: u16,
    rtt_ms: f64,
}

pub async fn run(args: PingArgs, target: &TargetArgs, format: OutputFormat) -> CliResult<i32> {
    let mut conn = Connection::open(target).await?;
    let result = ping(&mut conn, &args, target, format).await;
    conn.finish("ping failed", result).await?;
    Ok(SUCCESS)
}

async fn ping(
    conn: &mut Connection,
    args: &PingArgs,
    target: &TargetArgs,
    format: OutputFormat,
) -> naos_endpoint::Result<()> {
    for seq in 1..=args.count {
        if seq > 1 {
            tokio::time::sleep(args.interval).await;
        }
        let start = Instant::now();
        conn.session.ping(target.timeout).await?;
        let out = PingOutput {
            seq,
            session: conn.session.id(),
            rtt_ms: (start.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0,
        };
        match format {
            OutputFormat::Json => print_json(&out),
            OutputFormat::Raw => println!("{}", out.rtt_ms),
            OutputFormat::Table | OutputFormat::Pretty => println!(
                "ping seq={} session={} time={:.2}ms",
                out.seq, out.session, out.rtt_ms
            ),
        }
    }
    Ok(())
}
