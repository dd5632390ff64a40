use naos_endpoint::update;
use tracing::info;

use crate::cmd::connect::Connection;
use crate::cmd::{TargetArgs, UpdateArgs};
use crate::exit::{io_error, CliResult, SUCCESS};
use crate::output::progress;

pub async fn run(args: UpdateArgs, target: &TargetArgs) -> CliResult<i32> {
    let image = tokio::fs::read(&args.image)
        .await
        .map_err(|err| io_error(&format!("read {}", args.image.display()), err))?;

    let mut conn = Connection::open(target).await?;
    let config = conn.device.config().transfer.clone();
    info!(device = %conn.device.id(), size = image.len(), "flashing image");
    let result = update::run(&mut conn.session, &image, &config, &mut progress("update")).await;
    conn.finish("update failed", result).await?;

    eprintln!("update of {} bytes committed", image.len());
    Ok(SUCCESS)
}
