use naos_endpoint::fs::{self, FsInfo};
use naos_endpoint::TransferConfig;
use naos_session::Session;

use crate::cmd::connect::Connection;
use crate::cmd::{FsCommand, FsGetArgs, TargetArgs};
use crate::exit::{io_error, CliResult, SUCCESS};
use crate::output::{print_json, print_raw, print_table, progress, OutputFormat};

pub async fn run(command: FsCommand, target: &TargetArgs, format: OutputFormat) -> CliResult<i32> {
    // Read local input before touching the device.
    let upload = match &command {
        FsCommand::Put { local, .. } => Some(
            tokio::fs::read(local)
                .await
                .map_err(|err| io_error(&format!("read {}", local.display()), err))?,
        ),
        _ => None,
    };

    let mut conn = Connection::open(target).await?;
    let config = conn.device.config().transfer.clone();
    let timeout = target.timeout;
    let session = &mut conn.session;

    match command {
        FsCommand::Stat { path } => {
            let result = fs::stat(session, &path, timeout).await;
            let info = conn.finish("stat failed", result).await?;
            print_infos(std::slice::from_ref(&info), format);
        }
        FsCommand::Ls { path } => {
            let result = fs::list(session, &path, timeout).await;
            let mut infos = conn.finish("list failed", result).await?;
            infos.sort_by(|a, b| a.name.cmp(&b.name));
            print_infos(&infos, format);
        }
        FsCommand::Get(args) => {
            let result = download(session, &args, &config).await;
            let data = conn.finish("download failed", result).await?;
            match &args.local {
                Some(local) => tokio::fs::write(local, &data)
                    .await
                    .map_err(|err| io_error(&format!("write {}", local.display()), err))?,
                None => print_raw(&data),
            }
        }
        FsCommand::Put { remote, .. } => {
            let data = upload.unwrap_or_default();
            let result =
                fs::write_file(session, &remote, &data, &config, &mut progress("upload")).await;
            conn.finish("upload failed", result).await?;
        }
        FsCommand::Rm { path } => {
            let result = fs::remove(session, &path, timeout).await;
            conn.finish("remove failed", result).await?;
        }
        FsCommand::Mv { from, to } => {
            let result = fs::rename(session, &from, &to, timeout).await;
            conn.finish("rename failed", result).await?;
        }
        FsCommand::Mkdir { path } => {
            let result = fs::mkdir(session, &path, timeout).await;
            conn.finish("mkdir failed", result).await?;
        }
        FsCommand::Sha256 { path } => {
            let result = fs::sha256(session, &path, timeout).await;
            let hash = conn.finish("hash failed", result).await?;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "path": path,
                    "sha256": hex::encode(hash),
                })),
                OutputFormat::Raw => print_raw(&hash),
                OutputFormat::Table | OutputFormat::Pretty => {
                    println!("{}  {path}", hex::encode(hash))
                }
            }
        }
    }

    Ok(SUCCESS)
}

async fn download(
    session: &mut Session,
    args: &FsGetArgs,
    config: &TransferConfig,
) -> naos_endpoint::Result<Vec<u8>> {
    let len = match args.len {
        Some(len) => len,
        None => {
            let info = fs::stat(session, &args.remote, config.timeout).await?;
            info.size.saturating_sub(args.offset)
        }
    };
    fs::read_file_range(
        session,
        &args.remote,
        args.offset,
        len,
        config,
        &mut progress("download"),
    )
    .await
}

fn print_infos(infos: &[FsInfo], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(infos),
        OutputFormat::Table => print_table(
            &["NAME", "TYPE", "SIZE"],
            infos.iter().map(|info| {
                vec![
                    info.name.clone(),
                    if info.is_dir { "dir" } else { "file" }.to_string(),
                    info.size.to_string(),
                ]
            }),
        ),
        OutputFormat::Pretty | OutputFormat::Raw => {
            for info in infos {
                if info.is_dir {
                    println!("{}/", info.name);
                } else {
                    println!("{}\t{}", info.name, info.size);
                }
            }
        }
    }
}
