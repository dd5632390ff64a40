use naos_endpoint::auth::{self, AuthData};
use serde::Serialize;

use crate::cmd::connect::Connection;
use crate::cmd::{AuthCommand, TargetArgs};
use crate::exit::{CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct IdentityOutput {
    uuid: String,
    product: u16,
    revision: u16,
    batch: u16,
    date: u32,
}

impl From<AuthData> for IdentityOutput {
    fn from(data: AuthData) -> Self {
        Self {
            uuid: hex::encode(data.uuid),
            product: data.product,
            revision: data.revision,
            batch: data.batch,
            date: data.date,
        }
    }
}

pub async fn run(
    command: AuthCommand,
    target: &TargetArgs,
    format: OutputFormat,
) -> CliResult<i32> {
    let mut conn = Connection::open(target).await?;
    let timeout = target.timeout;

    match command {
        AuthCommand::Status => {
            let result = auth::status(&mut conn.session, timeout).await;
            let provisioned = conn.finish("status failed", result).await?;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({ "provisioned": provisioned })),
                _ => println!("provisioned: {provisioned}"),
            }
        }
        AuthCommand::Describe(args) => {
            let result = auth::describe(&mut conn.session, &args.key, timeout).await;
            let out = IdentityOutput::from(conn.finish("describe failed", result).await?);
            match format {
                OutputFormat::Json => print_json(&out),
                _ => {
                    println!("Identity:");
                    println!("  UUID:     {}", out.uuid);
                    println!("  Product:  {}", out.product);
                    println!("  Revision: {}", out.revision);
                    println!("  Batch:    {}", out.batch);
                    println!("  Date:     {}", out.date);
                }
            }
        }
        AuthCommand::Attest(args) => {
            let challenge = auth::random_challenge();
            let result = auth::attest(&mut conn.session, &challenge, timeout).await;
            let response = conn.finish("attest failed", result).await?;
            let valid = auth::verify_attestation(&args.key, &challenge, &response)
                .map_err(|err| crate::exit::endpoint_error("attest failed", err))?;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({ "valid": valid })),
                _ => println!("attestation: {}", if valid { "valid" } else { "INVALID" }),
            }
            if !valid {
                return Err(CliError::new(DATA_INVALID, "attestation failed"));
            }
        }
    }

    Ok(SUCCESS)
}
