use pivsign_core::mailbox::write_atomic;
use pivsign_core::{Config, Fingerprint};
use tracing::info;

use super::read_file;
use super::token::build_authority;
use crate::cli::args::{FingerprintArgs, PubkeyArgs};
use crate::exit_codes::SUCCESS;

pub async fn cmd_pubkey(args: PubkeyArgs, config: &Config) -> anyhow::Result<i32> {
    let authority = build_authority(&config.authority, &args.token)?;
    let pem = authority.export_public_key().await?;
    let fingerprint = Fingerprint::of_pem(pem.as_bytes());

    match &args.out {
        Some(path) => {
            write_atomic(path, &pem).await?;
            info!(path = %path.display(), %fingerprint, "public key written");
        }
        None => print!("{pem}"),
    }
    if let Some(path) = &args.fingerprint_out {
        fingerprint.write(path)?;
        info!(path = %path.display(), "fingerprint written");
    }
    Ok(SUCCESS)
}

pub fn cmd_fingerprint(args: FingerprintArgs) -> anyhow::Result<i32> {
    let pem = read_file(&args.public_key, "public key")?;
    let fingerprint = Fingerprint::of_pem(&pem);
    match &args.out {
        Some(path) => fingerprint.write(path)?,
        None => println!("{fingerprint}"),
    }
    Ok(SUCCESS)
}
