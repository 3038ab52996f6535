use pivsign_core::verify::verify_repo_hash;
use pivsign_core::{Config, Fingerprint, RepoHash, SignError, SignedBlock};

use super::read_file;
use crate::cli::args::VerifyArgs;
use crate::exit_codes::SUCCESS;

pub fn run(args: VerifyArgs, config: &Config) -> anyhow::Result<i32> {
    let (signature, pem) = match &args.block {
        Some(path) => {
            let block = SignedBlock::parse(&read_file(path, "signed block")?)?;
            (block.signature, block.public_key)
        }
        None => {
            let (Some(sig_path), Some(key_path)) = (&args.signature, &args.public_key) else {
                anyhow::bail!(SignError::Config {
                    message: "--signature and --public-key are required without --block"
                        .to_string(),
                });
            };
            (
                read_file(sig_path, "signature")?,
                read_file(key_path, "public key")?,
            )
        }
    };

    let hash = match (&args.content, &args.hash) {
        (Some(path), _) => RepoHash::of_content(&read_file(path, "content")?),
        (None, Some(hex)) => RepoHash::parse(hex.trim())?,
        (None, None) => anyhow::bail!(SignError::Config {
            message: "one of --content or --hash is required".to_string(),
        }),
    };

    let pinned = args
        .fingerprint_file
        .or_else(|| config.adapter.fingerprint_file.clone())
        .map(|path| Fingerprint::load(&path))
        .transpose()?;

    let report = verify_repo_hash(&hash, &signature, &pem, pinned.as_ref())?;
    println!(
        "OK: {} signed by {}{}",
        report.repo_hash,
        report.fingerprint,
        if report.pinned { " (pinned)" } else { "" }
    );
    Ok(SUCCESS)
}
