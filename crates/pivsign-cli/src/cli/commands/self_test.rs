use pivsign_core::{Config, Fingerprint};

use super::token::build_authority;
use crate::cli::args::SelfTestArgs;
use crate::exit_codes::SUCCESS;

pub async fn run(args: SelfTestArgs, config: &Config) -> anyhow::Result<i32> {
    let authority = build_authority(&config.authority, &args.token)?;
    let pem = authority.self_test().await?;
    println!(
        "self-test passed: {} ({})",
        Fingerprint::of_pem(pem.as_bytes()),
        authority.describe()
    );
    Ok(SUCCESS)
}
