use std::sync::Arc;
use std::time::Duration;

use pivsign_core::{Config, Coordinator, LocalMailbox, MailboxAccess, RemoteMailbox, RemoteShell};
use tracing::info;

use super::read_file;
use super::token::build_authority;
use crate::cli::args::CoordinateArgs;
use crate::exit_codes::SUCCESS;

pub async fn run(args: CoordinateArgs, config: &Config) -> anyhow::Result<i32> {
    let mut mailbox_config = config.mailbox.clone();
    if let Some(dir) = &args.mailbox_dir {
        mailbox_config = mailbox_config.with_dir(dir);
    }
    let dir = mailbox_config.require_dir()?.to_path_buf();

    let mailbox: Arc<dyn MailboxAccess> = match &args.remote_shell {
        Some(spec) => Arc::new(RemoteMailbox::new(RemoteShell::parse(spec)?, dir)?),
        None => Arc::new(LocalMailbox::new(dir)),
    };

    let authority = build_authority(&config.authority, &args.token)?;
    let interval = args
        .poll_interval_ms
        .map_or_else(|| mailbox_config.poll_interval(), Duration::from_millis);
    let mut coordinator = Coordinator::new(authority, mailbox).with_poll_interval(interval);

    if let Some(path) = args
        .public_key
        .or_else(|| config.authority.public_key.clone())
    {
        coordinator = coordinator.with_public_key(read_file(&path, "public key")?);
    }
    if let Some(artifact) = args.artifact {
        coordinator = coordinator.with_artifact(artifact);
    }

    let report = coordinator.run(&args.command).await?;
    info!(
        signatures = report.signatures,
        artifact_checked = report.artifact_checked,
        "coordination complete"
    );
    Ok(SUCCESS)
}
