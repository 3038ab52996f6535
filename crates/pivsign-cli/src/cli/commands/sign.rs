//! `signing_command` entry point.
//!
//! `pkg repo` keeps stdin open: only the first line is read. Everything
//! except the final block goes to stderr.

use std::sync::Arc;
use std::time::Duration;

use pivsign_core::adapter::colocated_public_key;
use pivsign_core::{
    ChannelTransport, Config, Fingerprint, MailboxTransport, SigningCommand,
    Transport, TransportKind,
};

use crate::cli::args::SignArgs;
use crate::exit_codes::SUCCESS;

pub fn build_transport(args: &SignArgs, config: &Config) -> anyhow::Result<Arc<dyn Transport>> {
    let kind = args.transport.unwrap_or(config.adapter.transport);
    Ok(match kind {
        TransportKind::Channel => {
            let mut channel = config.channel.clone();
            if let Some(socket) = &args.socket {
                channel = channel.with_socket(socket);
            }
            if let Some(secs) = args.timeout {
                channel = channel.with_timeout(Duration::from_secs(secs));
            }
            Arc::new(ChannelTransport::from_config(&channel))
        }
        TransportKind::Mailbox => {
            let mut mailbox = config.mailbox.clone();
            if let Some(dir) = &args.mailbox_dir {
                mailbox = mailbox.with_dir(dir);
            }
            Arc::new(MailboxTransport::from_config(&mailbox)?)
        }
    })
}

pub async fn run(args: SignArgs, config: &Config) -> anyhow::Result<i32> {
    let transport = build_transport(&args, config)?;

    let pinned = args
        .fingerprint_file
        .or_else(|| config.adapter.fingerprint_file.clone())
        .map(|path| Fingerprint::load(&path))
        .transpose()?;

    let command = SigningCommand::new(transport)
        .with_public_key(args.public_key.or_else(|| config.adapter.public_key.clone()))
        .with_colocated(colocated_public_key())
        .with_pinned(pinned);

    command
        .execute(std::io::stdin().lock(), &mut std::io::stdout().lock())
        .await?;
    Ok(SUCCESS)
}
