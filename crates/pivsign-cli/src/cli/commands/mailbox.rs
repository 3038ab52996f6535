use pivsign_core::mailbox::Mailbox;
use pivsign_core::Config;
use tracing::info;

use crate::cli::args::MailboxCleanArgs;
use crate::exit_codes::SUCCESS;

pub async fn run(args: MailboxCleanArgs, config: &Config) -> anyhow::Result<i32> {
    let mut mailbox_config = config.mailbox.clone();
    if let Some(dir) = args.mailbox_dir {
        mailbox_config = mailbox_config.with_dir(dir);
    }
    let mailbox = Mailbox::new(mailbox_config.require_dir()?);
    mailbox.clean().await?;
    info!(dir = %mailbox.dir().display(), "mailbox cleaned");
    Ok(SUCCESS)
}
