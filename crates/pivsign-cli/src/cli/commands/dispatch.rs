use super::super::args::*;
use crate::exit_codes::SUCCESS;
use pivsign_core::Config;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.cmd {
        Command::Agent(args) => super::agent::run(args, &config).await,
        Command::Sign(args) => super::sign::run(args, &config).await,
        Command::Forward(args) => super::forward::run(args, &config).await,
        Command::Coordinate(args) => super::coordinate::run(args, &config).await,
        Command::MailboxClean(args) => super::mailbox::run(args, &config).await,
        Command::Pubkey(args) => super::keys::cmd_pubkey(args, &config).await,
        Command::Fingerprint(args) => super::keys::cmd_fingerprint(args),
        Command::Verify(args) => super::verify::run(args, &config),
        Command::SelfTest(args) => super::self_test::run(args, &config).await,
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(SUCCESS)
        }
    }
}
