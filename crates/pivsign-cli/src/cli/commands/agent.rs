use std::time::Duration;

use anyhow::Context;
use pivsign_core::config::default_agent_socket;
use pivsign_core::{Agent, Config};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::token::build_authority;
use crate::cli::args::AgentArgs;
use crate::exit_codes::SUCCESS;

pub async fn run(args: AgentArgs, config: &Config) -> anyhow::Result<i32> {
    let authority = build_authority(&config.authority, &args.token)?;
    if args.self_test {
        authority
            .self_test()
            .await
            .context("self-test failed, not starting")?;
    }

    let public_key = args
        .public_key
        .or_else(|| config.authority.public_key.clone());
    let request_timeout = args
        .request_timeout
        .map_or_else(|| config.channel.request_timeout(), Duration::from_secs);
    let agent = Agent::start(authority, public_key.as_deref())
        .await?
        .with_request_timeout(request_timeout);

    let socket = args.socket.unwrap_or_else(default_agent_socket);
    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    agent.serve(&socket, shutdown).await?;
    Ok(SUCCESS)
}

async fn wait_for_signal(shutdown: CancellationToken) {
    let mut terminate =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                return;
            }
        };
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!(error = %e, "cannot listen for Ctrl-C");
                return;
            }
        }
        _ = terminate.recv() => {}
    }
    info!("shutting down");
    shutdown.cancel();
}
