use pivsign_core::config::default_agent_socket;
use pivsign_core::{Config, Tunnel};
use tracing::info;

use crate::cli::args::ForwardArgs;
use crate::exit_codes::SUCCESS;

pub async fn run(args: ForwardArgs, _config: &Config) -> anyhow::Result<i32> {
    let socket = args.socket.unwrap_or_else(default_agent_socket);
    let mut tunnel = Tunnel::new(args.target, args.remote_socket, socket)
        .with_ssh(args.ssh)
        .with_options(args.ssh_options);
    if let Some(artifact) = args.artifact {
        tunnel = tunnel.with_artifact(artifact);
    }

    // ssh joins the remote words with spaces itself
    let report = tunnel.run(&args.command.join(" ")).await?;
    info!(artifact_checked = report.artifact_checked, "remote command finished");
    Ok(SUCCESS)
}
