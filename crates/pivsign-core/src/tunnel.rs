//! SSH tunnel for the forwarded channel.
//!
//! The stale rendezvous socket on the build host is removed in its own SSH
//! invocation before the `-R` forward is set up. Without that step a leftover
//! socket (from a crashed run or another agent) could receive the signing
//! request.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{SignError, SignResult};
use crate::remote::{
    describe_status, ensure_success, quote, run_argv, RemoteShell, DEFAULT_REMOTE_TIMEOUT,
};

/// Outcome of a forwarded run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelReport {
    pub artifact_checked: bool,
}

#[derive(Debug, Clone)]
pub struct Tunnel {
    ssh: String,
    options: Vec<String>,
    target: String,
    remote_socket: String,
    local_socket: PathBuf,
    artifact: Option<String>,
}

impl Tunnel {
    pub fn new(
        target: impl Into<String>,
        remote_socket: impl Into<String>,
        local_socket: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ssh: "ssh".to_string(),
            options: Vec::new(),
            target: target.into(),
            remote_socket: remote_socket.into(),
            local_socket: local_socket.into(),
            artifact: None,
        }
    }

    /// Use another ssh binary.
    pub fn with_ssh(mut self, program: impl Into<String>) -> Self {
        self.ssh = program.into();
        self
    }

    /// Extra ssh options placed before the target (e.g. `-p 2222`).
    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    /// Trust artifact on the build host that must exist after the run.
    pub fn with_artifact(mut self, path: impl Into<String>) -> Self {
        self.artifact = Some(path.into());
        self
    }

    fn shell(&self) -> RemoteShell {
        let mut args = self.options.clone();
        args.push(self.target.clone());
        RemoteShell::new(self.ssh.clone(), args)
    }

    /// Argv removing the stale rendezvous socket.
    pub fn clear_argv(&self) -> SignResult<Vec<String>> {
        Ok(self
            .shell()
            .argv(&format!("rm -f {}", quote(&self.remote_socket)?)))
    }

    /// Argv running `command` with the agent socket forwarded.
    pub fn forward_argv(&self, command: &str) -> Vec<String> {
        let mut argv = vec![self.ssh.clone()];
        argv.extend(self.options.iter().cloned());
        argv.extend(
            [
                "-o",
                "ExitOnForwardFailure=yes",
                "-o",
                "StreamLocalBindUnlink=yes",
                "-R",
            ]
            .map(String::from),
        );
        argv.push(format!(
            "{}:{}",
            self.remote_socket,
            self.local_socket.display()
        ));
        argv.push(self.target.clone());
        argv.push(command.to_string());
        argv
    }

    /// Argv testing that `path` exists on the build host.
    pub fn artifact_argv(&self, path: &str) -> SignResult<Vec<String>> {
        Ok(self.shell().argv(&format!("test -e {}", quote(path)?)))
    }

    /// Remove the stale rendezvous socket.
    pub async fn clear_rendezvous(&self) -> SignResult<()> {
        let argv = self.clear_argv()?;
        run_argv(&argv, None, DEFAULT_REMOTE_TIMEOUT)
            .await
            .and_then(|output| ensure_success(&argv, output))
            .map_err(|e| SignError::RemoteCommand {
                reason: format!("clearing stale rendezvous failed: {e}"),
            })?;
        info!(target = %self.target, socket = %self.remote_socket, "stale rendezvous cleared");
        Ok(())
    }

    /// Clear the rendezvous, run `command` through the forward, then check the artifact.
    pub async fn run(&self, command: &str) -> SignResult<TunnelReport> {
        if !is_socket(&self.local_socket) {
            return Err(SignError::TransportUnavailable {
                reason: format!("agent socket {} not found", self.local_socket.display()),
            });
        }

        self.clear_rendezvous().await?;

        let argv = self.forward_argv(command);
        info!(target = %self.target, command, "forwarding agent socket");
        let status = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| SignError::RemoteCommand {
                reason: format!("failed to run {}: {}", self.ssh, e),
            })?;

        if !status.success() {
            warn!(status = %describe_status(status), "remote command failed");
            return Err(SignError::RemoteCommand {
                reason: format!("remote command failed ({})", describe_status(status)),
            });
        }

        let artifact_checked = match &self.artifact {
            Some(path) => {
                let output =
                    run_argv(&self.artifact_argv(path)?, None, DEFAULT_REMOTE_TIMEOUT).await?;
                if !output.status.success() {
                    return Err(SignError::ArtifactMissing { path: path.clone() });
                }
                true
            }
            None => false,
        };
        Ok(TunnelReport { artifact_checked })
    }
}

fn is_socket(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;
    std::fs::metadata(path)
        .map(|m| m.file_type().is_socket())
        .unwrap_or(false)
}
