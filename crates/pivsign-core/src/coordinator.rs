//! Mailbox coordinator: the Authority side of Variant B.
//!
//! Two tasks share a [`CancellationToken`]: the remote invocation (the
//! build that eventually runs the signing command) and the polling loop that
//! answers its mailbox requests. Any failure of the polling loop (mailbox
//! access or local signing) cancels the token, which kills the remote
//! invocation. The mailbox is cleaned on every exit
//! path.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::authority::SigningAuthority;
use crate::error::{SignError, SignResult};
use crate::mailbox::{Mailbox, REQUEST_FILE, RESPONSE_FILE};
use crate::protocol::{Request, Response};
use crate::remote::{describe_status, quote, RemoteShell};

/// How the coordinator reaches the mailbox directory.
#[async_trait]
pub trait MailboxAccess: Send + Sync {
    async fn read_request(&self) -> SignResult<Option<String>>;

    async fn write_response(&self, line: &str) -> SignResult<()>;

    async fn remove_request(&self) -> SignResult<()>;

    /// Delete every mailbox artifact. Idempotent.
    async fn clean(&self) -> SignResult<()>;

    /// Whether `path` exists on the mailbox side.
    async fn artifact_exists(&self, path: &Path) -> SignResult<bool>;

    fn describe(&self) -> String;
}

/// Mailbox on a filesystem both sides can see.
#[derive(Debug, Clone)]
pub struct LocalMailbox {
    mailbox: Mailbox,
}

impl LocalMailbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            mailbox: Mailbox::new(dir),
        }
    }
}

#[async_trait]
impl MailboxAccess for LocalMailbox {
    async fn read_request(&self) -> SignResult<Option<String>> {
        self.mailbox.read_request().await
    }

    async fn write_response(&self, line: &str) -> SignResult<()> {
        self.mailbox.write_response(line).await
    }

    async fn remove_request(&self) -> SignResult<()> {
        self.mailbox.remove_request().await
    }

    async fn clean(&self) -> SignResult<()> {
        self.mailbox.clean().await
    }

    async fn artifact_exists(&self, path: &Path) -> SignResult<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    fn describe(&self) -> String {
        format!("local mailbox {}", self.mailbox.dir().display())
    }
}

/// Exit status the lookup script uses for "no request yet".
const ABSENT_STATUS: i32 = 3;

/// Mailbox on the build host, reached through a [`RemoteShell`].
#[derive(Debug, Clone)]
pub struct RemoteMailbox {
    shell: RemoteShell,
    request: String,
    response: String,
    dir: PathBuf,
}

impl RemoteMailbox {
    pub fn new(shell: RemoteShell, dir: impl Into<PathBuf>) -> SignResult<Self> {
        let dir = dir.into();
        Ok(Self {
            request: quoted(&dir.join(REQUEST_FILE))?,
            response: quoted(&dir.join(RESPONSE_FILE))?,
            shell,
            dir,
        })
    }
}

fn quoted(path: &Path) -> SignResult<String> {
    quote(&path.to_string_lossy())
}

#[async_trait]
impl MailboxAccess for RemoteMailbox {
    async fn read_request(&self) -> SignResult<Option<String>> {
        let script = format!(
            "if [ -e {req} ]; then cat {req}; else exit {ABSENT_STATUS}; fi",
            req = self.request
        );
        let output = self.shell.run(&script, None).await?;
        match output.status.code() {
            Some(0) => Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned())),
            Some(ABSENT_STATUS) => Ok(None),
            _ => Err(SignError::RemoteCommand {
                reason: format!(
                    "reading remote request failed ({}): {}",
                    describe_status(output.status),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            }),
        }
    }

    async fn write_response(&self, line: &str) -> SignResult<()> {
        let script = format!(
            "cat > {resp}.tmp && mv -f {resp}.tmp {resp}",
            resp = self.response
        );
        self.shell.run_checked(&script, Some(line.as_bytes())).await?;
        Ok(())
    }

    async fn remove_request(&self) -> SignResult<()> {
        self.shell
            .run_checked(&format!("rm -f {}", self.request), None)
            .await?;
        Ok(())
    }

    async fn clean(&self) -> SignResult<()> {
        let script = format!(
            "rm -f {req} {resp} {req}.tmp {resp}.tmp",
            req = self.request,
            resp = self.response
        );
        self.shell.run_checked(&script, None).await?;
        Ok(())
    }

    async fn artifact_exists(&self, path: &Path) -> SignResult<bool> {
        let output = self
            .shell
            .run(&format!("test -e {}", quoted(path)?), None)
            .await?;
        Ok(output.status.success())
    }

    fn describe(&self) -> String {
        format!("remote mailbox {}", self.dir.display())
    }
}

/// Outcome of a successful coordination run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorReport {
    pub signatures: usize,
    pub artifact_checked: bool,
}

pub struct Coordinator {
    authority: Arc<SigningAuthority>,
    mailbox: Arc<dyn MailboxAccess>,
    poll_interval: Duration,
    public_key: Option<Vec<u8>>,
    artifact: Option<PathBuf>,
}

impl Coordinator {
    pub fn new(authority: Arc<SigningAuthority>, mailbox: Arc<dyn MailboxAccess>) -> Self {
        Self {
            authority,
            mailbox,
            poll_interval: Duration::from_millis(500),
            public_key: None,
            artifact: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Serve these bytes for `PUBKEY` instead of exporting from the token.
    pub fn with_public_key(mut self, pem: Vec<u8>) -> Self {
        self.public_key = Some(pem);
        self
    }

    /// Trust artifact that must exist once the remote invocation has finished.
    pub fn with_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact = Some(path.into());
        self
    }

    /// Run `command` and answer its mailbox requests until it exits.
    pub async fn run(&self, command: &[String]) -> SignResult<CoordinatorReport> {
        self.mailbox.clean().await?;
        let outcome = self.run_inner(command).await;
        if let Err(e) = self.mailbox.clean().await {
            warn!(error = %e, "mailbox cleanup failed");
        }
        outcome
    }

    async fn run_inner(&self, command: &[String]) -> SignResult<CoordinatorReport> {
        let (program, args) = command.split_first().ok_or_else(|| SignError::Config {
            message: "no remote command given".to_string(),
        })?;

        let cancel = CancellationToken::new();
        let mut remote = spawn_remote(program, args, cancel.clone())?;
        info!(command = %command.join(" "), mailbox = %self.mailbox.describe(), "remote invocation started");

        let mut signatures = 0;
        let status = loop {
            tokio::select! {
                joined = &mut remote => {
                    break joined.map_err(|e| SignError::RemoteCommand {
                        reason: format!("remote task failed: {e}"),
                    })??;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            match self.poll_once().await {
                Ok(signed) => signatures += usize::from(signed),
                Err(e) => {
                    error!(code = e.code(), error = %e, "coordination failed, aborting remote invocation");
                    cancel.cancel();
                    let _ = remote.await;
                    return Err(e);
                }
            }
        };

        let Some(status) = status else {
            return Err(SignError::RemoteCommand {
                reason: "remote invocation cancelled".to_string(),
            });
        };
        if !status.success() {
            return Err(SignError::RemoteCommand {
                reason: format!("remote invocation failed ({})", describe_status(status)),
            });
        }
        info!(signatures, "remote invocation finished");

        let artifact_checked = match &self.artifact {
            Some(path) => {
                if !self.mailbox.artifact_exists(path).await? {
                    return Err(SignError::ArtifactMissing {
                        path: path.display().to_string(),
                    });
                }
                true
            }
            None => false,
        };

        Ok(CoordinatorReport {
            signatures,
            artifact_checked,
        })
    }

    /// Answer a pending request, if any. Returns whether a signature was produced.
    async fn poll_once(&self) -> SignResult<bool> {
        match self.mailbox.read_request().await? {
            Some(line) => self.answer(&line).await,
            None => Ok(false),
        }
    }

    /// Handle one request line. Returns whether a signature was produced.
    ///
    /// Malformed requests are answered with an `ERR` line; signing failures
    /// are returned to the caller and leave no response behind.
    async fn answer(&self, line: &str) -> SignResult<bool> {
        let request = match Request::parse(line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "malformed mailbox request");
                self.respond(&Response::from_result(Err(e))).await?;
                return Ok(false);
            }
        };

        match request {
            Request::PublicKey => {
                let pem = match &self.public_key {
                    Some(pem) => pem.clone(),
                    None => self.authority.export_public_key().await?.into_bytes(),
                };
                self.respond(&Response::Ok(pem)).await?;
                Ok(false)
            }
            Request::Sign { algorithm, digest } => {
                info!(digest = %digest.to_hex(), "mailbox sign request");
                let signature = self.authority.sign(&digest, algorithm).await?;
                self.respond(&Response::Ok(signature)).await?;
                Ok(true)
            }
        }
    }

    async fn respond(&self, response: &Response) -> SignResult<()> {
        self.mailbox.write_response(&response.to_line()).await?;
        self.mailbox.remove_request().await?;
        debug!("mailbox response written");
        Ok(())
    }
}

/// Spawn the remote invocation. Resolves to `None` if cancelled (the child is killed).
fn spawn_remote(
    program: &str,
    args: &[String],
    cancel: CancellationToken,
) -> SignResult<JoinHandle<SignResult<Option<ExitStatus>>>> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SignError::RemoteCommand {
            reason: format!("failed to start {program}: {e}"),
        })?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            status = child.wait() => status.map(Some).map_err(SignError::from),
            _ = cancel.cancelled() => child.kill().await.map(|()| None).map_err(SignError::from),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{SoftToken, Token, Touch};
    use crate::pin::{Pin, PinSource};
    use crate::test_support::test_key;

    fn authority(touch: Touch) -> Arc<SigningAuthority> {
        let token: Arc<dyn Token> =
            Arc::new(SoftToken::new(test_key()).with_touch(touch));
        Arc::new(
            SigningAuthority::new(token, PinSource::Inline(Pin::new("123456")))
                .with_require_touch(false),
        )
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_remote_failure_is_reported_and_mailbox_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("request"), "stale").unwrap();
        let mailbox = Arc::new(LocalMailbox::new(dir.path()));

        let err = Coordinator::new(authority(Touch::Immediate), mailbox)
            .with_poll_interval(Duration::from_millis(10))
            .run(&sh("exit 7"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exit 7"), "{err}");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_artifact_fails_despite_success() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = Arc::new(LocalMailbox::new(dir.path()));

        let err = Coordinator::new(authority(Touch::Immediate), mailbox)
            .with_poll_interval(Duration::from_millis(10))
            .with_artifact(dir.path().join("meta.conf"))
            .run(&sh("true"))
            .await
            .unwrap_err();
        assert!(matches!(err, SignError::ArtifactMissing { .. }));
    }

    #[tokio::test]
    async fn test_malformed_request_gets_err_response() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = Arc::new(LocalMailbox::new(dir.path()));
        let coordinator = Coordinator::new(authority(Touch::Immediate), mailbox);

        assert!(!coordinator.answer("BOGUS\n").await.unwrap());
        let response = std::fs::read_to_string(dir.path().join("response")).unwrap();
        assert_eq!(response, "ERR malformed_request: unknown command\n");
        assert!(!dir.path().join("request").exists());
    }

    struct UnreachableMailbox;

    #[async_trait]
    impl MailboxAccess for UnreachableMailbox {
        async fn read_request(&self) -> SignResult<Option<String>> {
            Err(SignError::RemoteCommand {
                reason: "ssh: connection reset".to_string(),
            })
        }

        async fn write_response(&self, _line: &str) -> SignResult<()> {
            Ok(())
        }

        async fn remove_request(&self) -> SignResult<()> {
            Ok(())
        }

        async fn clean(&self) -> SignResult<()> {
            Ok(())
        }

        async fn artifact_exists(&self, _path: &Path) -> SignResult<bool> {
            Ok(false)
        }

        fn describe(&self) -> String {
            "unreachable".to_string()
        }
    }

    #[tokio::test]
    async fn test_mailbox_failure_kills_remote_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let script = format!("sleep 0.5; touch {}", marker.display());

        let err = Coordinator::new(authority(Touch::Immediate), Arc::new(UnreachableMailbox))
            .with_poll_interval(Duration::from_millis(10))
            .run(&sh(&script))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection reset"), "{err}");

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(!marker.exists(), "remote invocation outlived the coordinator");
    }

    #[tokio::test]
    async fn test_remote_mailbox_through_shell() {
        let dir = tempfile::tempdir().unwrap();
        let shell = RemoteShell::new("sh", vec!["-c".to_string()]);
        let mailbox = RemoteMailbox::new(shell, dir.path()).unwrap();

        assert!(mailbox.read_request().await.unwrap().is_none());
        std::fs::write(dir.path().join("request"), "PUBKEY\n").unwrap();
        assert_eq!(
            mailbox.read_request().await.unwrap().as_deref(),
            Some("PUBKEY\n")
        );

        mailbox.write_response("OK AAAA\n").await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("response")).unwrap(),
            "OK AAAA\n"
        );
        assert!(!dir.path().join("response.tmp").exists());

        assert!(mailbox.artifact_exists(&dir.path().join("response")).await.unwrap());
        mailbox.clean().await.unwrap();
        mailbox.clean().await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(!mailbox.artifact_exists(&dir.path().join("response")).await.unwrap());
    }
}
