//! Shell command channel to the build host.
//!
//! A [`RemoteShell`] is an argv prefix (`ssh builder`, or `sh -c` for a
//! local stand-in) that takes one shell script as its final argument.

use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{SignError, SignResult};

/// Default bound on one remote shell command.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteShell {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl RemoteShell {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }

    /// Split a prefix such as `"ssh -p 2222 builder"` with shell rules.
    pub fn parse(spec: &str) -> SignResult<Self> {
        let mut words = shlex::split(spec)
            .filter(|w| !w.is_empty())
            .ok_or_else(|| SignError::Config {
                message: format!("invalid remote shell: {spec:?}"),
            })?
            .into_iter();
        let program = words.next().ok_or_else(|| SignError::Config {
            message: "remote shell is empty".to_string(),
        })?;
        Ok(Self::new(program, words.collect()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Full argv for `script`.
    pub fn argv(&self, script: &str) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 2);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv.push(script.to_string());
        argv
    }

    /// Run `script`, feeding `input` on stdin when given.
    pub async fn run(&self, script: &str, input: Option<&[u8]>) -> SignResult<Output> {
        run_argv(&self.argv(script), input, self.timeout).await
    }

    /// Run `script` and require a zero exit status.
    pub async fn run_checked(&self, script: &str, input: Option<&[u8]>) -> SignResult<Output> {
        let argv = self.argv(script);
        let output = run_argv(&argv, input, self.timeout).await?;
        ensure_success(&argv, output)
    }
}

/// Spawn `argv` with piped output and wait at most `timeout` for it.
pub(crate) async fn run_argv(
    argv: &[String],
    input: Option<&[u8]>,
    timeout: Duration,
) -> SignResult<Output> {
    let (program, args) = argv.split_first().ok_or_else(|| SignError::Config {
        message: "empty remote command".to_string(),
    })?;
    let script = args.last().map_or("", String::as_str);
    debug!(program = %program, script, "remote command");

    let mut child = Command::new(program)
        .args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SignError::RemoteCommand {
            reason: format!("failed to run {program}: {e}"),
        })?;

    if let (Some(bytes), Some(mut stdin)) = (input, child.stdin.take()) {
        stdin.write_all(bytes).await?;
        stdin.shutdown().await?;
    }

    tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| SignError::RemoteCommand {
            reason: format!("{script:?} timed out"),
        })?
        .map_err(SignError::from)
}

/// Turn a nonzero exit of `argv` into [`SignError::RemoteCommand`] carrying its stderr.
pub(crate) fn ensure_success(argv: &[String], output: Output) -> SignResult<Output> {
    if output.status.success() {
        return Ok(output);
    }
    let script = argv.last().map_or("", String::as_str);
    Err(SignError::RemoteCommand {
        reason: format!(
            "{script:?} failed ({}): {}",
            describe_status(output.status),
            String::from_utf8_lossy(&output.stderr).trim()
        ),
    })
}

/// Quote one word for a POSIX shell.
pub fn quote(word: &str) -> SignResult<String> {
    shlex::try_quote(word)
        .map(|q| q.into_owned())
        .map_err(|e| SignError::Config {
            message: format!("cannot quote {word:?}: {e}"),
        })
}

pub(crate) fn describe_status(status: std::process::ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit {code}"),
        None => "killed by signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prefix() {
        let shell = RemoteShell::parse("ssh -p 2222 'build host'").unwrap();
        assert_eq!(
            shell.argv("true"),
            vec!["ssh", "-p", "2222", "build host", "true"]
        );
        assert!(RemoteShell::parse("").is_err());
        assert!(RemoteShell::parse("ssh 'unterminated").is_err());
    }

    #[test]
    fn test_quote_survives_shell_split() {
        for word in ["/tmp/a b", "/tmp/plain", "it's"] {
            let quoted = quote(word).unwrap();
            assert_eq!(shlex::split(&quoted).unwrap(), [word]);
        }
    }

    #[tokio::test]
    async fn test_run_with_input() {
        let shell = RemoteShell::new("sh", vec!["-c".to_string()]);
        let output = shell.run_checked("tr a-z A-Z", Some(b"hello")).await.unwrap();
        assert_eq!(output.stdout, b"HELLO");
    }

    #[tokio::test]
    async fn test_run_checked_reports_failure() {
        let shell = RemoteShell::new("sh", vec!["-c".to_string()]);
        let err = shell.run_checked("echo boom >&2; exit 4", None).await.unwrap_err();
        assert!(matches!(err, SignError::RemoteCommand { .. }));
        assert!(err.to_string().contains("exit 4"), "{err}");
        assert!(err.to_string().contains("boom"), "{err}");
    }

    #[tokio::test]
    async fn test_run_argv_rejects_empty_command() {
        let err = run_argv(&[], None, DEFAULT_REMOTE_TIMEOUT).await.unwrap_err();
        assert!(matches!(err, SignError::Config { .. }));
    }

    #[tokio::test]
    async fn test_run_timeout() {
        let shell = RemoteShell::new("sh", vec!["-c".to_string()])
            .with_timeout(Duration::from_millis(100));
        let err = shell.run("sleep 5", None).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
