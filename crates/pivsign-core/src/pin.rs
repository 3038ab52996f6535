//! PIN sources for token authentication.
//!
//! Resolution order:
//! 1. Inline override (`PIV_PIN`)
//! 2. Credential command (`--pin-command` or `PIV_PIN_COMMAND`), run through `sh -c`
//! 3. Interactive prompt, only when stdin is a terminal
//!
//! The PIN is resolved per signing request and dropped with the session. It
//! is never logged: [`Pin`] redacts itself in `Debug`.

use std::fmt;
use std::io::IsTerminal;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::{SignError, SignResult};

/// Default bound on the credential command.
pub const DEFAULT_PIN_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// A token PIN.
#[derive(Clone, PartialEq, Eq)]
pub struct Pin(String);

impl Pin {
    pub fn new(pin: impl Into<String>) -> Self {
        Self(pin.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pin(<redacted>)")
    }
}

/// Where the PIN comes from.
#[derive(Debug, Clone)]
pub enum PinSource {
    /// Static PIN (from config, flag or env).
    Inline(Pin),

    /// Shell command that prints the PIN on stdout.
    Command { command: String, timeout: Duration },

    /// Ask on the terminal.
    Prompt,
}

impl PinSource {
    /// Pick a source by precedence from optional inline PIN and command.
    pub fn select(inline: Option<String>, command: Option<String>) -> Self {
        if let Some(pin) = inline.filter(|p| !p.is_empty()) {
            return Self::Inline(Pin::new(pin));
        }
        if let Some(command) = command.filter(|c| !c.trim().is_empty()) {
            return Self::Command {
                command,
                timeout: DEFAULT_PIN_COMMAND_TIMEOUT,
            };
        }
        Self::Prompt
    }

    /// Override the credential command timeout (no-op for other sources).
    pub fn with_command_timeout(self, timeout: Duration) -> Self {
        match self {
            Self::Command { command, .. } => Self::Command { command, timeout },
            other => other,
        }
    }

    /// Short description for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Inline(_) => "inline",
            Self::Command { .. } => "command",
            Self::Prompt => "prompt",
        }
    }

    /// Fetch the PIN.
    pub async fn resolve(&self) -> SignResult<Pin> {
        debug!(source = self.kind(), "resolving PIN");
        match self {
            Self::Inline(pin) => Ok(pin.clone()),
            Self::Command { command, timeout } => run_pin_command(command, *timeout).await,
            Self::Prompt => prompt_pin().await,
        }
    }
}

async fn run_pin_command(command: &str, timeout: Duration) -> SignResult<Pin> {
    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SignError::AuthenticationFailure {
            reason: format!("failed to run pin command: {e}"),
        })?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| SignError::AuthenticationFailure {
            reason: "pin command timed out".to_string(),
        })?
        .map_err(|e| SignError::AuthenticationFailure {
            reason: format!("pin command failed: {e}"),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let pin = stdout.trim();
    if !output.status.success() || pin.is_empty() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SignError::AuthenticationFailure {
            reason: format!(
                "pin command failed (exit {}): {}",
                output
                    .status
                    .code()
                    .map_or_else(|| "signal".to_string(), |c| c.to_string()),
                stderr.trim()
            ),
        });
    }

    Ok(Pin::new(pin))
}

async fn prompt_pin() -> SignResult<Pin> {
    if !std::io::stdin().is_terminal() {
        return Err(SignError::AuthenticationFailure {
            reason: "PIV PIN not available. Set PIV_PIN, use --pin-command, or run interactively"
                .to_string(),
        });
    }

    let pin = tokio::task::spawn_blocking(|| {
        dialoguer::Password::new()
            .with_prompt("PIV PIN")
            .interact()
    })
    .await
    .map_err(|e| SignError::AuthenticationFailure {
        reason: format!("pin prompt aborted: {e}"),
    })?
    .map_err(|e| SignError::AuthenticationFailure {
        reason: format!("pin prompt failed: {e}"),
    })?;

    Ok(Pin::new(pin))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_debug_is_redacted() {
        let pin = Pin::new("123456");
        let shown = format!("{:?}", PinSource::Inline(pin));
        assert!(!shown.contains("123456"));
        assert!(shown.contains("redacted"));
    }

    #[test]
    fn test_select_precedence() {
        let s = PinSource::select(Some("1111".into()), Some("echo 2222".into()));
        assert!(matches!(s, PinSource::Inline(_)));

        let s = PinSource::select(Some(String::new()), Some("echo 2222".into()));
        assert!(matches!(s, PinSource::Command { .. }));

        let s = PinSource::select(None, None);
        assert!(matches!(s, PinSource::Prompt));
    }

    #[tokio::test]
    async fn test_inline_resolves() {
        let pin = PinSource::Inline(Pin::new("123456")).resolve().await.unwrap();
        assert_eq!(pin.as_str(), "123456");
    }

    #[tokio::test]
    async fn test_command_output_is_trimmed() {
        let source = PinSource::select(None, Some("printf '  654321\\n'".into()));
        let pin = source.resolve().await.unwrap();
        assert_eq!(pin.as_str(), "654321");
    }

    #[tokio::test]
    async fn test_command_failure_is_authentication_failure() {
        let source = PinSource::select(None, Some("echo nope >&2; exit 3".into()));
        let err = source.resolve().await.unwrap_err();
        match err {
            SignError::AuthenticationFailure { reason } => {
                assert!(reason.contains("exit 3"), "{reason}");
                assert!(reason.contains("nope"), "{reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_command_empty_output_rejected() {
        let source = PinSource::select(None, Some("true".into()));
        assert!(matches!(
            source.resolve().await,
            Err(SignError::AuthenticationFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let source = PinSource::select(None, Some("sleep 5".into()))
            .with_command_timeout(Duration::from_millis(100));
        let err = source.resolve().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
