//! Configuration.
//!
//! Each component has a config struct with serde defaults, an `apply_env()`
//! overlay and `with_*` builders. A YAML file can hold all of them:
//!
//! ```yaml
//! authority:
//!   slot: "9c"
//!   confirmation_timeout_secs: 30
//! mailbox:
//!   dir: /var/run/pivsign
//!   poll_attempts: 240
//! ```
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `PIV_SLOT` | PIV slot of the signing key (default `9c`) |
//! | `PKCS11_MODULE` | PKCS#11 module path (auto-detected) |
//! | `PIV_AGENT_SOCK` | Agent / forwarded socket path |
//! | `REPO_PUB` | Public key override for the signing command |
//! | `PIVSIGN_TRANSPORT` | `channel` or `mailbox` |
//! | `PIVSIGN_MAILBOX_DIR` | Mailbox directory |
//! | `PIVSIGN_POLL_ATTEMPTS` | Mailbox poll attempts (default 240) |
//! | `PIVSIGN_POLL_INTERVAL_MS` | Mailbox poll interval (default 500) |
//! | `PIVSIGN_SOCKET_TIMEOUT` | Channel I/O timeout in seconds (default 60) |
//! | `PIVSIGN_REQUEST_TIMEOUT` | Agent bound on reading one request, in seconds (default 60) |
//! | `PIVSIGN_CONFIRM_TIMEOUT` | Outer confirmation timeout in seconds (default 30) |
//! | `PIVSIGN_TOUCH_TIMEOUT` | Hardware touch timeout in seconds (default 15) |
//! | `PIVSIGN_REQUIRE_TOUCH` | Whether signing waits for a touch (default true) |
//! | `PIVSIGN_FINGERPRINT_FILE` | Pinned fingerprint checked by the signing command |
//!
//! A variable that is set but does not parse is a [`SignError::Config`].

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::authority::PivSlot;
use crate::error::{SignError, SignResult};

/// Default agent socket on the workstation.
pub fn default_agent_socket() -> PathBuf {
    if let Some(path) = env_var("PIV_AGENT_SOCK") {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".piv-sign-agent")
        .join("agent.sock")
}

/// Default forwarded socket on the build host.
pub const DEFAULT_FORWARDED_SOCKET: &str = "/tmp/piv-sign-agent.sock";

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> SignResult<Option<T>> {
    env_var(name)
        .map(|v| {
            v.parse().map_err(|_| SignError::Config {
                message: format!("invalid {name}: {v:?}"),
            })
        })
        .transpose()
}

fn env_bool(name: &str) -> SignResult<Option<bool>> {
    env_var(name)
        .map(|v| match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(SignError::Config {
                message: format!("invalid {name}: {v:?} (expected true or false)"),
            }),
        })
        .transpose()
}

/// Signing Authority configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// PIV slot holding the signing key.
    pub slot: PivSlot,

    /// PKCS#11 module path (auto-detected when unset).
    pub module: Option<PathBuf>,

    /// Outer bound on a hardware signing call, in seconds.
    pub confirmation_timeout_secs: u64,

    /// Hardware-level touch timeout, in seconds.
    pub touch_timeout_secs: u64,

    /// Whether the key requires a touch.
    pub require_touch: bool,

    /// Bound on the PIN command, in seconds.
    pub pin_command_timeout_secs: u64,

    /// Provisioned public key file served for `PUBKEY` (byte-identical).
    pub public_key: Option<PathBuf>,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            slot: PivSlot::default(),
            module: None,
            confirmation_timeout_secs: 30,
            touch_timeout_secs: 15,
            require_touch: true,
            pin_command_timeout_secs: 30,
            public_key: None,
        }
    }
}

impl AuthorityConfig {
    /// Overlay environment variables on top of `self`.
    pub fn apply_env(mut self) -> SignResult<Self> {
        if let Some(slot) = env_parse("PIV_SLOT")? {
            self.slot = slot;
        }
        if let Some(module) = env_var("PKCS11_MODULE") {
            self.module = Some(PathBuf::from(module));
        }
        if let Some(secs) = env_parse("PIVSIGN_CONFIRM_TIMEOUT")? {
            self.confirmation_timeout_secs = secs;
        }
        if let Some(secs) = env_parse("PIVSIGN_TOUCH_TIMEOUT")? {
            self.touch_timeout_secs = secs;
        }
        if let Some(touch) = env_bool("PIVSIGN_REQUIRE_TOUCH")? {
            self.require_touch = touch;
        }
        Ok(self)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn touch_timeout(&self) -> Duration {
        Duration::from_secs(self.touch_timeout_secs)
    }

    pub fn pin_command_timeout(&self) -> Duration {
        Duration::from_secs(self.pin_command_timeout_secs)
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_touch_timeout(mut self, timeout: Duration) -> Self {
        self.touch_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_require_touch(mut self, require: bool) -> Self {
        self.require_touch = require;
        self
    }

    pub fn with_public_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.public_key = Some(path.into());
        self
    }
}

/// Transport Bridge realization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Forwarded line channel over a Unix socket.
    #[default]
    Channel,
    /// Shared-directory mailbox polling.
    Mailbox,
}

impl FromStr for TransportKind {
    type Err = SignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "channel" | "socket" => Ok(Self::Channel),
            "mailbox" => Ok(Self::Mailbox),
            other => Err(SignError::Config {
                message: format!("unknown transport: {other}"),
            }),
        }
    }
}

/// Forwarded channel settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Socket path (agent side or forwarded side).
    pub socket: PathBuf,

    /// Bound on connect/write/read, in seconds.
    pub timeout_secs: u64,

    /// Agent-side bound on reading one request line, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from(DEFAULT_FORWARDED_SOCKET),
            timeout_secs: 60,
            request_timeout_secs: 60,
        }
    }
}

impl ChannelConfig {
    pub fn apply_env(mut self) -> SignResult<Self> {
        if let Some(path) = env_var("PIV_AGENT_SOCK") {
            self.socket = PathBuf::from(path);
        }
        if let Some(secs) = env_parse("PIVSIGN_SOCKET_TIMEOUT")? {
            self.timeout_secs = secs;
        }
        if let Some(secs) = env_parse("PIVSIGN_REQUEST_TIMEOUT")? {
            self.request_timeout_secs = secs;
        }
        Ok(self)
    }

    pub fn with_socket(mut self, socket: impl Into<PathBuf>) -> Self {
        self.socket = socket.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Mailbox settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// Shared directory holding `request` and `response`.
    pub dir: Option<PathBuf>,

    /// How many times the remote side looks for a response.
    pub poll_attempts: u32,

    /// Delay between polls, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            dir: None,
            poll_attempts: 240,
            poll_interval_ms: 500,
        }
    }
}

impl MailboxConfig {
    pub fn apply_env(mut self) -> SignResult<Self> {
        if let Some(dir) = env_var("PIVSIGN_MAILBOX_DIR") {
            self.dir = Some(PathBuf::from(dir));
        }
        if let Some(n) = env_parse("PIVSIGN_POLL_ATTEMPTS")? {
            self.poll_attempts = n;
        }
        if let Some(ms) = env_parse("PIVSIGN_POLL_INTERVAL_MS")? {
            self.poll_interval_ms = ms;
        }
        Ok(self)
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn with_poll(mut self, attempts: u32, interval: Duration) -> Self {
        self.poll_attempts = attempts;
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Total time the remote side waits for a response.
    pub fn poll_bound(&self) -> Duration {
        self.poll_interval() * self.poll_attempts
    }

    pub fn require_dir(&self) -> SignResult<&Path> {
        self.dir.as_deref().ok_or_else(|| SignError::Config {
            message: "mailbox directory not configured (PIVSIGN_MAILBOX_DIR or --mailbox-dir)"
                .to_string(),
        })
    }
}

/// Signing command (Protocol Adapter) settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub transport: TransportKind,

    /// Explicit public key path; must exist when set.
    pub public_key: Option<PathBuf>,

    /// Pinned fingerprint file the resolved public key must match.
    pub fingerprint_file: Option<PathBuf>,
}

impl AdapterConfig {
    pub fn apply_env(mut self) -> SignResult<Self> {
        if let Some(kind) = env_parse("PIVSIGN_TRANSPORT")? {
            self.transport = kind;
        }
        if let Some(path) = env_var("REPO_PUB") {
            self.public_key = Some(PathBuf::from(path));
        }
        if let Some(path) = env_var("PIVSIGN_FINGERPRINT_FILE") {
            self.fingerprint_file = Some(PathBuf::from(path));
        }
        Ok(self)
    }
}

/// Everything, as loaded from a YAML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub authority: AuthorityConfig,
    pub channel: ChannelConfig,
    pub mailbox: MailboxConfig,
    pub adapter: AdapterConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> SignResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| SignError::Config {
            message: format!("failed to read config {}: {}", path.display(), e),
        })?;
        serde_yaml::from_str(&contents).map_err(|e| SignError::Config {
            message: format!("invalid config {}: {}", path.display(), e),
        })
    }

    /// File (if any), then environment on top.
    pub fn load(path: Option<&Path>) -> SignResult<Self> {
        let base = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        Ok(Self {
            authority: base.authority.apply_env()?,
            channel: base.channel.apply_env()?,
            mailbox: base.mailbox.apply_env()?,
            adapter: base.adapter.apply_env()?,
        })
    }
}
