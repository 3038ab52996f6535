use clap::{Args, Parser, Subcommand};
use pivsign_core::authority::PivSlot;
use pivsign_core::TransportKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "pivsign",
    version,
    about = "Sign pkg repo catalogues with a key that never leaves a PIV token"
)]
pub struct Cli {
    /// YAML config file; environment variables override it
    #[arg(long, global = true, env = "PIVSIGN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the signing agent on the workstation holding the token
    Agent(AgentArgs),
    /// signing_command for `pkg repo`: hash on stdin, signature block on stdout
    Sign(SignArgs),
    /// Forward the agent socket to a build host and run a command there
    Forward(ForwardArgs),
    /// Answer mailbox requests while a remote command runs
    Coordinate(CoordinateArgs),
    /// Remove request/response files from a mailbox directory
    MailboxClean(MailboxCleanArgs),
    /// Export the token's public key
    Pubkey(PubkeyArgs),
    /// Print or write the fingerprint of a public key file
    Fingerprint(FingerprintArgs),
    /// Verify a repository signature
    Verify(VerifyArgs),
    /// Sign and verify a fixed test digest on the token
    SelfTest(SelfTestArgs),
    Version,
}

/// Which token to use and how to talk to it.
#[derive(Args, Clone, Debug, Default)]
pub struct TokenArgs {
    /// Use an RSA private key file instead of a hardware token (testing only)
    #[arg(long, env = "PIVSIGN_SOFT_KEY")]
    pub soft_key: Option<PathBuf>,

    /// PKCS#11 module path (default: auto-detect libykcs11)
    #[arg(long)]
    pub module: Option<PathBuf>,

    /// PIV slot of the signing key (9a, 9c, 9d, 9e)
    #[arg(long)]
    pub slot: Option<PivSlot>,

    /// Shell command printing the PIN (PIV_PIN takes precedence)
    #[arg(long, env = "PIV_PIN_COMMAND", hide_env_values = true)]
    pub pin_command: Option<String>,

    /// Key does not require a touch
    #[arg(long)]
    pub no_touch: bool,

    /// Outer bound on one signing call, in seconds
    #[arg(long)]
    pub confirm_timeout: Option<u64>,

    /// Hardware touch timeout, in seconds
    #[arg(long)]
    pub touch_timeout: Option<u64>,
}

#[derive(Args, Clone, Debug)]
pub struct AgentArgs {
    #[command(flatten)]
    pub token: TokenArgs,

    /// Socket to listen on (default: PIV_AGENT_SOCK or ~/.piv-sign-agent/agent.sock)
    #[arg(long)]
    pub socket: Option<PathBuf>,

    /// Serve this file for PUBKEY instead of exporting from the token
    #[arg(long)]
    pub public_key: Option<PathBuf>,

    /// Run a self-test signature before accepting requests
    #[arg(long)]
    pub self_test: bool,

    /// Seconds a client may take to send its request (default: PIVSIGN_REQUEST_TIMEOUT or 60)
    #[arg(long)]
    pub request_timeout: Option<u64>,
}

#[derive(Args, Clone, Debug)]
pub struct SignArgs {
    /// Transport bridge: channel or mailbox
    #[arg(long)]
    pub transport: Option<TransportKind>,

    /// Forwarded agent socket (channel transport)
    #[arg(long)]
    pub socket: Option<PathBuf>,

    /// Shared mailbox directory (mailbox transport)
    #[arg(long)]
    pub mailbox_dir: Option<PathBuf>,

    /// Public key file; must exist. Falls back to repo.pub next to the binary, then the agent
    #[arg(long)]
    pub public_key: Option<PathBuf>,

    /// Fingerprint file the public key must match
    #[arg(long)]
    pub fingerprint_file: Option<PathBuf>,

    /// Channel I/O timeout, in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Args, Clone, Debug)]
pub struct ForwardArgs {
    /// SSH destination of the build host
    #[arg(long)]
    pub target: String,

    /// Rendezvous socket path on the build host
    #[arg(long, default_value = pivsign_core::config::DEFAULT_FORWARDED_SOCKET)]
    pub remote_socket: String,

    /// Local agent socket (default: PIV_AGENT_SOCK or ~/.piv-sign-agent/agent.sock)
    #[arg(long)]
    pub socket: Option<PathBuf>,

    /// ssh program
    #[arg(long, default_value = "ssh")]
    pub ssh: String,

    /// Extra ssh argument (repeatable)
    #[arg(long = "ssh-option", allow_hyphen_values = true)]
    pub ssh_options: Vec<String>,

    /// Remote path that must exist after the command succeeds
    #[arg(long)]
    pub artifact: Option<String>,

    /// Command to run on the build host
    #[arg(trailing_var_arg = true, required = true, num_args = 1..)]
    pub command: Vec<String>,
}

#[derive(Args, Clone, Debug)]
pub struct CoordinateArgs {
    #[command(flatten)]
    pub token: TokenArgs,

    /// Mailbox directory as seen from this machine (or the remote shell)
    #[arg(long)]
    pub mailbox_dir: Option<PathBuf>,

    /// Reach the mailbox through this shell command, e.g. "ssh vm"
    #[arg(long)]
    pub remote_shell: Option<String>,

    /// Path that must exist after the command succeeds
    #[arg(long)]
    pub artifact: Option<PathBuf>,

    /// Serve this file for PUBKEY instead of exporting from the token
    #[arg(long)]
    pub public_key: Option<PathBuf>,

    /// Mailbox poll interval, in milliseconds
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Remote invocation (program and arguments)
    #[arg(trailing_var_arg = true, required = true, num_args = 1..)]
    pub command: Vec<String>,
}

#[derive(Args, Clone, Debug)]
pub struct MailboxCleanArgs {
    #[arg(long)]
    pub mailbox_dir: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
pub struct PubkeyArgs {
    #[command(flatten)]
    pub token: TokenArgs,

    /// Write the PEM here instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Also write the fingerprint file
    #[arg(long)]
    pub fingerprint_out: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
pub struct FingerprintArgs {
    /// Public key PEM file
    pub public_key: PathBuf,

    /// Write a fingerprint file instead of printing
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
pub struct VerifyArgs {
    /// Public key PEM file (ignored with --block, which carries its own)
    #[arg(long, required_unless_present = "block")]
    pub public_key: Option<PathBuf>,

    /// Raw signature file
    #[arg(long, required_unless_present = "block")]
    pub signature: Option<PathBuf>,

    /// Signing command output block (SIGNATURE ... END)
    #[arg(long, conflicts_with_all = ["signature", "public_key"])]
    pub block: Option<PathBuf>,

    /// File whose SHA-256 was signed
    #[arg(long, required_unless_present = "hash", conflicts_with = "hash")]
    pub content: Option<PathBuf>,

    /// Lowercase hex SHA-256 that was signed
    #[arg(long)]
    pub hash: Option<String>,

    /// Fingerprint file the public key must match
    #[arg(long)]
    pub fingerprint_file: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
pub struct SelfTestArgs {
    #[command(flatten)]
    pub token: TokenArgs,
}
