//! Hardware-token signing for `pkg repo`.
//!
//! The private key stays on a PIV token. A [`SigningAuthority`] on the
//! workstation signs double hashes; a [`Transport`] carries requests from the
//! build host (forwarded socket or shared mailbox); [`SigningCommand`]
//! implements the repository tool's `signing_command` contract on top of it.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pivsign_core::{ChannelTransport, SigningCommand};
//!
//! # async fn example() -> pivsign_core::SignResult<()> {
//! let transport = Arc::new(ChannelTransport::new("/tmp/piv-sign-agent.sock"));
//! let cmd = SigningCommand::new(transport);
//! let stdin = std::io::stdin();
//! cmd.execute(stdin.lock(), &mut std::io::stdout()).await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod agent;
pub mod authority;
pub mod config;
pub mod coordinator;
pub mod digest;
pub mod error;
pub mod fingerprint;
pub mod mailbox;
pub mod pin;
pub mod protocol;
pub mod remote;
pub mod transport;
pub mod tunnel;
pub mod verify;

pub use adapter::{read_repo_hash, SigningCommand};
pub use agent::Agent;
pub use authority::{SigningAuthority, SoftToken, Token, TokenSession};
pub use config::{Config, TransportKind};
pub use coordinator::{Coordinator, LocalMailbox, MailboxAccess, RemoteMailbox};
pub use digest::{DoubleHash, HashAlgorithm, RepoHash};
pub use error::{SignError, SignResult};
pub use fingerprint::Fingerprint;
pub use pin::{Pin, PinSource};
pub use remote::RemoteShell;
pub use transport::{ChannelTransport, MailboxTransport, Transport};
pub use tunnel::Tunnel;
pub use verify::{SignedBlock, VerifyReport};

#[cfg(feature = "pkcs11")]
pub use authority::pkcs11::{find_module, Pkcs11Token};
