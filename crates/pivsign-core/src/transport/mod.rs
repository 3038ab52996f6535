//! Transport Bridge: conveys a signing request to the Signing Authority.

mod channel;
mod mailbox;

use async_trait::async_trait;

use crate::digest::DoubleHash;
use crate::error::SignResult;

pub use channel::ChannelTransport;
pub use mailbox::MailboxTransport;

/// One signing round-trip to a Signing Authority.
///
/// Implementations carry at most one request at a time and never retry.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Raw signature over the DigestInfo of `digest`.
    async fn submit(&self, digest: &DoubleHash) -> SignResult<Vec<u8>>;

    /// Public Key Record bytes as held by the Authority.
    async fn public_key(&self) -> SignResult<Vec<u8>>;

    /// Short description for logs.
    fn describe(&self) -> String;
}
