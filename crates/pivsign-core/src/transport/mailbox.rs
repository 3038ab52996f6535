//! Variant B: shared-directory mailbox, remote side.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::Transport;
use crate::config::MailboxConfig;
use crate::digest::DoubleHash;
use crate::error::{SignError, SignResult};
use crate::mailbox::Mailbox;
use crate::protocol::{Request, Response};

/// Posts a request into the mailbox and polls for the response.
#[derive(Debug, Clone)]
pub struct MailboxTransport {
    mailbox: Mailbox,
    attempts: u32,
    interval: Duration,
}

impl MailboxTransport {
    pub fn new(mailbox: Mailbox) -> Self {
        let defaults = MailboxConfig::default();
        Self {
            mailbox,
            attempts: defaults.poll_attempts,
            interval: defaults.poll_interval(),
        }
    }

    pub fn from_config(config: &MailboxConfig) -> SignResult<Self> {
        Ok(Self::new(Mailbox::new(config.require_dir()?))
            .with_poll(config.poll_attempts, config.poll_interval()))
    }

    pub fn with_poll(mut self, attempts: u32, interval: Duration) -> Self {
        self.attempts = attempts;
        self.interval = interval;
        self
    }

    async fn round_trip(&self, request: &Request) -> SignResult<Vec<u8>> {
        self.mailbox.remove_response().await?;
        self.mailbox.write_request(&request.to_line()).await?;
        debug!(dir = %self.mailbox.dir().display(), "request posted");

        let outcome = self.await_response().await;
        if outcome.is_err() {
            if let Err(e) = self.mailbox.remove_request().await {
                warn!(error = %e, "failed to withdraw mailbox request");
            }
        }
        outcome
    }

    async fn await_response(&self) -> SignResult<Vec<u8>> {
        for _ in 0..self.attempts {
            if let Some(line) = self.mailbox.read_response().await? {
                self.mailbox.remove_response().await?;
                return Response::parse(&line)?.into_result();
            }
            tokio::time::sleep(self.interval).await;
        }

        warn!(
            attempts = self.attempts,
            interval = ?self.interval,
            "no response in mailbox"
        );
        Err(SignError::TransportUnavailable {
            reason: format!(
                "no response in {} after {} polls",
                self.mailbox.dir().display(),
                self.attempts
            ),
        })
    }
}

#[async_trait]
impl Transport for MailboxTransport {
    async fn submit(&self, digest: &DoubleHash) -> SignResult<Vec<u8>> {
        self.round_trip(&Request::sign(*digest)).await
    }

    async fn public_key(&self) -> SignResult<Vec<u8>> {
        self.round_trip(&Request::PublicKey).await
    }

    fn describe(&self) -> String {
        format!("mailbox {}", self.mailbox.dir().display())
    }
}
