//! Variant A: line protocol over a (forwarded) Unix socket.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use super::Transport;
use crate::config::ChannelConfig;
use crate::digest::DoubleHash;
use crate::error::{SignError, SignResult};
use crate::protocol::{Request, Response};

/// Longest response line accepted (base64 of an RSA-4096 PEM fits easily).
const MAX_RESPONSE_BYTES: u64 = 64 * 1024;

/// Client for the agent socket. One connection per request.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    socket: PathBuf,
    timeout: Duration,
}

impl ChannelTransport {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            timeout: ChannelConfig::default().timeout(),
        }
    }

    pub fn from_config(config: &ChannelConfig) -> Self {
        Self::new(&config.socket).with_timeout(config.timeout())
    }

    /// Bound on the whole round-trip: connect, write and read.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    async fn round_trip(&self, request: &Request) -> SignResult<Vec<u8>> {
        let response = tokio::time::timeout(self.timeout, self.exchange(request))
            .await
            .map_err(|_| SignError::TransportUnavailable {
                reason: format!(
                    "no response from {} within {}s",
                    self.socket.display(),
                    self.timeout.as_secs_f32()
                ),
            })??;
        response.into_result()
    }

    async fn exchange(&self, request: &Request) -> SignResult<Response> {
        let stream = UnixStream::connect(&self.socket).await.map_err(|e| {
            SignError::TransportUnavailable {
                reason: format!("cannot connect to {}: {}", self.socket.display(), e),
            }
        })?;
        let (read_half, mut write_half) = stream.into_split();

        debug!(socket = %self.socket.display(), "sending request");
        write_half
            .write_all(request.to_line().as_bytes())
            .await
            .map_err(transport_io)?;
        write_half.flush().await.map_err(transport_io)?;

        let mut reader = BufReader::new(read_half).take(MAX_RESPONSE_BYTES);
        let mut line = String::new();
        let n = reader.read_line(&mut line).await.map_err(transport_io)?;
        if n == 0 {
            return Err(SignError::TransportUnavailable {
                reason: "connection closed before a response".to_string(),
            });
        }
        Response::parse(&line)
    }
}

fn transport_io(err: std::io::Error) -> SignError {
    SignError::TransportUnavailable {
        reason: err.to_string(),
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn submit(&self, digest: &DoubleHash) -> SignResult<Vec<u8>> {
        self.round_trip(&Request::sign(*digest)).await
    }

    async fn public_key(&self) -> SignResult<Vec<u8>> {
        self.round_trip(&Request::PublicKey).await
    }

    fn describe(&self) -> String {
        format!("channel {}", self.socket.display())
    }
}
