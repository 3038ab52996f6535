//! Agent: serves the Signing Authority on a local Unix socket.
//!
//! Connections are handled one at a time, one request per connection. The
//! Public Key Record is loaded once at start-up and served verbatim for
//! `PUBKEY`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::authority::SigningAuthority;
use crate::error::{SignError, SignResult};
use crate::fingerprint::Fingerprint;
use crate::protocol::{Request, Response, MAX_REQUEST_BYTES};

/// Default bound on reading a request from a connected client.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct Agent {
    authority: Arc<SigningAuthority>,
    public_key: Vec<u8>,
    request_timeout: Duration,
}

impl Agent {
    /// Load the Public Key Record (file bytes if given, else exported from
    /// the token) and build the agent.
    pub async fn start(
        authority: Arc<SigningAuthority>,
        public_key_file: Option<&Path>,
    ) -> SignResult<Self> {
        let public_key = match public_key_file {
            Some(path) => std::fs::read(path).map_err(|e| SignError::Config {
                message: format!("failed to read public key {}: {}", path.display(), e),
            })?,
            None => authority.export_public_key().await?.into_bytes(),
        };
        info!(
            fingerprint = %Fingerprint::of_pem(&public_key),
            token = %authority.describe(),
            "public key loaded"
        );
        Ok(Self {
            authority,
            public_key,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Answer one raw request line.
    pub async fn handle_line(&self, line: &[u8]) -> Response {
        if line.len() > MAX_REQUEST_BYTES {
            return Response::from_result(Err(SignError::MalformedRequest {
                reason: "request too large".to_string(),
            }));
        }
        let text = match std::str::from_utf8(line) {
            Ok(text) => text,
            Err(_) => {
                return Response::from_result(Err(SignError::MalformedRequest {
                    reason: "request is not UTF-8".to_string(),
                }))
            }
        };

        let result = match Request::parse(text) {
            Ok(Request::PublicKey) => Ok(self.public_key.clone()),
            Ok(Request::Sign { algorithm, digest }) => {
                info!(digest = %digest.to_hex(), "sign request");
                self.authority.sign(&digest, algorithm).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!(code = e.code(), error = %e, "request failed");
        }
        Response::from_result(result)
    }

    /// Serve on `socket` until `shutdown` fires; the socket file is removed on exit.
    pub async fn serve(&self, socket: &Path, shutdown: CancellationToken) -> SignResult<()> {
        let listener = bind_socket(socket)?;
        let _guard = SocketGuard(socket.to_path_buf());
        info!(socket = %socket.display(), "agent listening");
        self.serve_listener(listener, shutdown).await;
        info!("agent stopped");
        Ok(())
    }

    /// Serve an already bound listener until `shutdown` fires.
    pub async fn serve_listener(&self, listener: UnixListener, shutdown: CancellationToken) {
        loop {
            let stream = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            if let Err(e) = self.handle_connection(stream).await {
                debug!(error = %e, "connection ended with error");
            }
        }
    }

    async fn handle_connection(&self, stream: UnixStream) -> SignResult<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half).take(MAX_REQUEST_BYTES as u64 + 1);
        let mut line = Vec::new();

        let read = tokio::time::timeout(self.request_timeout, reader.read_until(b'\n', &mut line))
            .await
            .map_err(|_| SignError::MalformedRequest {
                reason: "timed out waiting for request".to_string(),
            })?;
        read?;

        let response = self.handle_line(&line).await;
        write_half.write_all(response.to_line().as_bytes()).await?;
        write_half.flush().await?;
        Ok(())
    }
}

/// Bind a Unix socket with mode 0600 inside a 0700 directory, replacing a stale socket.
pub fn bind_socket(path: &Path) -> SignResult<UnixListener> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
        }
    }

    match std::fs::remove_file(path) {
        Ok(()) => debug!(socket = %path.display(), "removed stale socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let listener = UnixListener::bind(path).map_err(|e| SignError::Io {
        message: format!("failed to bind {}: {}", path.display(), e),
    })?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(listener)
}

struct SocketGuard(PathBuf);

impl Drop for SocketGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}
