//! Protocol Adapter: the repository tool's `signing_command`.
//!
//! `pkg repo` writes one hex hash line to the command's stdin and keeps stdin
//! open, so the line is read with a bounded read and never to EOF. The output
//! block is assembled in memory and written once, after every step has
//! succeeded; a failure leaves stdout empty.

use std::io::{BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::digest::RepoHash;
use crate::error::{SignError, SignResult};
use crate::fingerprint::Fingerprint;
use crate::transport::Transport;
use crate::verify::{verify_double_hash, SignedBlock};

/// Longest hash line accepted on stdin.
pub const MAX_HASH_LINE_BYTES: usize = 1024;

/// File name of the public key looked up next to the executable.
pub const COLOCATED_PUBLIC_KEY: &str = "repo.pub";

/// Read the single hash line the repository tool sends.
pub fn read_repo_hash<R: BufRead>(input: R) -> SignResult<RepoHash> {
    let mut line = Vec::new();
    input
        .take(MAX_HASH_LINE_BYTES as u64 + 1)
        .read_until(b'\n', &mut line)
        .map_err(|e| SignError::ToolContractViolation {
            reason: format!("failed to read stdin: {e}"),
        })?;

    if line.is_empty() {
        return Err(SignError::ToolContractViolation {
            reason: "no hash on stdin".to_string(),
        });
    }
    if line.len() > MAX_HASH_LINE_BYTES {
        return Err(SignError::ToolContractViolation {
            reason: "hash line too long".to_string(),
        });
    }

    let text = std::str::from_utf8(&line).map_err(|_| SignError::ToolContractViolation {
        reason: "hash line is not UTF-8".to_string(),
    })?;
    RepoHash::parse(text.trim_end_matches(['\r', '\n']))
}

/// `repo.pub` next to the running executable, if present.
pub fn colocated_public_key() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let candidate = exe.parent()?.join(COLOCATED_PUBLIC_KEY);
    candidate.is_file().then_some(candidate)
}

/// The signing command.
pub struct SigningCommand {
    transport: Arc<dyn Transport>,
    public_key: Option<PathBuf>,
    colocated: Option<PathBuf>,
    pinned: Option<Fingerprint>,
}

impl SigningCommand {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            public_key: None,
            colocated: None,
            pinned: None,
        }
    }

    /// Explicit public key path. It must exist.
    pub fn with_public_key(mut self, path: Option<PathBuf>) -> Self {
        self.public_key = path;
        self
    }

    /// Fallback public key used when no explicit path is given.
    pub fn with_colocated(mut self, path: Option<PathBuf>) -> Self {
        self.colocated = path;
        self
    }

    /// Require the Public Key Record to have this fingerprint.
    pub fn with_pinned(mut self, fingerprint: Option<Fingerprint>) -> Self {
        self.pinned = fingerprint;
        self
    }

    /// Explicit path, then co-located `repo.pub`, then fetched through the bridge.
    pub async fn resolve_public_key(&self) -> SignResult<Vec<u8>> {
        if let Some(path) = &self.public_key {
            return read_public_key(path);
        }
        if let Some(path) = &self.colocated {
            debug!(path = %path.display(), "using co-located public key");
            return read_public_key(path);
        }
        debug!(transport = %self.transport.describe(), "fetching public key");
        self.transport.public_key().await
    }

    /// Sign `hash` and return the output block. Nothing is written here.
    pub async fn sign(&self, hash: &RepoHash) -> SignResult<SignedBlock> {
        let pem = self.resolve_public_key().await?;
        if let Some(expected) = &self.pinned {
            expected
                .check_pem(&pem)
                .map_err(|e| SignError::UnexpectedSigner {
                    reason: e.to_string(),
                })?;
        }

        let digest = hash.double_hash();
        info!(hash = %hash, transport = %self.transport.describe(), "requesting signature");
        let signature = self.transport.submit(&digest).await?;

        verify_double_hash(&digest, &signature, &pem).map_err(|e| SignError::UnexpectedSigner {
            reason: format!("signature does not verify against the public key ({e})"),
        })?;

        Ok(SignedBlock::new(signature, pem))
    }

    /// Read the hash line from `input`, sign, and write the block to `output` in one write.
    pub async fn execute<R: BufRead, W: Write>(&self, input: R, output: &mut W) -> SignResult<()> {
        let hash = read_repo_hash(input)?;
        let block = self.sign(&hash).await?.render();
        output.write_all(&block)?;
        output.flush()?;
        Ok(())
    }
}

fn read_public_key(path: &Path) -> SignResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| SignError::Config {
        message: format!("failed to read public key {}: {}", path.display(), e),
    })
}
