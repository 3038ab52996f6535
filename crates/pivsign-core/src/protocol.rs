//! Line protocol shared by the forwarded channel and the mailbox.
//!
//! ```text
//! SIGN SHA256 <64 hex>\n  -> OK <base64 signature>\n | ERR <code>: <message>\n
//! PUBKEY\n                -> OK <base64 PEM>\n       | ERR <code>: <message>\n
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::digest::{DoubleHash, HashAlgorithm};
use crate::error::{SignError, SignResult};

/// Longest request line the agent accepts, newline included.
pub const MAX_REQUEST_BYTES: usize = 8192;

/// A request to the Signing Authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Sign {
        algorithm: HashAlgorithm,
        digest: DoubleHash,
    },
    PublicKey,
}

impl Request {
    pub fn sign(digest: DoubleHash) -> Self {
        Self::Sign {
            algorithm: HashAlgorithm::Sha256,
            digest,
        }
    }

    /// Parse one request line (trailing newline optional).
    pub fn parse(line: &str) -> SignResult<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Err(SignError::MalformedRequest {
                reason: "empty request".to_string(),
            });
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["PUBKEY"] => Ok(Self::PublicKey),
            ["SIGN", algorithm, digest] => Ok(Self::Sign {
                algorithm: algorithm.parse()?,
                digest: DoubleHash::from_hex(digest)?,
            }),
            ["SIGN", ..] => Err(SignError::MalformedRequest {
                reason: "usage: SIGN SHA256 <hex digest>".to_string(),
            }),
            _ => Err(SignError::MalformedRequest {
                reason: "unknown command".to_string(),
            }),
        }
    }

    /// Render as a newline-terminated line.
    pub fn to_line(&self) -> String {
        match self {
            Self::Sign { algorithm, digest } => {
                format!("SIGN {} {}\n", algorithm, digest.to_hex())
            }
            Self::PublicKey => "PUBKEY\n".to_string(),
        }
    }
}

/// A response from the Signing Authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Signature bytes or PEM bytes, depending on the request.
    Ok(Vec<u8>),
    /// Wire-encoded error message (`<code>: <detail>`).
    Err(String),
}

impl Response {
    pub fn from_result(result: SignResult<Vec<u8>>) -> Self {
        match result {
            Ok(bytes) => Self::Ok(bytes),
            Err(e) => Self::Err(e.to_wire()),
        }
    }

    pub fn parse(line: &str) -> SignResult<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(payload) = line.strip_prefix("OK ") {
            let bytes = STANDARD
                .decode(payload.trim())
                .map_err(|e| SignError::MalformedResponse {
                    reason: format!("invalid base64 payload: {e}"),
                })?;
            return Ok(Self::Ok(bytes));
        }
        if let Some(message) = line.strip_prefix("ERR ") {
            return Ok(Self::Err(message.to_string()));
        }
        if line.is_empty() {
            return Err(SignError::MalformedResponse {
                reason: "empty response".to_string(),
            });
        }
        let shown: String = line.chars().take(64).collect();
        Err(SignError::MalformedResponse {
            reason: format!("unexpected response: {shown:?}"),
        })
    }

    pub fn to_line(&self) -> String {
        match self {
            Self::Ok(bytes) => format!("OK {}\n", STANDARD.encode(bytes)),
            Self::Err(message) => format!("ERR {}\n", message.replace(['\r', '\n'], " ")),
        }
    }

    /// Payload bytes, or the decoded signer error.
    pub fn into_result(self) -> SignResult<Vec<u8>> {
        match self {
            Self::Ok(bytes) => Ok(bytes),
            Self::Err(message) => Err(SignError::from_wire(&message)),
        }
    }
}
