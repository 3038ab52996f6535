//! Digest model: repository hash, double hash and PKCS#1 DigestInfo.
//!
//! `pkg repo` hands the signing command `SHA256(catalogue)` as lowercase hex,
//! then verifies the returned signature against `SHA256(hex_string)`. The
//! second hash is the value that gets signed:
//!
//! ```text
//! H  = hex(SHA256(content))          64 ASCII chars, on stdin
//! D  = SHA256(ASCII(H))              32 bytes, the double hash
//! DI = SHA256_DIGEST_INFO_PREFIX || D 51 bytes, input to raw PKCS#1 v1.5
//! ```

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::error::{SignError, SignResult};

/// DER prefix of a SHA-256 `DigestInfo` (algorithm OID + NULL params + OCTET STRING header).
pub const SHA256_DIGEST_INFO_PREFIX: [u8; 19] = [
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01, 0x05,
    0x00, 0x04, 0x20,
];

/// Length of a SHA-256 digest in bytes.
pub const SHA256_LEN: usize = 32;

/// Length of a SHA-256 `DigestInfo`.
pub const DIGEST_INFO_LEN: usize = SHA256_DIGEST_INFO_PREFIX.len() + SHA256_LEN;

pub(crate) fn sha256(bytes: &[u8]) -> [u8; SHA256_LEN] {
    let hash = Sha256::digest(bytes);
    let mut out = [0_u8; SHA256_LEN];
    out.copy_from_slice(&hash);
    out
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(sha256(bytes))
}

/// Hash algorithm tag carried by a signing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
}

impl HashAlgorithm {
    /// Wire spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "SHA256",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = SignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SHA256" => Ok(Self::Sha256),
            other => Err(SignError::MalformedRequest {
                reason: format!("unsupported algorithm: {other}"),
            }),
        }
    }
}

/// Repository Content Hash: 64 lowercase hex chars as produced by the repository tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoHash(String);

impl RepoHash {
    /// Parse a hash line. Rejects anything but exactly 64 lowercase hex chars.
    pub fn parse(s: &str) -> SignResult<Self> {
        if s.len() != SHA256_LEN * 2 {
            return Err(SignError::ToolContractViolation {
                reason: format!("expected 64 hex chars, got {} bytes", s.len()),
            });
        }
        if !s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return Err(SignError::ToolContractViolation {
                reason: "hash is not lowercase hex".to_string(),
            });
        }
        Ok(Self(s.to_string()))
    }

    /// Hash arbitrary content the way the repository tool does.
    pub fn of_content(content: &[u8]) -> Self {
        Self(sha256_hex(content))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// SHA-256 over the ASCII bytes of this hash.
    pub fn double_hash(&self) -> DoubleHash {
        DoubleHash(sha256(self.0.as_bytes()))
    }
}

impl fmt::Display for RepoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The 32-byte value that actually gets signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoubleHash([u8; SHA256_LEN]);

impl DoubleHash {
    pub fn from_bytes(bytes: [u8; SHA256_LEN]) -> Self {
        Self(bytes)
    }

    /// Accept a digest received over the wire; must be exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> SignResult<Self> {
        bytes.try_into().map(Self).map_err(|_| SignError::MalformedRequest {
            reason: format!("digest must be 32 bytes, got {}", bytes.len()),
        })
    }

    pub fn from_hex(s: &str) -> SignResult<Self> {
        let bytes = hex::decode(s).map_err(|_| SignError::MalformedRequest {
            reason: "invalid hex digest".to_string(),
        })?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SHA256_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn digest_info(&self) -> DigestInfo {
        DigestInfo::new(self)
    }
}

/// SHA-256 `DigestInfo`: the exact input of the raw PKCS#1 v1.5 primitive.
#[derive(Clone, PartialEq, Eq)]
pub struct DigestInfo([u8; DIGEST_INFO_LEN]);

impl DigestInfo {
    pub fn new(digest: &DoubleHash) -> Self {
        let mut out = [0_u8; DIGEST_INFO_LEN];
        out[..SHA256_DIGEST_INFO_PREFIX.len()].copy_from_slice(&SHA256_DIGEST_INFO_PREFIX);
        out[SHA256_DIGEST_INFO_PREFIX.len()..].copy_from_slice(digest.as_bytes());
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for DigestInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DigestInfo({})", hex::encode(self.0))
    }
}
