//! Public key fingerprints for trust pinning.
//!
//! A fingerprint is SHA-256 over the literal PEM file bytes, headers, footer
//! and trailing newline included. Two encodings of the same key (PEM vs DER,
//! CRLF vs LF) have different fingerprints on purpose: clients pin the file
//! they were given.
//!
//! The fingerprint file carried next to the repository is two lines:
//!
//! ```text
//! function: sha256
//! fingerprint: <64 hex chars>
//! ```

use std::fmt;
use std::path::Path;

use crate::digest::sha256_hex;
use crate::error::{SignError, SignResult};

/// SHA-256 fingerprint of a Public Key Record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of the exact PEM bytes.
    pub fn of_pem(pem: &[u8]) -> Self {
        Self(sha256_hex(pem))
    }

    pub fn from_hex(s: &str) -> SignResult<Self> {
        let s = s.trim();
        if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(SignError::Config {
                message: format!("invalid fingerprint: {s:?}"),
            });
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the two-line fingerprint file format.
    pub fn parse_file_contents(contents: &str) -> SignResult<Self> {
        let mut function = None;
        let mut fingerprint = None;

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                return Err(SignError::Config {
                    message: format!("malformed fingerprint line: {line:?}"),
                });
            };
            match key.trim() {
                "function" => function = Some(value.trim().to_string()),
                "fingerprint" => fingerprint = Some(value.trim().to_string()),
                other => {
                    return Err(SignError::Config {
                        message: format!("unknown fingerprint field: {other}"),
                    })
                }
            }
        }

        match function.as_deref() {
            Some("sha256") => {}
            Some(other) => {
                return Err(SignError::Config {
                    message: format!("unsupported fingerprint function: {other}"),
                })
            }
            None => {
                return Err(SignError::Config {
                    message: "fingerprint file has no function line".to_string(),
                })
            }
        }

        let fingerprint = fingerprint.ok_or_else(|| SignError::Config {
            message: "fingerprint file has no fingerprint line".to_string(),
        })?;
        Self::from_hex(&fingerprint)
    }

    /// Render the two-line fingerprint file format.
    pub fn to_file_contents(&self) -> String {
        format!("function: sha256\nfingerprint: {}\n", self.0)
    }

    pub fn load(path: &Path) -> SignResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| SignError::Config {
            message: format!("failed to read fingerprint file {}: {}", path.display(), e),
        })?;
        Self::parse_file_contents(&contents)
    }

    pub fn write(&self, path: &Path) -> SignResult<()> {
        std::fs::write(path, self.to_file_contents())?;
        Ok(())
    }

    /// Compare against the fingerprint of `pem`.
    pub fn check_pem(&self, pem: &[u8]) -> SignResult<()> {
        let actual = Self::of_pem(pem);
        if &actual != self {
            return Err(SignError::FingerprintMismatch {
                expected: self.0.clone(),
                actual: actual.0,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
