//! Verification utility.
//!
//! Rebuilds the DigestInfo from the double hash and checks the signature with
//! the unprefixed PKCS#1 v1.5 primitive, the same bytes the token signed.
//! A generic "verify SHA-256 of the message" would check the single hash and
//! is never used.

use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};

use crate::digest::{DoubleHash, RepoHash};
use crate::error::{SignError, SignResult};
use crate::fingerprint::Fingerprint;

/// The signing command's stdout payload.
///
/// ```text
/// SIGNATURE\n<raw signature>\nCERT\n<PEM bytes>END\n
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedBlock {
    pub signature: Vec<u8>,
    pub public_key: Vec<u8>,
}

const HEADER: &[u8] = b"SIGNATURE\n";
const CERT: &[u8] = b"\nCERT\n";
const TRAILER: &[u8] = b"END\n";

impl SignedBlock {
    pub fn new(signature: Vec<u8>, public_key: Vec<u8>) -> Self {
        Self {
            signature,
            public_key,
        }
    }

    pub fn render(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            HEADER.len() + self.signature.len() + CERT.len() + self.public_key.len() + TRAILER.len(),
        );
        out.extend_from_slice(HEADER);
        out.extend_from_slice(&self.signature);
        out.extend_from_slice(CERT);
        out.extend_from_slice(&self.public_key);
        out.extend_from_slice(TRAILER);
        out
    }

    /// Parse a rendered block. The signature is binary, so the split is on
    /// the last `\nCERT\n`.
    pub fn parse(bytes: &[u8]) -> SignResult<Self> {
        let malformed = |reason: &str| SignError::MalformedResponse {
            reason: format!("signed block: {reason}"),
        };

        let body = bytes
            .strip_prefix(HEADER)
            .ok_or_else(|| malformed("missing SIGNATURE header"))?;
        let body = body
            .strip_suffix(TRAILER)
            .ok_or_else(|| malformed("missing END trailer"))?;
        let split = body
            .windows(CERT.len())
            .rposition(|w| w == CERT)
            .ok_or_else(|| malformed("missing CERT marker"))?;

        Ok(Self {
            signature: body[..split].to_vec(),
            public_key: body[split + CERT.len()..].to_vec(),
        })
    }
}

/// Result of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub repo_hash: String,
    pub fingerprint: Fingerprint,
    /// Whether a pinned fingerprint was compared.
    pub pinned: bool,
}

/// Parse an SPKI (or PKCS#1) PEM public key.
pub fn parse_public_key(pem: &[u8]) -> SignResult<RsaPublicKey> {
    let text = std::str::from_utf8(pem).map_err(|_| SignError::InvalidPublicKey {
        reason: "public key is not UTF-8 PEM".to_string(),
    })?;
    RsaPublicKey::from_public_key_pem(text)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(text))
        .map_err(|e| SignError::InvalidPublicKey {
            reason: e.to_string(),
        })
}

/// Check `signature` over the DigestInfo of `digest`.
pub fn verify_double_hash(digest: &DoubleHash, signature: &[u8], pem: &[u8]) -> SignResult<()> {
    let key = parse_public_key(pem)?;
    key.verify(
        Pkcs1v15Sign::new_unprefixed(),
        digest.digest_info().as_bytes(),
        signature,
    )
    .map_err(|_| SignError::SignatureInvalid {
        reason: "signature does not match the double hash".to_string(),
    })
}

/// Check a signature as the repository tool's clients do, given the hex hash.
pub fn verify_repo_hash(
    hash: &RepoHash,
    signature: &[u8],
    pem: &[u8],
    pinned: Option<&Fingerprint>,
) -> SignResult<VerifyReport> {
    if let Some(expected) = pinned {
        expected.check_pem(pem)?;
    }
    verify_double_hash(&hash.double_hash(), signature, pem)?;
    Ok(VerifyReport {
        repo_hash: hash.as_str().to_string(),
        fingerprint: Fingerprint::of_pem(pem),
        pinned: pinned.is_some(),
    })
}

/// Hash `content` and check the signature.
pub fn verify_content(
    content: &[u8],
    signature: &[u8],
    pem: &[u8],
    pinned: Option<&Fingerprint>,
) -> SignResult<VerifyReport> {
    verify_repo_hash(&RepoHash::of_content(content), signature, pem, pinned)
}

/// Check a signing command output block against the hash it was given.
pub fn verify_signed_block(
    hash: &RepoHash,
    block: &SignedBlock,
    pinned: Option<&Fingerprint>,
) -> SignResult<VerifyReport> {
    verify_repo_hash(hash, &block.signature, &block.public_key, pinned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::sha256;
    use crate::test_support::{sign_digest_info, test_public_pem};

    fn sign_double(content: &[u8]) -> Vec<u8> {
        let digest = RepoHash::of_content(content).double_hash();
        sign_digest_info(digest.digest_info().as_bytes())
    }

    #[test]
    fn test_double_hash_signature_verifies() {
        let pem = test_public_pem();
        let sig = sign_double(b"hello");
        let report = verify_content(b"hello", &sig, pem.as_bytes(), None).unwrap();
        assert_eq!(
            report.repo_hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert!(!report.pinned);
    }

    #[test]
    fn test_single_hash_signature_is_rejected() {
        let pem = test_public_pem();
        let single = DoubleHash::from_bytes(sha256(b"hello"));
        let sig = sign_digest_info(single.digest_info().as_bytes());

        let err = verify_content(b"hello", &sig, pem.as_bytes(), None).unwrap_err();
        assert!(matches!(err, SignError::SignatureInvalid { .. }));
    }

    #[test]
    fn test_flipped_hex_char_fails() {
        let pem = test_public_pem();
        let sig = sign_double(b"hello");
        let hash = RepoHash::parse(
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9825",
        )
        .unwrap();
        assert!(verify_repo_hash(&hash, &sig, pem.as_bytes(), None).is_err());
    }

    #[test]
    fn test_pinned_fingerprint() {
        let pem = test_public_pem();
        let sig = sign_double(b"hello");
        let pin = Fingerprint::of_pem(pem.as_bytes());
        let report = verify_content(b"hello", &sig, pem.as_bytes(), Some(&pin)).unwrap();
        assert!(report.pinned);
        assert_eq!(report.fingerprint, pin);

        // Same key, CRLF line endings: different record, pin fails
        let crlf = pem.replace('\n', "\r\n");
        let err = verify_content(b"hello", &sig, crlf.as_bytes(), Some(&pin)).unwrap_err();
        assert!(matches!(err, SignError::FingerprintMismatch { .. }));
    }

    #[test]
    fn test_signed_block_parse() {
        let pem = test_public_pem();
        let mut sig = sign_double(b"hello");
        let block = SignedBlock::new(sig.clone(), pem.clone().into_bytes());
        let rendered = block.render();
        assert!(rendered.starts_with(b"SIGNATURE\n"));
        assert!(rendered.ends_with(b"-----END PUBLIC KEY-----\nEND\n"));
        assert_eq!(SignedBlock::parse(&rendered).unwrap(), block);

        // Signature bytes that contain the marker itself
        sig.extend_from_slice(b"\nCERT\n");
        let tricky = SignedBlock::new(sig, pem.into_bytes());
        assert_eq!(SignedBlock::parse(&tricky.render()).unwrap(), tricky);
    }

    #[test]
    fn test_signed_block_rejects_truncation() {
        let block = SignedBlock::new(vec![1, 2, 3], b"PEM\n".to_vec()).render();
        for cut in [0, 5, block.len() - 1] {
            assert!(SignedBlock::parse(&block[..cut]).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn test_invalid_public_key() {
        let err = verify_double_hash(
            &RepoHash::of_content(b"x").double_hash(),
            &[0; 128],
            b"not a key",
        )
        .unwrap_err();
        assert!(matches!(err, SignError::InvalidPublicKey { .. }));
    }
}
