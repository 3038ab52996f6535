//! Token seam: what the Signing Authority needs from a key holder.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::digest::DigestInfo;
use crate::error::{SignError, SignResult};
use crate::pin::Pin;

/// A key holder that can open sessions.
///
/// Implementations must not cache sessions or key handles: every call to
/// [`Token::open`] starts from scratch, and dropping the returned session
/// releases everything it acquired.
pub trait Token: Send + Sync + 'static {
    /// Human-readable description for logs.
    fn describe(&self) -> String;

    /// Open a fresh session.
    fn open(&self) -> SignResult<Box<dyn TokenSession>>;
}

/// One open session on a token. Released on drop.
pub trait TokenSession {
    fn login(&mut self, pin: &Pin) -> SignResult<()>;

    /// Raw PKCS#1 v1.5 signature over `digest_info` (no further hashing).
    fn sign_digest_info(&mut self, digest_info: &DigestInfo) -> SignResult<Vec<u8>>;

    /// SPKI PEM of the signing key's public half.
    fn public_key_pem(&mut self) -> SignResult<String>;
}

/// PIV slot holding the signing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PivSlot {
    #[serde(rename = "9a")]
    Authentication,
    #[default]
    #[serde(rename = "9c")]
    Signature,
    #[serde(rename = "9d")]
    KeyManagement,
    #[serde(rename = "9e")]
    CardAuthentication,
}

impl PivSlot {
    /// `CKA_ID` the YubiKey PKCS#11 module assigns to this slot's objects.
    pub fn object_id(&self) -> u8 {
        match self {
            Self::Authentication => 1,
            Self::Signature => 2,
            Self::KeyManagement => 3,
            Self::CardAuthentication => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "9a",
            Self::Signature => "9c",
            Self::KeyManagement => "9d",
            Self::CardAuthentication => "9e",
        }
    }
}

impl fmt::Display for PivSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PivSlot {
    type Err = SignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "9a" => Ok(Self::Authentication),
            "9c" => Ok(Self::Signature),
            "9d" => Ok(Self::KeyManagement),
            "9e" => Ok(Self::CardAuthentication),
            other => Err(SignError::Config {
                message: format!("unsupported PIV slot: {other}"),
            }),
        }
    }
}

/// Pick the single matching key object; zero or several is an error.
pub fn select_unique_key<T>(mut handles: Vec<T>, what: &str) -> SignResult<T> {
    match handles.len() {
        0 => Err(SignError::KeyNotFound {
            reason: format!("no {what} on token"),
        }),
        1 => Ok(handles.remove(0)),
        n => Err(SignError::KeyAmbiguous {
            reason: format!("{n} objects match {what}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_unique_key() {
        assert_eq!(select_unique_key(vec![7], "key").unwrap(), 7);
        assert!(matches!(
            select_unique_key(Vec::<u32>::new(), "key"),
            Err(SignError::KeyNotFound { .. })
        ));
        assert!(matches!(
            select_unique_key(vec![1, 2], "key"),
            Err(SignError::KeyAmbiguous { .. })
        ));
    }

    #[test]
    fn test_piv_slot_parse() {
        assert_eq!("9c".parse::<PivSlot>().unwrap(), PivSlot::Signature);
        assert_eq!("9A".parse::<PivSlot>().unwrap(), PivSlot::Authentication);
        assert!("82".parse::<PivSlot>().is_err());
        assert_eq!(PivSlot::default().object_id(), 2);
    }
}
