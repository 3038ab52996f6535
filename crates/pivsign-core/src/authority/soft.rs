//! In-memory RSA token.
//!
//! Behaves like a PIV token for tests and dry runs: optional PIN with a retry
//! counter that locks, optional confirmation delay, and session accounting so
//! callers can check that sessions are released and never overlap.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};

use super::token::{Token, TokenSession};
use crate::digest::DigestInfo;
use crate::error::{SignError, SignResult};
use crate::pin::Pin;

/// Failed PIN attempts before a PIV token locks.
pub const DEFAULT_PIN_RETRIES: u8 = 3;

/// What happens while the token waits for a touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Touch {
    /// Confirmation given immediately.
    Immediate,
    /// Confirmation given after a delay.
    After(Duration),
    /// Confirmation never given; the token gives up after the delay.
    Withheld(Duration),
}

/// Session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftTokenStats {
    pub sessions_opened: usize,
    pub sessions_open: usize,
    pub peak_concurrent: usize,
    pub signatures: usize,
}

#[derive(Debug)]
struct SoftState {
    retries_left: u8,
    stats: SoftTokenStats,
}

/// RSA key held in memory.
pub struct SoftToken {
    key: RsaPrivateKey,
    pin: Option<Pin>,
    touch: Touch,
    state: Arc<Mutex<SoftState>>,
}

impl SoftToken {
    pub fn new(key: RsaPrivateKey) -> Self {
        Self {
            key,
            pin: None,
            touch: Touch::Immediate,
            state: Arc::new(Mutex::new(SoftState {
                retries_left: DEFAULT_PIN_RETRIES,
                stats: SoftTokenStats::default(),
            })),
        }
    }

    /// Load a PKCS#8 or PKCS#1 PEM private key.
    pub fn from_pem(pem: &str) -> SignResult<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| SignError::Config {
                message: format!("failed to parse RSA private key: {e}"),
            })?;
        Ok(Self::new(key))
    }

    pub fn from_file(path: &Path) -> SignResult<Self> {
        let pem = std::fs::read_to_string(path).map_err(|e| SignError::Config {
            message: format!("failed to read key file {}: {}", path.display(), e),
        })?;
        Self::from_pem(&pem)
    }

    /// Require a PIN.
    pub fn with_pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = Some(Pin::new(pin));
        self
    }

    pub fn with_touch(mut self, touch: Touch) -> Self {
        self.touch = touch;
        self
    }

    pub fn public_key(&self) -> RsaPublicKey {
        RsaPublicKey::from(&self.key)
    }

    pub fn stats(&self) -> SoftTokenStats {
        self.state
            .lock()
            .map(|s| s.stats)
            .unwrap_or_default()
    }

    pub fn retries_left(&self) -> u8 {
        self.state.lock().map(|s| s.retries_left).unwrap_or(0)
    }
}

impl Token for SoftToken {
    fn describe(&self) -> String {
        "soft token (in-memory RSA key)".to_string()
    }

    fn open(&self) -> SignResult<Box<dyn TokenSession>> {
        {
            let mut state = lock(&self.state)?;
            state.stats.sessions_opened += 1;
            state.stats.sessions_open += 1;
            state.stats.peak_concurrent = state.stats.peak_concurrent.max(state.stats.sessions_open);
        }
        Ok(Box::new(SoftSession {
            key: self.key.clone(),
            pin: self.pin.clone(),
            touch: self.touch,
            state: Arc::clone(&self.state),
            logged_in: false,
        }))
    }
}

struct SoftSession {
    key: RsaPrivateKey,
    pin: Option<Pin>,
    touch: Touch,
    state: Arc<Mutex<SoftState>>,
    logged_in: bool,
}

impl TokenSession for SoftSession {
    fn login(&mut self, pin: &Pin) -> SignResult<()> {
        let Some(expected) = &self.pin else {
            self.logged_in = true;
            return Ok(());
        };

        let mut state = lock(&self.state)?;
        if state.retries_left == 0 {
            return Err(SignError::AuthenticationFailure {
                reason: "PIN is locked".to_string(),
            });
        }
        if pin != expected {
            state.retries_left -= 1;
            return Err(SignError::AuthenticationFailure {
                reason: format!("wrong PIN ({} retries left)", state.retries_left),
            });
        }
        state.retries_left = DEFAULT_PIN_RETRIES;
        self.logged_in = true;
        Ok(())
    }

    fn sign_digest_info(&mut self, digest_info: &DigestInfo) -> SignResult<Vec<u8>> {
        if !self.logged_in {
            return Err(SignError::AuthenticationFailure {
                reason: "session is not logged in".to_string(),
            });
        }

        match self.touch {
            Touch::Immediate => {}
            Touch::After(delay) => std::thread::sleep(delay),
            Touch::Withheld(delay) => {
                std::thread::sleep(delay);
                return Err(SignError::Token {
                    reason: "C_Sign failed: CKR_FUNCTION_FAILED".to_string(),
                });
            }
        }

        let signature = self
            .key
            .sign(Pkcs1v15Sign::new_unprefixed(), digest_info.as_bytes())
            .map_err(|e| SignError::Token {
                reason: format!("RSA sign failed: {e}"),
            })?;

        lock(&self.state)?.stats.signatures += 1;
        Ok(signature)
    }

    fn public_key_pem(&mut self) -> SignResult<String> {
        RsaPublicKey::from(&self.key)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| SignError::Token {
                reason: format!("failed to encode public key: {e}"),
            })
    }
}

impl Drop for SoftSession {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.stats.sessions_open = state.stats.sessions_open.saturating_sub(1);
        }
    }
}

fn lock(state: &Mutex<SoftState>) -> SignResult<std::sync::MutexGuard<'_, SoftState>> {
    state.lock().map_err(|_| SignError::Token {
        reason: "soft token state poisoned".to_string(),
    })
}
