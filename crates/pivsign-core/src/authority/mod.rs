//! Signing Authority: the only component that touches the private key.
//!
//! Each request runs "open, login, sign, close" on a fresh token session.
//! Requests are serialized by a one-permit semaphore whose permit travels
//! into the blocking hardware task, so a request that timed out on the async
//! side still blocks the next one until the hardware call has returned and
//! its session is gone.

#[cfg(feature = "pkcs11")]
pub mod pkcs11;
pub mod soft;
mod token;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::config::AuthorityConfig;
use crate::digest::{DoubleHash, HashAlgorithm, RepoHash};
use crate::error::{SignError, SignResult};
use crate::pin::PinSource;
use crate::verify::verify_double_hash;

pub use soft::{SoftToken, SoftTokenStats, Touch};
pub use token::{select_unique_key, PivSlot, Token, TokenSession};

/// Content signed by [`SigningAuthority::self_test`].
pub const SELF_TEST_CONTENT: &[u8] = b"piv-sign-agent self-test";

/// Holds the token and signs one digest at a time.
pub struct SigningAuthority {
    token: Arc<dyn Token>,
    pin_source: PinSource,
    confirmation_timeout: Duration,
    touch_timeout: Duration,
    require_touch: bool,
    permit: Arc<Semaphore>,
}

impl SigningAuthority {
    pub fn new(token: Arc<dyn Token>, pin_source: PinSource) -> Self {
        let defaults = AuthorityConfig::default();
        Self {
            token,
            pin_source,
            confirmation_timeout: defaults.confirmation_timeout(),
            touch_timeout: defaults.touch_timeout(),
            require_touch: defaults.require_touch,
            permit: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn from_config(token: Arc<dyn Token>, pin_source: PinSource, config: &AuthorityConfig) -> Self {
        Self::new(
            token,
            pin_source.with_command_timeout(config.pin_command_timeout()),
        )
        .with_confirmation_timeout(config.confirmation_timeout())
        .with_touch_timeout(config.touch_timeout())
        .with_require_touch(config.require_touch)
    }

    /// Outer bound on a hardware call.
    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    /// Hardware-level touch timeout, used to classify failed sign calls.
    pub fn with_touch_timeout(mut self, timeout: Duration) -> Self {
        self.touch_timeout = timeout;
        self
    }

    pub fn with_require_touch(mut self, require: bool) -> Self {
        self.require_touch = require;
        self
    }

    pub fn describe(&self) -> String {
        self.token.describe()
    }

    /// Sign a double hash, waiting for any outstanding request to finish.
    pub async fn sign(&self, digest: &DoubleHash, algorithm: HashAlgorithm) -> SignResult<Vec<u8>> {
        let permit = Arc::clone(&self.permit)
            .acquire_owned()
            .await
            .map_err(|_| SignError::Busy {
                reason: "signing authority shut down".to_string(),
            })?;
        self.sign_with_permit(permit, digest, algorithm).await
    }

    /// Sign a double hash, rejecting with `Busy` if a request is outstanding.
    pub async fn try_sign(
        &self,
        digest: &DoubleHash,
        algorithm: HashAlgorithm,
    ) -> SignResult<Vec<u8>> {
        let permit = Arc::clone(&self.permit)
            .try_acquire_owned()
            .map_err(|_| SignError::Busy {
                reason: "another signing request is outstanding".to_string(),
            })?;
        self.sign_with_permit(permit, digest, algorithm).await
    }

    async fn sign_with_permit(
        &self,
        permit: OwnedSemaphorePermit,
        digest: &DoubleHash,
        algorithm: HashAlgorithm,
    ) -> SignResult<Vec<u8>> {
        let pin = self.pin_source.resolve().await?;
        let digest_info = digest.digest_info();
        let token = Arc::clone(&self.token);
        let require_touch = self.require_touch;
        let touch_timeout = self.touch_timeout;

        debug!(digest = %digest.to_hex(), algorithm = %algorithm, "signing request");
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let mut session = token.open()?;
            session.login(&pin)?;
            drop(pin);

            if require_touch {
                info!(">>> Touch your YubiKey now <<<");
            }
            let started = Instant::now();
            session.sign_digest_info(&digest_info).map_err(|e| {
                classify_sign_failure(e, started.elapsed(), require_touch, touch_timeout)
            })
        });

        let signature = self.bounded(task).await?;
        info!(bytes = signature.len(), "signature complete");
        Ok(signature)
    }

    /// Public half of the signing key as SPKI PEM, exported from the token.
    pub async fn export_public_key(&self) -> SignResult<String> {
        let permit = Arc::clone(&self.permit)
            .acquire_owned()
            .await
            .map_err(|_| SignError::Busy {
                reason: "signing authority shut down".to_string(),
            })?;
        let token = Arc::clone(&self.token);

        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let mut session = token.open()?;
            session.public_key_pem()
        });
        self.bounded(task).await
    }

    async fn bounded<T>(&self, task: tokio::task::JoinHandle<SignResult<T>>) -> SignResult<T> {
        match tokio::time::timeout(self.confirmation_timeout, task).await {
            Err(_) => {
                warn!(timeout = ?self.confirmation_timeout, "token did not answer in time");
                Err(SignError::ConfirmationTimeout {
                    reason: format!(
                        "no confirmation within {}s",
                        self.confirmation_timeout.as_secs_f32()
                    ),
                })
            }
            Ok(Err(join)) => Err(SignError::Token {
                reason: format!("signing task failed: {join}"),
            }),
            Ok(Ok(result)) => result,
        }
    }

    /// Sign a fixed test digest and verify it against the exported key.
    pub async fn self_test(&self) -> SignResult<String> {
        let pem = self.export_public_key().await?;
        let digest = RepoHash::of_content(SELF_TEST_CONTENT).double_hash();
        let signature = self.sign(&digest, HashAlgorithm::Sha256).await?;
        verify_double_hash(&digest, &signature, pem.as_bytes())?;
        info!(bytes = signature.len(), "self-test passed");
        Ok(pem)
    }
}

/// A generic failure after waiting out the hardware touch window is a
/// confirmation timeout, not a token fault.
fn classify_sign_failure(
    err: SignError,
    elapsed: Duration,
    require_touch: bool,
    touch_timeout: Duration,
) -> SignError {
    match err {
        SignError::Token { reason } if require_touch && elapsed >= touch_timeout => {
            SignError::ConfirmationTimeout {
                reason: format!("touch not received ({reason})"),
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pin::Pin;
    use crate::test_support::test_key;

    fn soft(touch: Touch) -> Arc<SoftToken> {
        Arc::new(SoftToken::new(test_key()).with_pin("123456").with_touch(touch))
    }

    fn authority(token: Arc<SoftToken>) -> SigningAuthority {
        SigningAuthority::new(token, PinSource::Inline(Pin::new("123456")))
            .with_touch_timeout(Duration::from_millis(100))
    }

    fn hello() -> DoubleHash {
        RepoHash::of_content(b"hello").double_hash()
    }

    #[tokio::test]
    async fn test_sign_verifies_and_releases_session() {
        let token = soft(Touch::Immediate);
        let auth = authority(Arc::clone(&token));

        let sig = auth.sign(&hello(), HashAlgorithm::Sha256).await.unwrap();
        let pem = auth.export_public_key().await.unwrap();
        verify_double_hash(&hello(), &sig, pem.as_bytes()).unwrap();

        let stats = token.stats();
        assert_eq!(stats.sessions_opened, 2, "one fresh session per call");
        assert_eq!(stats.sessions_open, 0, "sessions released");
        assert_eq!(stats.signatures, 1);
    }

    #[tokio::test]
    async fn test_wrong_pin_is_fatal_and_counts_down() {
        let token = soft(Touch::Immediate);
        let auth = SigningAuthority::new(
            Arc::clone(&token) as Arc<dyn Token>,
            PinSource::Inline(Pin::new("000000")),
        );

        let err = auth.sign(&hello(), HashAlgorithm::Sha256).await.unwrap_err();
        assert!(matches!(err, SignError::AuthenticationFailure { .. }));
        assert!(!err.is_retryable());
        assert_eq!(token.retries_left(), 2);
        assert_eq!(token.stats().sessions_open, 0);
    }

    #[tokio::test]
    async fn test_token_locks_after_three_failures() {
        let token = soft(Touch::Immediate);
        let bad = SigningAuthority::new(
            Arc::clone(&token) as Arc<dyn Token>,
            PinSource::Inline(Pin::new("000000")),
        );
        for _ in 0..3 {
            let _ = bad.sign(&hello(), HashAlgorithm::Sha256).await;
        }

        // Correct PIN no longer helps
        let good = authority(Arc::clone(&token));
        let err = good.sign(&hello(), HashAlgorithm::Sha256).await.unwrap_err();
        assert!(err.to_string().contains("locked"), "{err}");
    }

    #[tokio::test]
    async fn test_outer_timeout_is_confirmation_timeout() {
        let token = soft(Touch::After(Duration::from_millis(500)));
        let auth = authority(Arc::clone(&token))
            .with_confirmation_timeout(Duration::from_millis(50));

        let err = auth.sign(&hello(), HashAlgorithm::Sha256).await.unwrap_err();
        assert!(matches!(err, SignError::ConfirmationTimeout { .. }), "{err:?}");

        // The next request waits for the abandoned hardware call, then succeeds
        let auth = auth.with_confirmation_timeout(Duration::from_secs(5));
        auth.sign(&hello(), HashAlgorithm::Sha256).await.unwrap();
        assert_eq!(token.stats().peak_concurrent, 1);
        assert_eq!(token.stats().sessions_open, 0);
    }

    #[tokio::test]
    async fn test_withheld_touch_is_confirmation_timeout() {
        let token = soft(Touch::Withheld(Duration::from_millis(150)));
        let auth = authority(token);

        let err = auth.sign(&hello(), HashAlgorithm::Sha256).await.unwrap_err();
        assert!(matches!(err, SignError::ConfirmationTimeout { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_quick_token_failure_is_not_a_timeout() {
        let token = soft(Touch::Withheld(Duration::ZERO));
        let auth = authority(token);

        let err = auth.sign(&hello(), HashAlgorithm::Sha256).await.unwrap_err();
        assert!(matches!(err, SignError::Token { .. }), "{err:?}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_are_serialized() {
        let token = soft(Touch::After(Duration::from_millis(100)));
        let auth = Arc::new(authority(Arc::clone(&token)));

        let a = {
            let auth = Arc::clone(&auth);
            tokio::spawn(async move { auth.sign(&hello(), HashAlgorithm::Sha256).await })
        };
        let b = {
            let auth = Arc::clone(&auth);
            tokio::spawn(async move { auth.sign(&hello(), HashAlgorithm::Sha256).await })
        };

        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert_eq!(token.stats().peak_concurrent, 1);
        assert_eq!(token.stats().signatures, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_try_sign_rejects_while_busy() {
        let token = soft(Touch::After(Duration::from_millis(300)));
        let auth = Arc::new(authority(token));

        let first = {
            let auth = Arc::clone(&auth);
            tokio::spawn(async move { auth.sign(&hello(), HashAlgorithm::Sha256).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = auth
            .try_sign(&hello(), HashAlgorithm::Sha256)
            .await
            .unwrap_err();
        assert!(matches!(err, SignError::Busy { .. }));
        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_self_test_passes() {
        let auth = authority(soft(Touch::Immediate));
        let pem = auth.self_test().await.unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
    }
}
