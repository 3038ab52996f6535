//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use pivsign_core::authority::Touch;
use pivsign_core::{Agent, Pin, PinSource, SigningAuthority, SoftToken};
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::RsaPrivateKey;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const PIN: &str = "123456";

fn generate() -> RsaPrivateKey {
    RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap()
}

pub fn key_a() -> RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(generate).clone()
}

pub fn key_b() -> RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(generate).clone()
}

pub fn public_pem(key: &RsaPrivateKey) -> String {
    key.to_public_key().to_public_key_pem(LineEnding::LF).unwrap()
}

pub fn soft_token(key: RsaPrivateKey, touch: Touch) -> Arc<SoftToken> {
    Arc::new(SoftToken::new(key).with_pin(PIN).with_touch(touch))
}

pub fn authority(token: Arc<SoftToken>) -> Arc<SigningAuthority> {
    Arc::new(
        SigningAuthority::new(token, PinSource::Inline(Pin::new(PIN)))
            .with_require_touch(true)
            .with_touch_timeout(Duration::from_millis(100))
            .with_confirmation_timeout(Duration::from_secs(5)),
    )
}

pub struct RunningAgent {
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<()>,
}

impl RunningAgent {
    pub async fn stop(self) {
        self.shutdown.cancel();
        self.handle.await.unwrap();
    }
}

/// Start an agent on `socket` and wait until it accepts connections.
pub async fn start_agent(authority: Arc<SigningAuthority>, socket: &Path) -> RunningAgent {
    let agent = Agent::start(authority, None).await.unwrap();
    let shutdown = CancellationToken::new();
    let handle = {
        let socket = socket.to_path_buf();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            agent.serve(&socket, shutdown).await.unwrap();
        })
    };
    while !socket.exists() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    RunningAgent { shutdown, handle }
}
