//! Forwarded-channel flow: signing command -> socket -> agent -> soft token.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{authority, key_a, key_b, public_pem, soft_token, start_agent};
use pivsign_core::authority::Touch;
use pivsign_core::verify::{verify_repo_hash, verify_signed_block};
use pivsign_core::{ChannelTransport, Fingerprint, RepoHash, SignError, SignedBlock, SigningCommand};

const HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_hello_signs_and_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("agent.sock");
    let token = soft_token(key_a(), Touch::Immediate);
    let agent = start_agent(authority(Arc::clone(&token)), &socket).await;

    let cmd = SigningCommand::new(Arc::new(ChannelTransport::new(&socket)));
    let mut out = Vec::new();
    cmd.execute(format!("{HELLO}\n").as_bytes(), &mut out)
        .await
        .unwrap();
    agent.stop().await;

    let block = SignedBlock::parse(&out).unwrap();
    let pem = public_pem(&key_a());
    assert_eq!(block.public_key, pem.as_bytes());

    let pin = Fingerprint::of_pem(pem.as_bytes());
    let hash = RepoHash::of_content(b"hello");
    assert_eq!(hash.as_str(), HELLO);
    let report = verify_signed_block(&hash, &block, Some(&pin)).unwrap();
    assert!(report.pinned);

    // One flipped hex character in H
    let flipped = RepoHash::parse(&format!("{}5", &HELLO[..63])).unwrap();
    assert!(verify_repo_hash(&flipped, &block.signature, &block.public_key, None).is_err());

    assert_eq!(token.stats().sessions_open, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_withheld_touch_propagates_without_signature() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("agent.sock");
    let token = soft_token(key_a(), Touch::Withheld(Duration::from_millis(200)));
    let agent = start_agent(authority(token), &socket).await;

    let pub_path = dir.path().join("repo.pub");
    std::fs::write(&pub_path, public_pem(&key_a())).unwrap();
    let cmd = SigningCommand::new(Arc::new(ChannelTransport::new(&socket)))
        .with_public_key(Some(pub_path));

    let mut out = Vec::new();
    let err = cmd
        .execute(format!("{HELLO}\n").as_bytes(), &mut out)
        .await
        .unwrap_err();
    agent.stop().await;

    assert!(matches!(err, SignError::ConfirmationTimeout { .. }), "{err:?}");
    assert_eq!(err.exit_code(), 2);
    assert!(out.is_empty(), "no SIGNATURE block on failure");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wrong_signer_at_rendezvous_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("rendezvous.sock");
    // A stale agent holding a different key answers on the rendezvous
    let agent = start_agent(authority(soft_token(key_b(), Touch::Immediate)), &socket).await;

    let pub_path = dir.path().join("repo.pub");
    std::fs::write(&pub_path, public_pem(&key_a())).unwrap();
    let cmd = SigningCommand::new(Arc::new(ChannelTransport::new(&socket)))
        .with_public_key(Some(pub_path));

    let mut out = Vec::new();
    let err = cmd
        .execute(format!("{HELLO}\n").as_bytes(), &mut out)
        .await
        .unwrap_err();
    agent.stop().await;

    assert!(matches!(err, SignError::UnexpectedSigner { .. }), "{err:?}");
    assert!(err.is_transport());
    assert!(out.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_commands_are_serialized() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("agent.sock");
    let token = soft_token(key_a(), Touch::After(Duration::from_millis(50)));
    let agent = start_agent(authority(Arc::clone(&token)), &socket).await;

    let mut tasks = Vec::new();
    for content in [&b"one"[..], b"two", b"three"] {
        let socket = socket.clone();
        let hash = RepoHash::of_content(content);
        tasks.push(tokio::spawn(async move {
            let cmd = SigningCommand::new(Arc::new(ChannelTransport::new(&socket)));
            let mut out = Vec::new();
            cmd.execute(format!("{hash}\n").as_bytes(), &mut out)
                .await
                .map(|()| (hash, out))
        }));
    }
    for task in tasks {
        let (hash, out) = task.await.unwrap().unwrap();
        let block = SignedBlock::parse(&out).unwrap();
        verify_signed_block(&hash, &block, None).unwrap();
    }
    agent.stop().await;

    let stats = token.stats();
    assert_eq!(stats.peak_concurrent, 1);
    assert_eq!(stats.sessions_open, 0);
}

#[tokio::test]
async fn test_agent_down_is_transport_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let cmd = SigningCommand::new(Arc::new(
        ChannelTransport::new(dir.path().join("nobody.sock")).with_timeout(Duration::from_secs(1)),
    ));
    let mut out = Vec::new();
    let err = cmd
        .execute(format!("{HELLO}\n").as_bytes(), &mut out)
        .await
        .unwrap_err();
    assert!(matches!(err, SignError::TransportUnavailable { .. }));
    assert_eq!(err.exit_code(), 5);
}
