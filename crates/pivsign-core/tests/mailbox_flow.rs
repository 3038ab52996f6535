//! Mailbox flow: coordinator + remote invocation + signing command over a shared directory.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{authority, key_a, soft_token};
use pivsign_core::authority::Touch;
use pivsign_core::mailbox::Mailbox;
use pivsign_core::verify::verify_signed_block;
use pivsign_core::{
    Coordinator, LocalMailbox, MailboxTransport, RepoHash, SignError, SignedBlock, SigningCommand,
};

/// Remote invocation stand-in: waits until `done` appears.
fn wait_for(done: &std::path::Path) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("while [ ! -e '{}' ]; do sleep 0.05; done", done.display()),
    ]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mailbox_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mailbox_dir = dir.path().join("mailbox");
    std::fs::create_dir(&mailbox_dir).unwrap();
    let done = dir.path().join("meta.conf");

    let token = soft_token(key_a(), Touch::Immediate);
    let coordinator = Coordinator::new(
        authority(Arc::clone(&token)),
        Arc::new(LocalMailbox::new(&mailbox_dir)),
    )
    .with_poll_interval(Duration::from_millis(20))
    .with_artifact(&done);

    let build = {
        let mailbox_dir = mailbox_dir.clone();
        let done = done.clone();
        tokio::spawn(async move {
            // Let the coordinator clean the mailbox first
            tokio::time::sleep(Duration::from_millis(200)).await;
            let transport = MailboxTransport::new(Mailbox::new(&mailbox_dir))
                .with_poll(200, Duration::from_millis(20));
            let cmd = SigningCommand::new(Arc::new(transport));
            let hash = RepoHash::of_content(b"hello");
            let mut out = Vec::new();
            cmd.execute(format!("{hash}\n").as_bytes(), &mut out)
                .await
                .unwrap();
            std::fs::write(&done, b"signed").unwrap();
            (hash, out)
        })
    };

    let report = coordinator.run(&wait_for(&done)).await.unwrap();
    assert_eq!(report.signatures, 1);
    assert!(report.artifact_checked);

    let (hash, out) = build.await.unwrap();
    let block = SignedBlock::parse(&out).unwrap();
    verify_signed_block(&hash, &block, None).unwrap();

    assert_eq!(std::fs::read_dir(&mailbox_dir).unwrap().count(), 0);
    assert_eq!(token.stats().sessions_open, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_local_failure_aborts_remote_and_leaves_no_response() {
    let dir = tempfile::tempdir().unwrap();
    let mailbox_dir = dir.path().join("mailbox");
    std::fs::create_dir(&mailbox_dir).unwrap();
    // Never created: the remote invocation only ends by being killed
    let never = dir.path().join("never");

    let token = soft_token(key_a(), Touch::Withheld(Duration::from_millis(200)));
    let pem = common::public_pem(&key_a()).into_bytes();
    let coordinator = Coordinator::new(authority(token), Arc::new(LocalMailbox::new(&mailbox_dir)))
        .with_poll_interval(Duration::from_millis(20))
        .with_public_key(pem);

    let build = {
        let mailbox_dir = mailbox_dir.clone();
        tokio::spawn(async move {
            // Let the coordinator clean the mailbox first
            tokio::time::sleep(Duration::from_millis(200)).await;
            let transport = MailboxTransport::new(Mailbox::new(&mailbox_dir))
                .with_poll(50, Duration::from_millis(20));
            let cmd = SigningCommand::new(Arc::new(transport));
            let mut out = Vec::new();
            let result = cmd
                .execute(format!("{}\n", RepoHash::of_content(b"hello")).as_bytes(), &mut out)
                .await;
            (result, out)
        })
    };

    let err = tokio::time::timeout(Duration::from_secs(10), coordinator.run(&wait_for(&never)))
        .await
        .expect("coordinator must not wait for a killed remote")
        .unwrap_err();
    assert!(matches!(err, SignError::ConfirmationTimeout { .. }), "{err:?}");

    let (result, out) = build.await.unwrap();
    assert!(matches!(
        result,
        Err(SignError::TransportUnavailable { .. })
    ));
    assert!(out.is_empty());
    assert!(!mailbox_dir.join("response").exists());
}

#[tokio::test]
async fn test_mailbox_cleanup_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mailbox = Mailbox::new(dir.path());
    mailbox.clean().await.unwrap();
    mailbox.write_request("PUBKEY\n").await.unwrap();
    mailbox.clean().await.unwrap();
    mailbox.clean().await.unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
