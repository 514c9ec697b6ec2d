#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! File jobs: atomic output, per-profile serialization, progress and
//! cancellation.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use stirlitz_core::{
    CryptoEngine, ErrorKind, JobMode, JobOutput, JobRegistry, JobStatus, ProfileStore,
    SessionController,
};
use stirlitz_crypto::{KdfParams, KeyMaterial};

const CHUNK: usize = 4096;

/// A session logged into `name` with a committed shared key.
async fn keyed_session(
    store: &Arc<ProfileStore>,
    registry: &JobRegistry,
    name: &str,
) -> SessionController {
    let mut session = SessionController::new(
        Arc::clone(store),
        registry.clone(),
        CryptoEngine::new(CHUNK, KdfParams::insecure_fast()),
    );
    session.create_profile(name, name, "pw", "pw").await.unwrap();
    session.begin_key_exchange().unwrap();
    session
        .set_opponent_key(&KeyMaterial::generate().encode())
        .unwrap();
    session.commit_shared_key().await.unwrap();
    session
}

fn write_sample(path: &Path, len: usize) -> Vec<u8> {
    let data: Vec<u8> = (0..len).map(|i| (i % 253) as u8).collect();
    fs::write(path, &data).unwrap();
    data
}

#[tokio::test]
async fn encrypt_then_decrypt_file() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(ProfileStore::in_memory(KdfParams::insecure_fast()));
    let registry = JobRegistry::new();
    let session = keyed_session(&store, &registry, "alice").await;

    let src = tmp.path().join("report.pdf");
    let enc = tmp.path().join("report.pdf.stz");
    let dec = tmp.path().join("report.copy.pdf");
    let data = write_sample(&src, CHUNK * 5 + 7);

    let handle = session.start_file_job(JobMode::Encrypt, &src, &enc).unwrap();
    let mut status = handle.subscribe();
    let output = handle.wait().await.unwrap();
    assert!(matches!(output, JobOutput::File(ref p) if p == &enc));
    assert_eq!(*status.borrow_and_update(), JobStatus::Completed);
    assert!(fs::metadata(&enc).unwrap().len() > data.len() as u64);

    let handle = session.start_file_job(JobMode::Decrypt, &enc, &dec).unwrap();
    handle.wait().await.unwrap();
    assert_eq!(fs::read(&dec).unwrap(), data);
}

#[tokio::test]
async fn same_source_and_destination_is_rejected_before_writing() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(ProfileStore::in_memory(KdfParams::insecure_fast()));
    let registry = JobRegistry::new();
    let session = keyed_session(&store, &registry, "alice").await;

    let src = tmp.path().join("notes.txt");
    fs::write(&src, b"original").unwrap();

    let err = session
        .start_file_job(JobMode::Encrypt, &src, &src)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PathCollision);
    assert_eq!(fs::read(&src).unwrap(), b"original");
    assert!(!registry.is_busy("alice"));
}

#[tokio::test]
async fn missing_source_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(ProfileStore::in_memory(KdfParams::insecure_fast()));
    let registry = JobRegistry::new();
    let session = keyed_session(&store, &registry, "alice").await;

    let err = session
        .start_file_job(
            JobMode::Encrypt,
            tmp.path().join("nope"),
            tmp.path().join("out"),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SourceNotFound);
}

#[tokio::test]
async fn second_job_on_same_profile_is_busy() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(ProfileStore::in_memory(KdfParams::insecure_fast()));
    let registry = JobRegistry::new();
    let first = keyed_session(&store, &registry, "alice").await;

    let src = tmp.path().join("in");
    write_sample(&src, CHUNK);

    // Hold alice's slot as a running job would.
    let running = registry.try_claim("alice").unwrap();

    let err = first
        .start_file_job(JobMode::Encrypt, &src, tmp.path().join("out-1"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Busy);
    let err = first.encrypt_text("hi").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Busy);
    assert!(!tmp.path().join("out-1").exists());

    // A second controller on the same profile shares the registry.
    let mut second = SessionController::new(
        Arc::clone(&store),
        registry.clone(),
        CryptoEngine::new(CHUNK, KdfParams::insecure_fast()),
    );
    second.login("alice", "pw").await.unwrap();
    let err = second
        .start_file_job(JobMode::Encrypt, &src, tmp.path().join("out-2"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Busy);

    drop(running);
    first
        .start_file_job(JobMode::Encrypt, &src, tmp.path().join("out-1"))
        .unwrap()
        .wait()
        .await
        .unwrap();
}

#[tokio::test]
async fn running_job_holds_the_profile_slot_until_it_ends() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(ProfileStore::in_memory(KdfParams::insecure_fast()));
    let registry = JobRegistry::new();
    let session = keyed_session(&store, &registry, "alice").await;

    // Large enough that the job is still streaming when the second request
    // arrives.
    let src = tmp.path().join("big.bin");
    let dst = tmp.path().join("big.stz");
    write_sample(&src, 32 * 1024 * 1024);

    let handle = session.start_file_job(JobMode::Encrypt, &src, &dst).unwrap();
    let mut status = handle.subscribe();
    status
        .wait_for(|s| matches!(s, JobStatus::Running { bytes } if *bytes > 0))
        .await
        .unwrap();

    let err = session
        .start_file_job(JobMode::Encrypt, &src, tmp.path().join("other.stz"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Busy);
    let err = session.encrypt_text("hi").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Busy);
    assert!(registry.is_busy("alice"));

    handle.cancel();
    let err = handle.wait().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(!dst.exists());
    assert!(!tmp.path().join("other.stz").exists());

    assert!(!registry.is_busy("alice"));
    session.encrypt_text("hi").await.unwrap();
}

#[tokio::test]
async fn jobs_on_distinct_profiles_run_concurrently() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(ProfileStore::in_memory(KdfParams::insecure_fast()));
    let registry = JobRegistry::new();
    let alice = keyed_session(&store, &registry, "alice").await;
    let bob = keyed_session(&store, &registry, "bob").await;

    let src = tmp.path().join("shared-input");
    write_sample(&src, CHUNK * 64);

    // Keep alice's slot taken; bob must not be affected.
    let _alice_running = registry.try_claim("alice").unwrap();
    let bob_job = bob
        .start_file_job(JobMode::Encrypt, &src, tmp.path().join("bob.stz"))
        .unwrap();
    assert!(
        alice
            .start_file_job(JobMode::Encrypt, &src, tmp.path().join("alice.stz"))
            .is_err()
    );
    bob_job.wait().await.unwrap();
    assert!(tmp.path().join("bob.stz").exists());
}

#[tokio::test]
async fn slot_is_released_when_job_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(ProfileStore::in_memory(KdfParams::insecure_fast()));
    let registry = JobRegistry::new();
    let session = keyed_session(&store, &registry, "alice").await;

    let not_a_container = tmp.path().join("plain.txt");
    fs::write(&not_a_container, b"just text").unwrap();
    let dst = tmp.path().join("out");

    let handle = session
        .start_file_job(JobMode::Decrypt, &not_a_container, &dst)
        .unwrap();
    let status = handle.subscribe();
    let err = handle.wait().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
    assert_eq!(
        *status.borrow(),
        JobStatus::Failed(ErrorKind::AuthenticationFailed)
    );
    assert!(!dst.exists());
    assert!(!registry.is_busy("alice"));
}

#[tokio::test]
async fn closing_the_session_cancels_its_jobs() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(ProfileStore::in_memory(KdfParams::insecure_fast()));
    let registry = JobRegistry::new();
    let mut session = keyed_session(&store, &registry, "alice").await;

    let src = tmp.path().join("in");
    let dst = tmp.path().join("out");
    write_sample(&src, CHUNK * 4);

    let handle = session.start_file_job(JobMode::Encrypt, &src, &dst).unwrap();
    let token = handle.cancellation_token();
    session.close();
    assert!(token.is_cancelled());

    // The job either finished before it saw the cancellation or was
    // cancelled; in the latter case nothing was written.
    match handle.wait().await {
        Ok(_) => assert!(dst.exists()),
        Err(e) => {
            assert_eq!(e.kind(), ErrorKind::Cancelled);
            assert!(!dst.exists());
        }
    }
    assert!(!registry.is_busy("alice"));
}

#[tokio::test]
async fn passphrase_file_job_needs_no_login() {
    let tmp = tempfile::tempdir().unwrap();
    let session = SessionController::new(
        Arc::new(ProfileStore::in_memory(KdfParams::insecure_fast())),
        JobRegistry::new(),
        CryptoEngine::new(CHUNK, KdfParams::insecure_fast()),
    );

    let src = tmp.path().join("diary.txt");
    let enc = tmp.path().join("diary.stz");
    let dec = tmp.path().join("diary.out");
    let data = write_sample(&src, 1000);

    session
        .start_passphrase_job(JobMode::Encrypt, "Alice", "pw", &src, &enc)
        .unwrap()
        .wait()
        .await
        .unwrap();

    let err = session
        .start_passphrase_job(JobMode::Decrypt, "Alice", "nope", &enc, &dec)
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
    assert!(!dec.exists());

    session
        .start_passphrase_job(JobMode::Decrypt, "Alice", "pw", &enc, &dec)
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(fs::read(&dec).unwrap(), data);
}

#[tokio::test]
async fn mismatched_confirmation_refuses_passphrase_encryption() {
    let tmp = tempfile::tempdir().unwrap();
    let session = SessionController::new(
        Arc::new(ProfileStore::in_memory(KdfParams::insecure_fast())),
        JobRegistry::new(),
        CryptoEngine::new(CHUNK, KdfParams::insecure_fast()),
    );

    let src = tmp.path().join("diary.txt");
    let enc = tmp.path().join("diary.stz");
    let dec = tmp.path().join("diary.out");
    let data = write_sample(&src, 1000);

    let err = session
        .start_passphrase_encryption("Alice", "pw", "pW", &src, &enc)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PasswordMismatch);
    assert!(!enc.exists());

    session
        .start_passphrase_encryption("Alice", "pw", "pw", &src, &enc)
        .unwrap()
        .wait()
        .await
        .unwrap();
    session
        .start_passphrase_job(JobMode::Decrypt, "Alice", "pw", &enc, &dec)
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(fs::read(&dec).unwrap(), data);
}
