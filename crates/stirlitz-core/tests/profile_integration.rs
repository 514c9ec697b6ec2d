#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! Profile lifecycle through the session controller, backed by a real
//! profile directory.

use std::sync::Arc;

use stirlitz_core::{
    CryptoEngine, ErrorKind, JobRegistry, ProfileStore, SessionController, SessionState,
};
use stirlitz_crypto::{KdfParams, KeyMaterial};

fn session_on(store: &Arc<ProfileStore>) -> SessionController {
    SessionController::new(
        Arc::clone(store),
        JobRegistry::new(),
        CryptoEngine::new(4096, KdfParams::insecure_fast()),
    )
}

#[tokio::test]
async fn alice_create_duplicate_wrong_password_login() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(ProfileStore::open(tmp.path(), KdfParams::insecure_fast()).unwrap());

    let mut first = session_on(&store);
    first
        .create_profile("alice", "Alice", "pw123", "pw123")
        .await
        .unwrap();

    let mut second = session_on(&store);
    let err = second
        .create_profile("alice", "Alice", "pw123", "pw123")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProfileExists);
    assert_eq!(second.state(), SessionState::Unauthenticated);

    let err = second.login("alice", "wrong").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidCredentials);

    second.login("alice", "pw123").await.unwrap();
    assert_eq!(second.state(), SessionState::Authenticated);
    assert_eq!(second.profile().unwrap().user_name(), "Alice");
}

#[tokio::test]
async fn password_confirmation_is_enforced() {
    let store = Arc::new(ProfileStore::in_memory(KdfParams::insecure_fast()));
    let mut session = session_on(&store);
    let err = session
        .create_profile("bob", "Bob", "one", "two")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PasswordMismatch);
    assert!(store.list().unwrap().is_empty());
}

#[tokio::test]
async fn committed_key_is_available_after_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let fingerprint = {
        let store = Arc::new(ProfileStore::open(tmp.path(), KdfParams::insecure_fast()).unwrap());
        let mut session = session_on(&store);
        session
            .create_profile("alice", "Alice", "pw", "pw")
            .await
            .unwrap();
        session.begin_key_exchange().unwrap();
        session
            .set_opponent_key(&KeyMaterial::generate().encode())
            .unwrap();
        session.commit_shared_key().await.unwrap()
    };

    let store = Arc::new(ProfileStore::open(tmp.path(), KdfParams::insecure_fast()).unwrap());
    let mut session = session_on(&store);
    session.login_as("alice", "Alice", "pw").await.unwrap();
    assert_eq!(
        session.profile().unwrap().key_fingerprint(),
        Some(fingerprint)
    );

    session.clear_stored_key().await.unwrap();
    session.close();

    let mut session = session_on(&store);
    session.login("alice", "pw").await.unwrap();
    assert!(!session.profile().unwrap().has_key());
}

#[tokio::test]
async fn second_exchange_reports_replacement() {
    let store = Arc::new(ProfileStore::in_memory(KdfParams::insecure_fast()));
    let mut session = session_on(&store);
    session
        .create_profile("alice", "Alice", "pw", "pw")
        .await
        .unwrap();

    session.begin_key_exchange().unwrap();
    session
        .set_opponent_key(&KeyMaterial::generate().encode())
        .unwrap();
    let first = session.commit_shared_key().await.unwrap();

    session.begin_key_exchange().unwrap();
    let preview = session
        .set_opponent_key(&KeyMaterial::generate().encode())
        .unwrap();
    assert!(preview.replaces_existing);
    assert_ne!(preview.fingerprint, first);
}

#[tokio::test]
async fn profiles_are_listed_sorted() {
    let store = Arc::new(ProfileStore::in_memory(KdfParams::insecure_fast()));
    for name in ["carol", "alice", "bob"] {
        let mut session = session_on(&store);
        session.create_profile(name, name, "pw", "pw").await.unwrap();
    }
    assert_eq!(store.list().unwrap(), vec!["alice", "bob", "carol"]);
}
