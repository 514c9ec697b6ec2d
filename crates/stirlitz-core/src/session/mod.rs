//! Session controller.
//!
//! The single entry point for a caller (the CLI here, a GUI elsewhere). It
//! owns the unlocked profile and the exchange in progress, enforces the
//! session state machine and serializes crypto jobs per profile:
//!
//! ```text
//! Unauthenticated ── login / create ──▶ Authenticated
//! Authenticated ── begin_key_exchange ──▶ KeyPending
//! KeyPending ── set_opponent_key ──▶ KeyReady
//! KeyReady ── commit_shared_key / cancel_exchange ──▶ Authenticated
//! any ── close ──▶ Closed
//! ```
//!
//! Crypto jobs run inside the authenticated states without changing them.
//! Passphrase jobs need no profile and are allowed in every state but
//! `Closed`.

mod handle;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use stirlitz_crypto::{ExchangeSession, fingerprint_randomart};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

pub use handle::JobHandle;
use handle::join_error;

use crate::engine::{CryptoEngine, CryptoJob, JobKey, JobMode, JobStatus};
use crate::error::{Error, Result};
use crate::jobs::{JobRegistry, JobSlot};
use crate::profile::{Profile, ProfileStore};

/// Outer session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    /// Own key generated, waiting for the opponent key.
    KeyPending,
    /// Opponent key accepted; shared key can be previewed and committed.
    KeyReady,
    Closed,
}

impl SessionState {
    const fn is_authenticated(self) -> bool {
        matches!(self, Self::Authenticated | Self::KeyPending | Self::KeyReady)
    }

    const fn in_exchange(self) -> bool {
        matches!(self, Self::KeyPending | Self::KeyReady)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticated => "authenticated",
            Self::KeyPending => "key pending",
            Self::KeyReady => "key ready",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// What both parties compare before committing a shared key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedKeyPreview {
    pub fingerprint: String,
    pub randomart: String,
    /// Whether committing replaces an existing stored key.
    pub replaces_existing: bool,
}

pub struct SessionController {
    id: Uuid,
    store: Arc<ProfileStore>,
    registry: JobRegistry,
    engine: CryptoEngine,
    state: SessionState,
    profile: Option<Profile>,
    exchange: Option<ExchangeSession>,
    /// Parent of every job's cancellation token; cancelled on close.
    jobs_cancel: CancellationToken,
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

impl SessionController {
    pub fn new(store: Arc<ProfileStore>, registry: JobRegistry, engine: CryptoEngine) -> Self {
        Self {
            id: Uuid::new_v4(),
            store,
            registry,
            engine,
            state: SessionState::Unauthenticated,
            profile: None,
            exchange: None,
            jobs_cancel: CancellationToken::new(),
        }
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    pub const fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    // --- profile lifecycle ---

    /// Create a profile and log into it.
    pub async fn create_profile(
        &mut self,
        name: &str,
        user_name: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<()> {
        self.require(&[SessionState::Unauthenticated], "create a profile")?;
        let (name, user_name) = (name.to_string(), user_name.to_string());
        let password = Zeroizing::new(password.to_string());
        let confirm = Zeroizing::new(confirm_password.to_string());
        let profile = self
            .blocking(move |store| store.create(&name, &user_name, &password, &confirm))
            .await?;
        self.enter(profile);
        Ok(())
    }

    /// Unlock a stored profile by name and password.
    pub async fn login(&mut self, name: &str, password: &str) -> Result<()> {
        self.require(&[SessionState::Unauthenticated], "log in")?;
        let name = name.to_string();
        let password = Zeroizing::new(password.to_string());
        let profile = self
            .blocking(move |store| store.authenticate(&name, &password))
            .await?;
        self.enter(profile);
        Ok(())
    }

    /// Unlock a stored profile, also checking its user name.
    pub async fn login_as(&mut self, name: &str, user_name: &str, password: &str) -> Result<()> {
        self.require(&[SessionState::Unauthenticated], "log in")?;
        let (name, user_name) = (name.to_string(), user_name.to_string());
        let password = Zeroizing::new(password.to_string());
        let profile = self
            .blocking(move |store| store.authenticate_as(&name, &user_name, &password))
            .await?;
        self.enter(profile);
        Ok(())
    }

    /// Start a session on a one-time profile that is discarded on close.
    pub fn login_ephemeral(&mut self, user_name: &str, password: &str) -> Result<()> {
        self.require(&[SessionState::Unauthenticated], "log in")?;
        let profile = self.store.create_ephemeral(user_name, password)?;
        self.enter(profile);
        Ok(())
    }

    /// Remove a stored profile. If it is the one logged in, the session
    /// returns to `Unauthenticated`. Fails with `Busy` while a job runs on
    /// it. The caller is responsible for having asked for confirmation.
    pub async fn remove_profile(&mut self, name: &str) -> Result<()> {
        self.require_open("remove a profile")?;
        let slot = self.registry.try_claim(name)?;
        let owned = name.to_string();
        self.blocking(move |store| {
            let _slot = slot;
            store.remove(&owned)
        })
        .await?;

        if self.profile.as_ref().is_some_and(|p| p.name() == name) {
            self.logout();
        }
        Ok(())
    }

    /// Forget the stored key of the current profile. The caller is
    /// responsible for having asked for confirmation.
    pub async fn clear_stored_key(&mut self) -> Result<()> {
        self.require_authenticated("clear the key")?;
        self.update_profile(|store, profile| store.clear_stored_key(profile))
            .await
    }

    /// Leave the session. Running jobs started from it are cancelled and
    /// a one-time profile is discarded.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.jobs_cancel.cancel();
        self.exchange = None;
        if let Some(profile) = self.profile.take() {
            info!(profile = profile.name(), ephemeral = profile.is_ephemeral(), "Session closed");
        }
        self.state = SessionState::Closed;
    }

    // --- key exchange ---

    /// Start (or restart) a key exchange; returns the own key to send to
    /// the counterpart.
    pub fn begin_key_exchange(&mut self) -> Result<String> {
        self.require_authenticated("start a key exchange")?;
        let exchange = ExchangeSession::new();
        let encoded = exchange.own_key_encoded();
        self.exchange = Some(exchange);
        self.state = SessionState::KeyPending;
        Ok(encoded)
    }

    /// Accept the counterpart's key. A malformed key leaves the state
    /// unchanged.
    pub fn set_opponent_key(&mut self, encoded: &str) -> Result<SharedKeyPreview> {
        self.require(
            &[SessionState::KeyPending, SessionState::KeyReady],
            "enter an opponent key",
        )?;
        let exchange = self
            .exchange
            .as_mut()
            .ok_or_else(|| Error::InvalidState("no key exchange in progress".into()))?;
        exchange.set_opponent_key(encoded)?;
        self.state = SessionState::KeyReady;
        self.preview_shared_key()
    }

    /// Derive the shared key and describe it without committing anything.
    pub fn preview_shared_key(&self) -> Result<SharedKeyPreview> {
        self.require(&[SessionState::KeyReady], "preview the shared key")?;
        let shared = self.derive_shared()?;
        let fingerprint = shared.fingerprint();
        Ok(SharedKeyPreview {
            randomart: fingerprint_randomart(&fingerprint, "STIRLITZ"),
            fingerprint,
            replaces_existing: self.profile.as_ref().is_some_and(Profile::has_key),
        })
    }

    /// Store the shared key in the profile, replacing any previous key, and
    /// end the exchange. Returns the new key's fingerprint. The caller is
    /// responsible for having asked for confirmation.
    pub async fn commit_shared_key(&mut self) -> Result<String> {
        self.require(&[SessionState::KeyReady], "commit the shared key")?;
        let shared = self.derive_shared()?;
        let fingerprint = shared.fingerprint();
        self.update_profile(move |store, profile| store.set_stored_key(profile, shared))
            .await?;
        self.exchange = None;
        self.state = SessionState::Authenticated;
        Ok(fingerprint)
    }

    /// Drop the exchange in progress without touching the profile.
    pub fn cancel_exchange(&mut self) -> Result<()> {
        if !self.state.in_exchange() {
            return Err(self.invalid("cancel a key exchange"));
        }
        self.exchange = None;
        self.state = SessionState::Authenticated;
        Ok(())
    }

    // --- crypto ---

    /// Encrypt text with the profile key; returns hex-armored ciphertext.
    pub async fn encrypt_text(&self, text: &str) -> Result<String> {
        let key = self.profile_key("encrypt text")?;
        let slot = self.registry.try_claim(&self.slot_key())?;
        let engine = self.engine;
        let text = Zeroizing::new(text.to_string());
        tokio::task::spawn_blocking(move || {
            let _slot = slot;
            engine.encrypt_text(key, &text)
        })
        .await
        .map_err(join_error)?
    }

    /// Decrypt hex-armored ciphertext with the profile key.
    pub async fn decrypt_text(&self, armored: &str) -> Result<Zeroizing<String>> {
        let key = self.profile_key("decrypt text")?;
        let slot = self.registry.try_claim(&self.slot_key())?;
        let engine = self.engine;
        let armored = armored.to_string();
        tokio::task::spawn_blocking(move || {
            let _slot = slot;
            engine.decrypt_text(key, &armored)
        })
        .await
        .map_err(join_error)?
    }

    /// Start a file job with the profile key.
    ///
    /// Path validation and the `Busy` check happen here, before anything
    /// runs; the returned handle reports progress and the final result.
    pub fn start_file_job(
        &self,
        mode: JobMode,
        src: impl Into<PathBuf>,
        dst: impl Into<PathBuf>,
    ) -> Result<JobHandle> {
        let key = self.profile_key("run a file job")?;
        self.spawn_job(CryptoJob::file(mode, src, dst, key))
    }

    /// Start a file job keyed by user name and password instead of a
    /// profile.
    pub fn start_passphrase_job(
        &self,
        mode: JobMode,
        user_name: &str,
        password: &str,
        src: impl Into<PathBuf>,
        dst: impl Into<PathBuf>,
    ) -> Result<JobHandle> {
        self.require_open("run a passphrase job")?;
        let key = passphrase_key(user_name, password)?;
        self.spawn_job(CryptoJob::file(mode, src, dst, key))
    }

    /// Start a passphrase encryption from a freshly typed password and its
    /// confirmation. Fails with `PasswordMismatch` before touching any file.
    pub fn start_passphrase_encryption(
        &self,
        user_name: &str,
        password: &str,
        confirm_password: &str,
        src: impl Into<PathBuf>,
        dst: impl Into<PathBuf>,
    ) -> Result<JobHandle> {
        self.require_open("run a passphrase job")?;
        let key = passphrase_key(user_name, password)?;
        if password != confirm_password {
            return Err(Error::PasswordMismatch);
        }
        self.spawn_job(CryptoJob::file(JobMode::Encrypt, src, dst, key))
    }

    /// Encrypt text under a user name and password.
    pub async fn encrypt_text_with_passphrase(
        &self,
        user_name: &str,
        password: &str,
        text: &str,
    ) -> Result<String> {
        self.require_open("encrypt text")?;
        let key = passphrase_key(user_name, password)?;
        let slot = self.registry.try_claim(&self.slot_key())?;
        let engine = self.engine;
        let text = Zeroizing::new(text.to_string());
        tokio::task::spawn_blocking(move || {
            let _slot = slot;
            engine.encrypt_text(key, &text)
        })
        .await
        .map_err(join_error)?
    }

    /// Decrypt text sealed by [`encrypt_text_with_passphrase`](Self::encrypt_text_with_passphrase).
    pub async fn decrypt_text_with_passphrase(
        &self,
        user_name: &str,
        password: &str,
        armored: &str,
    ) -> Result<Zeroizing<String>> {
        self.require_open("decrypt text")?;
        let key = passphrase_key(user_name, password)?;
        let slot = self.registry.try_claim(&self.slot_key())?;
        let engine = self.engine;
        let armored = armored.to_string();
        tokio::task::spawn_blocking(move || {
            let _slot = slot;
            engine.decrypt_text(key, &armored)
        })
        .await
        .map_err(join_error)?
    }

    // --- internals ---

    fn spawn_job(&self, mut job: CryptoJob) -> Result<JobHandle> {
        self.engine.validate(&job)?;
        let slot = self.registry.try_claim(&self.slot_key())?;
        let mode = job.mode();
        let (tx, rx) = watch::channel(JobStatus::Pending);
        let cancel = self.jobs_cancel.child_token();
        let token = cancel.clone();
        let engine = self.engine;

        info!(slot = slot.key(), %mode, "Starting file job");
        let task = tokio::task::spawn_blocking(move || {
            let _slot: JobSlot = slot;
            tx.send_replace(JobStatus::Running { bytes: 0 });
            let result = engine.run(&mut job, &token, |bytes| {
                tx.send_replace(JobStatus::Running { bytes });
            });
            tx.send_replace(job.status());
            result
        });
        Ok(JobHandle::new(mode, rx, cancel, task))
    }

    fn enter(&mut self, profile: Profile) {
        info!(
            profile = profile.name(),
            ephemeral = profile.is_ephemeral(),
            "Session authenticated"
        );
        self.profile = Some(profile);
        self.state = SessionState::Authenticated;
    }

    /// Run a store operation on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&ProfileStore) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(join_error)?
    }

    /// Hand the profile to a store operation on the blocking pool and take
    /// it back, whatever the outcome.
    async fn update_profile<F>(&mut self, op: F) -> Result<()>
    where
        F: FnOnce(&ProfileStore, &mut Profile) -> Result<()> + Send + 'static,
    {
        let mut profile = self
            .profile
            .take()
            .ok_or_else(|| Error::InvalidState("no profile".into()))?;
        let slot = match self.registry.try_claim(profile.name()) {
            Ok(slot) => slot,
            Err(e) => {
                self.profile = Some(profile);
                return Err(e);
            }
        };
        let store = Arc::clone(&self.store);
        let joined = tokio::task::spawn_blocking(move || {
            let _slot = slot;
            let result = op(&store, &mut profile);
            (profile, result)
        })
        .await;
        match joined {
            Ok((profile, result)) => {
                self.profile = Some(profile);
                result
            }
            Err(e) => {
                // The unlocked profile went down with the task.
                warn!(error = %e, "Profile update task failed, logging out");
                self.logout();
                Err(join_error(e))
            }
        }
    }

    fn logout(&mut self) {
        self.profile = None;
        self.exchange = None;
        self.state = SessionState::Unauthenticated;
    }

    fn derive_shared(&self) -> Result<stirlitz_crypto::KeyMaterial> {
        let exchange = self
            .exchange
            .as_ref()
            .ok_or_else(|| Error::InvalidState("no key exchange in progress".into()))?;
        match exchange.preview() {
            Some(result) => Ok(result?),
            None => Err(Error::InvalidState("no opponent key entered".into())),
        }
    }

    fn profile_key(&self, op: &str) -> Result<JobKey> {
        self.require_authenticated(op)?;
        let profile = self
            .profile
            .as_ref()
            .ok_or_else(|| Error::InvalidState("no profile".into()))?;
        let key = profile
            .stored_key()
            .ok_or_else(|| Error::MissingKey(profile.name().to_string()))?;
        Ok(JobKey::Key(key.clone()))
    }

    /// Jobs serialize on the profile name (unique per one-time profile as
    /// well), or on the session id when no profile is open.
    fn slot_key(&self) -> String {
        self.profile
            .as_ref()
            .map_or_else(|| format!("session-{}", self.id), |p| p.name().to_string())
    }

    fn require(&self, allowed: &[SessionState], op: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(self.invalid(op))
        }
    }

    fn require_authenticated(&self, op: &str) -> Result<()> {
        if self.state.is_authenticated() {
            Ok(())
        } else {
            Err(self.invalid(op))
        }
    }

    fn require_open(&self, op: &str) -> Result<()> {
        if self.state == SessionState::Closed {
            Err(self.invalid(op))
        } else {
            Ok(())
        }
    }

    fn invalid(&self, op: &str) -> Error {
        warn!(state = %self.state, op, "Operation rejected");
        Error::InvalidState(format!("cannot {op} while {}", self.state))
    }
}

fn passphrase_key(user_name: &str, password: &str) -> Result<JobKey> {
    if user_name.is_empty() {
        return Err(Error::EmptyField("user name"));
    }
    if password.is_empty() {
        return Err(Error::EmptyField("password"));
    }
    Ok(JobKey::Passphrase {
        user_name: user_name.to_string(),
        password: Zeroizing::new(password.to_string()),
    })
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use stirlitz_crypto::{KdfParams, MIN_CHUNK_SIZE};

    fn controller() -> SessionController {
        let store = Arc::new(ProfileStore::in_memory(KdfParams::insecure_fast()));
        SessionController::new(
            store,
            JobRegistry::new(),
            CryptoEngine::new(MIN_CHUNK_SIZE as usize, KdfParams::insecure_fast()),
        )
    }

    #[tokio::test]
    async fn state_machine_happy_path() {
        let mut session = controller();
        assert_eq!(session.state(), SessionState::Unauthenticated);
        session
            .create_profile("alice", "Alice", "pw", "pw")
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);

        session.begin_key_exchange().unwrap();
        assert_eq!(session.state(), SessionState::KeyPending);
        assert_eq!(
            session.preview_shared_key().unwrap_err().kind(),
            ErrorKind::InvalidState
        );

        let other = stirlitz_crypto::KeyMaterial::generate();
        let preview = session.set_opponent_key(&other.encode()).unwrap();
        assert_eq!(session.state(), SessionState::KeyReady);
        assert!(!preview.replaces_existing);

        let fingerprint = session.commit_shared_key().await.unwrap();
        assert_eq!(fingerprint, preview.fingerprint);
        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(
            session.profile().unwrap().key_fingerprint(),
            Some(fingerprint)
        );

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.profile().is_none());
    }

    #[tokio::test]
    async fn malformed_opponent_key_keeps_state() {
        let mut session = controller();
        session.login_ephemeral("Alice", "pw").unwrap();
        session.begin_key_exchange().unwrap();
        let err = session.set_opponent_key("not-a-key").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedKey);
        assert_eq!(session.state(), SessionState::KeyPending);
    }

    #[tokio::test]
    async fn cancel_exchange_leaves_key_untouched() {
        let mut session = controller();
        session.login_ephemeral("Alice", "pw").unwrap();
        session.begin_key_exchange().unwrap();
        session
            .set_opponent_key(&stirlitz_crypto::KeyMaterial::generate().encode())
            .unwrap();
        session.cancel_exchange().unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);
        assert!(!session.profile().unwrap().has_key());
        assert!(session.cancel_exchange().is_err());
    }

    #[tokio::test]
    async fn crypto_without_key_is_missing_key() {
        let mut session = controller();
        session.login_ephemeral("Alice", "pw").unwrap();
        assert_eq!(
            session.encrypt_text("hi").await.unwrap_err().kind(),
            ErrorKind::MissingKey
        );
    }

    #[tokio::test]
    async fn operations_need_the_right_state() {
        let mut session = controller();
        assert_eq!(
            session.begin_key_exchange().unwrap_err().kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            session.encrypt_text("hi").await.unwrap_err().kind(),
            ErrorKind::InvalidState
        );
        session.login_ephemeral("Alice", "pw").unwrap();
        assert_eq!(
            session.login_ephemeral("Bob", "pw").unwrap_err().kind(),
            ErrorKind::InvalidState
        );
        session.close();
        assert_eq!(
            session.login("alice", "pw").await.unwrap_err().kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            session
                .encrypt_text_with_passphrase("A", "pw", "x")
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::InvalidState
        );
    }

    #[tokio::test]
    async fn passphrase_text_works_unauthenticated() {
        let session = controller();
        let armored = session
            .encrypt_text_with_passphrase("Alice", "pw", "hello")
            .await
            .unwrap();
        let plain = session
            .decrypt_text_with_passphrase("Alice", "pw", &armored)
            .await
            .unwrap();
        assert_eq!(plain.as_str(), "hello");
        assert_eq!(
            session
                .encrypt_text_with_passphrase("", "pw", "x")
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::EmptyField
        );
    }

    #[tokio::test]
    async fn removing_current_profile_logs_out() {
        let mut session = controller();
        session
            .create_profile("alice", "Alice", "pw", "pw")
            .await
            .unwrap();
        session.remove_profile("alice").await.unwrap();
        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert!(session.store().list().unwrap().is_empty());
        assert_eq!(
            session.remove_profile("alice").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn failed_profile_task_logs_out() {
        let mut session = controller();
        session
            .create_profile("alice", "Alice", "pw", "pw")
            .await
            .unwrap();
        session.begin_key_exchange().unwrap();

        let err = session
            .update_profile(|_, _| panic!("store task died"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert!(session.profile().is_none());
        assert!(!session.registry.is_busy("alice"));

        session.login("alice", "pw").await.unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);
    }
}
