//! Profile store.
//!
//! One JSON record per profile in a directory (`<name>.json`), mirrored in
//! an in-memory index. Every write goes to a temporary file in the same
//! directory, is fsynced, then renamed into place, so neither the index nor
//! a concurrent reader of the directory ever sees a half-written record.
//!
//! Argon2 runs outside the index lock; callers on an async runtime should
//! invoke the password-checking methods from a blocking task.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use stirlitz_crypto::{
    KdfParams, KeyMaterial, constant_time_str_eq, derive_password_secrets, generate_salt,
    unwrap_key, wrap_key,
};
use tracing::{debug, info, warn};

use super::model::{Profile, ProfileRecord, RECORD_VERSION};
use crate::error::{Error, Result};

const RECORD_EXTENSION: &str = "json";

enum Backend {
    Disk(PathBuf),
    Memory,
}

/// Store of named, password-protected profiles.
///
/// Construct one per profile directory and share it (`Arc`) between
/// controllers. Tests use [`ProfileStore::in_memory`] for isolation.
pub struct ProfileStore {
    backend: Backend,
    kdf: KdfParams,
    index: RwLock<BTreeMap<String, ProfileRecord>>,
}

impl std::fmt::Debug for ProfileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let location = match &self.backend {
            Backend::Disk(dir) => dir.display().to_string(),
            Backend::Memory => "<memory>".to_string(),
        };
        f.debug_struct("ProfileStore")
            .field("location", &location)
            .field("kdf", &self.kdf)
            .finish_non_exhaustive()
    }
}

impl ProfileStore {
    /// Open (creating if needed) the profile directory at `dir` and load
    /// every record in it. New profiles are hashed with `kdf`.
    pub fn open(dir: impl Into<PathBuf>, kdf: KdfParams) -> Result<Self> {
        let dir = dir.into();
        create_private_dir(&dir)?;

        let mut index = BTreeMap::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if !is_record_file(&path) {
                continue;
            }
            let record = read_record(&path)?;
            let expected = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if record.name != expected {
                return Err(Error::Storage(format!(
                    "{} holds profile {:?}",
                    path.display(),
                    record.name
                )));
            }
            index.insert(record.name.clone(), record);
        }

        info!(dir = %dir.display(), profiles = index.len(), "Profile store opened");
        Ok(Self {
            backend: Backend::Disk(dir),
            kdf,
            index: RwLock::new(index),
        })
    }

    /// A store that never touches the filesystem.
    pub fn in_memory(kdf: KdfParams) -> Self {
        Self {
            backend: Backend::Memory,
            kdf,
            index: RwLock::new(BTreeMap::new()),
        }
    }

    /// KDF cost used for new profiles.
    pub const fn kdf_params(&self) -> KdfParams {
        self.kdf
    }

    /// Sorted profile names.
    pub fn list(&self) -> Result<Vec<String>> {
        Ok(self.read_index()?.keys().cloned().collect())
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.read_index()?.contains_key(name))
    }

    /// Create and persist a new profile without a stored key.
    ///
    /// Validation happens before any derivation or write: empty fields,
    /// then password confirmation, then name uniqueness.
    pub fn create(
        &self,
        name: &str,
        user_name: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<Profile> {
        require_non_empty(name, "name")?;
        require_non_empty(user_name, "user name")?;
        require_non_empty(password, "password")?;
        if password != confirm_password {
            return Err(Error::PasswordMismatch);
        }
        validate_name(name)?;
        if self.contains(name)? {
            return Err(Error::ProfileExists(name.to_string()));
        }

        let salt = generate_salt();
        let secrets = derive_password_secrets(password.as_bytes(), &salt, &self.kdf)?;
        let record = ProfileRecord {
            version: RECORD_VERSION,
            name: name.to_string(),
            user_name: user_name.to_string(),
            salt,
            password_hash: *secrets.verifier(),
            kdf: self.kdf,
            stored_key: None,
        };

        {
            let mut index = self.write_index()?;
            if index.contains_key(name) {
                return Err(Error::ProfileExists(name.to_string()));
            }
            if let Backend::Disk(dir) = &self.backend {
                write_record(dir, &record, WriteMode::CreateNew)?;
            }
            index.insert(name.to_string(), record);
        }

        info!(profile = name, "Profile created");
        Ok(Profile {
            name: name.to_string(),
            user_name: user_name.to_string(),
            stored_key: None,
            wrap_key: Some(secrets.into_wrap_key()),
            ephemeral: false,
        })
    }

    /// Unlock a profile by name and password.
    ///
    /// An unknown name and a wrong password both report
    /// [`Error::InvalidCredentials`], after the same amount of work.
    pub fn authenticate(&self, name: &str, password: &str) -> Result<Profile> {
        let record = self.read_index()?.get(name).cloned();
        let Some(record) = record else {
            // Burn the same Argon2 cost so an unknown name is not faster.
            let _ = derive_password_secrets(password.as_bytes(), &generate_salt(), &self.kdf);
            warn!(profile = name, "Login failed");
            return Err(Error::InvalidCredentials);
        };

        let secrets = derive_password_secrets(password.as_bytes(), &record.salt, &record.kdf)?;
        if !secrets.verify(&record.password_hash) {
            warn!(profile = name, "Login failed");
            return Err(Error::InvalidCredentials);
        }
        let wrap = secrets.into_wrap_key();

        let stored_key = match &record.stored_key {
            Some(sealed) => Some(unwrap_key(&wrap, sealed, name.as_bytes()).map_err(|_| {
                Error::Storage(format!("stored key of profile {name} does not verify"))
            })?),
            None => None,
        };

        info!(
            profile = name,
            has_key = stored_key.is_some(),
            "Profile unlocked"
        );
        Ok(Profile {
            name: record.name,
            user_name: record.user_name,
            stored_key,
            wrap_key: Some(wrap),
            ephemeral: false,
        })
    }

    /// Like [`authenticate`](Self::authenticate), additionally requiring the
    /// profile's user name to match.
    pub fn authenticate_as(&self, name: &str, user_name: &str, password: &str) -> Result<Profile> {
        let profile = self.authenticate(name, password)?;
        if !constant_time_str_eq(profile.user_name(), user_name) {
            warn!(profile = name, "Login failed: user name mismatch");
            return Err(Error::InvalidCredentials);
        }
        Ok(profile)
    }

    /// A one-time profile that is never persisted.
    pub fn create_ephemeral(&self, user_name: &str, password: &str) -> Result<Profile> {
        require_non_empty(user_name, "user name")?;
        require_non_empty(password, "password")?;
        let name = format!("one-time-{}", uuid::Uuid::new_v4());
        debug!(profile = %name, "One-time profile created");
        Ok(Profile {
            name,
            user_name: user_name.to_string(),
            stored_key: None,
            wrap_key: None,
            ephemeral: true,
        })
    }

    /// Delete a profile. The caller is responsible for having asked for
    /// confirmation.
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut index = self.write_index()?;
        if !index.contains_key(name) {
            return Err(Error::NotFound(name.to_string()));
        }
        if let Backend::Disk(dir) = &self.backend {
            match fs::remove_file(record_path(dir, name)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        index.remove(name);
        info!(profile = name, "Profile removed");
        Ok(())
    }

    /// Replace the profile's stored key. Persisted profiles are re-written
    /// atomically; one-time profiles only change in memory. The caller is
    /// responsible for having asked for confirmation.
    pub fn set_stored_key(&self, profile: &mut Profile, key: KeyMaterial) -> Result<()> {
        let fingerprint = key.fingerprint();
        self.update_stored_key(profile, Some(key))?;
        info!(profile = %profile.name, fingerprint = %fingerprint, "Stored key replaced");
        Ok(())
    }

    /// Remove the profile's stored key.
    pub fn clear_stored_key(&self, profile: &mut Profile) -> Result<()> {
        self.update_stored_key(profile, None)?;
        info!(profile = %profile.name, "Stored key cleared");
        Ok(())
    }

    fn update_stored_key(&self, profile: &mut Profile, key: Option<KeyMaterial>) -> Result<()> {
        if profile.ephemeral {
            profile.stored_key = key;
            return Ok(());
        }
        let wrap = profile
            .wrap_key
            .as_ref()
            .ok_or_else(|| Error::InvalidState("profile is not unlocked".into()))?;
        let sealed = key
            .as_ref()
            .map(|k| wrap_key(wrap, k, profile.name.as_bytes()))
            .transpose()?;

        let mut index = self.write_index()?;
        let record = index
            .get(&profile.name)
            .ok_or_else(|| Error::NotFound(profile.name.clone()))?;
        let mut updated = record.clone();
        updated.stored_key = sealed;
        if let Backend::Disk(dir) = &self.backend {
            write_record(dir, &updated, WriteMode::Replace)?;
        }
        index.insert(profile.name.clone(), updated);
        drop(index);

        profile.stored_key = key;
        Ok(())
    }

    fn read_index(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, ProfileRecord>>> {
        self.index
            .read()
            .map_err(|_| Error::Storage("profile index lock poisoned".into()))
    }

    fn write_index(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, ProfileRecord>>> {
        self.index
            .write()
            .map_err(|_| Error::Storage("profile index lock poisoned".into()))
    }
}

fn require_non_empty(value: &str, field: &'static str) -> Result<()> {
    if value.is_empty() {
        Err(Error::EmptyField(field))
    } else {
        Ok(())
    }
}

/// Profile names become file names.
fn validate_name(name: &str) -> Result<()> {
    let bad = name.starts_with('.')
        || name
            .chars()
            .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control());
    if bad {
        return Err(Error::InvalidPath(format!(
            "profile name {name:?} cannot be used as a file name"
        )));
    }
    Ok(())
}

fn record_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{RECORD_EXTENSION}"))
}

fn is_record_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_none_or(|n| n.starts_with('.'));
    !hidden && path.is_file() && path.extension().is_some_and(|e| e == RECORD_EXTENSION)
}

fn read_record(path: &Path) -> Result<ProfileRecord> {
    let content = fs::read_to_string(path)?;
    let record: ProfileRecord = serde_json::from_str(&content)
        .map_err(|e| Error::Storage(format!("{}: {e}", path.display())))?;
    if record.version != RECORD_VERSION {
        return Err(Error::Storage(format!(
            "{}: unsupported record version {}",
            path.display(),
            record.version
        )));
    }
    Ok(record)
}

#[derive(Clone, Copy)]
enum WriteMode {
    CreateNew,
    Replace,
}

/// Atomic, owner-only record write.
fn write_record(dir: &Path, record: &ProfileRecord, mode: WriteMode) -> Result<()> {
    let target = record_path(dir, &record.name);
    let mut tmp = tempfile::Builder::new()
        .prefix(".profile-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, record)?;
    tmp.write_all(b"\n")?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    set_owner_only(tmp.path(), 0o600)?;

    match mode {
        WriteMode::CreateNew => {
            tmp.persist_noclobber(&target).map_err(|e| {
                if e.error.kind() == io::ErrorKind::AlreadyExists {
                    Error::ProfileExists(record.name.clone())
                } else {
                    Error::Io(e.error)
                }
            })?;
        }
        WriteMode::Replace => {
            tmp.persist(&target).map_err(|e| Error::Io(e.error))?;
        }
    }
    Ok(())
}

fn create_private_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
        set_owner_only(dir, 0o700)?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_owner_only(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn fast() -> KdfParams {
        KdfParams::insecure_fast()
    }

    #[test]
    fn create_validates_fields_in_order() {
        let store = ProfileStore::in_memory(fast());
        let kind = |r: Result<Profile>| r.unwrap_err().kind();
        assert_eq!(kind(store.create("", "A", "p", "p")), ErrorKind::EmptyField);
        assert_eq!(kind(store.create("a", "", "p", "p")), ErrorKind::EmptyField);
        assert_eq!(kind(store.create("a", "A", "", "")), ErrorKind::EmptyField);
        assert_eq!(
            kind(store.create("a", "A", "p", "q")),
            ErrorKind::PasswordMismatch
        );
        assert_eq!(kind(store.create("../x", "A", "p", "p")), ErrorKind::InvalidPath);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let store = ProfileStore::in_memory(fast());
        store.create("alice", "Alice", "pw123", "pw123").unwrap();
        assert!(matches!(
            store.create("alice", "Other", "x", "x"),
            Err(Error::ProfileExists(_))
        ));
        assert_eq!(store.list().unwrap(), vec!["alice".to_string()]);
    }

    #[test]
    fn authenticate_checks_password() {
        let store = ProfileStore::in_memory(fast());
        store.create("alice", "Alice", "pw123", "pw123").unwrap();

        for wrong in ["wrong", "pw12", "pw1234", "PW123", ""] {
            assert!(
                matches!(
                    store.authenticate("alice", wrong),
                    Err(Error::InvalidCredentials)
                ),
                "{wrong:?} was accepted"
            );
        }
        assert!(matches!(
            store.authenticate("bob", "pw123"),
            Err(Error::InvalidCredentials)
        ));

        let profile = store.authenticate("alice", "pw123").unwrap();
        assert_eq!(profile.user_name(), "Alice");
        assert!(!profile.has_key());
    }

    #[test]
    fn authenticate_as_checks_user_name() {
        let store = ProfileStore::in_memory(fast());
        store.create("alice", "Alice", "pw", "pw").unwrap();
        assert!(store.authenticate_as("alice", "Alice", "pw").is_ok());
        assert!(matches!(
            store.authenticate_as("alice", "Mallory", "pw"),
            Err(Error::InvalidCredentials)
        ));
    }

    #[test]
    fn stored_key_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let key = KeyMaterial::generate();
        {
            let store = ProfileStore::open(tmp.path(), fast()).unwrap();
            let mut profile = store.create("alice", "Alice", "pw", "pw").unwrap();
            store.set_stored_key(&mut profile, key.clone()).unwrap();
            assert_eq!(profile.stored_key(), Some(&key));
        }

        let store = ProfileStore::open(tmp.path(), fast()).unwrap();
        assert_eq!(store.list().unwrap(), vec!["alice".to_string()]);
        let profile = store.authenticate("alice", "pw").unwrap();
        assert_eq!(profile.stored_key(), Some(&key));

        let on_disk = fs::read_to_string(tmp.path().join("alice.json")).unwrap();
        assert!(!on_disk.contains(&key.encode()));
        assert!(!on_disk.contains("\"pw\""));
    }

    #[test]
    fn clear_stored_key_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProfileStore::open(tmp.path(), fast()).unwrap();
        let mut profile = store.create("alice", "Alice", "pw", "pw").unwrap();
        store
            .set_stored_key(&mut profile, KeyMaterial::generate())
            .unwrap();
        store.clear_stored_key(&mut profile).unwrap();
        assert!(!profile.has_key());
        assert!(!store.authenticate("alice", "pw").unwrap().has_key());
    }

    #[test]
    fn remove_deletes_record() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProfileStore::open(tmp.path(), fast()).unwrap();
        store.create("alice", "Alice", "pw", "pw").unwrap();
        store.remove("alice").unwrap();
        assert!(!tmp.path().join("alice.json").exists());
        assert!(matches!(store.remove("alice"), Err(Error::NotFound(_))));
        assert!(matches!(
            store.authenticate("alice", "pw"),
            Err(Error::InvalidCredentials)
        ));
    }

    #[test]
    fn set_key_on_removed_profile_is_not_found() {
        let store = ProfileStore::in_memory(fast());
        let mut profile = store.create("alice", "Alice", "pw", "pw").unwrap();
        store.remove("alice").unwrap();
        assert!(matches!(
            store.set_stored_key(&mut profile, KeyMaterial::generate()),
            Err(Error::NotFound(_))
        ));
        assert!(!profile.has_key());
    }

    #[test]
    fn ephemeral_profiles_are_never_listed() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProfileStore::open(tmp.path(), fast()).unwrap();
        assert!(matches!(
            store.create_ephemeral("", "pw"),
            Err(Error::EmptyField(_))
        ));
        let mut once = store.create_ephemeral("Alice", "pw").unwrap();
        assert!(once.is_ephemeral());
        store
            .set_stored_key(&mut once, KeyMaterial::generate())
            .unwrap();
        assert!(once.has_key());
        assert!(store.list().unwrap().is_empty());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn open_ignores_temp_and_foreign_files() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(".profile-abc.tmp"), "partial").unwrap();
        fs::write(tmp.path().join("notes.txt"), "hello").unwrap();
        let store = ProfileStore::open(tmp.path(), fast()).unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn open_rejects_corrupt_record() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("alice.json"), "{").unwrap();
        assert!(matches!(
            ProfileStore::open(tmp.path(), fast()),
            Err(Error::Storage(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn records_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("profiles");
        let store = ProfileStore::open(&dir, fast()).unwrap();
        store.create("alice", "Alice", "pw", "pw").unwrap();
        let file_mode = fs::metadata(dir.join("alice.json")).unwrap().permissions().mode();
        let dir_mode = fs::metadata(&dir).unwrap().permissions().mode();
        assert_eq!(file_mode & 0o777, 0o600);
        assert_eq!(dir_mode & 0o777, 0o700);
    }
}
