//! Profile types: the persisted record and the unlocked in-memory profile.

use std::fmt;

use serde::{Deserialize, Serialize};
use stirlitz_crypto::{KdfParams, KeyMaterial, SALT_SIZE, Sealed, VERIFIER_SIZE};

/// Current on-disk record version.
pub(crate) const RECORD_VERSION: u32 = 1;

/// One profile as persisted. Contains no password and no key in the clear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ProfileRecord {
    pub version: u32,
    pub name: String,
    pub user_name: String,
    #[serde(with = "hex::serde")]
    pub salt: [u8; SALT_SIZE],
    /// Argon2id-derived verifier.
    #[serde(with = "hex::serde")]
    pub password_hash: [u8; VERIFIER_SIZE],
    pub kdf: KdfParams,
    /// The shared key, wrapped under the password-derived key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_key: Option<Sealed>,
}

/// An unlocked profile.
///
/// Obtained from [`ProfileStore::authenticate`](super::ProfileStore::authenticate)
/// or [`ProfileStore::create_ephemeral`](super::ProfileStore::create_ephemeral).
/// Holds the unwrapped stored key and, for persisted profiles, the key used
/// to re-wrap a new one. Both are zeroized when the profile is dropped.
pub struct Profile {
    pub(crate) name: String,
    pub(crate) user_name: String,
    pub(crate) stored_key: Option<KeyMaterial>,
    pub(crate) wrap_key: Option<KeyMaterial>,
    pub(crate) ephemeral: bool,
}

impl Profile {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// One-time profiles are never written to the store.
    pub const fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    pub const fn stored_key(&self) -> Option<&KeyMaterial> {
        self.stored_key.as_ref()
    }

    pub const fn has_key(&self) -> bool {
        self.stored_key.is_some()
    }

    /// Fingerprint of the stored key, if any.
    pub fn key_fingerprint(&self) -> Option<String> {
        self.stored_key.as_ref().map(KeyMaterial::fingerprint)
    }
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("name", &self.name)
            .field("user_name", &self.user_name)
            .field("ephemeral", &self.ephemeral)
            .field("key_fingerprint", &self.key_fingerprint())
            .finish_non_exhaustive()
    }
}
