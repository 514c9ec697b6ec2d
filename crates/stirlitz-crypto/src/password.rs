//! Password-based key derivation with Argon2id.
//!
//! A profile password is stretched once with Argon2id and the result is
//! split with HKDF-SHA256 into two independent secrets:
//!
//! - a **verifier**, stored in the profile record and compared in constant
//!   time on login;
//! - a **wrapping key**, never stored, used to encrypt the profile's shared
//!   key at rest.
//!
//! Passphrase mode (no profile) derives a file key from user name and
//! password the same way, with a per-container salt.

use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

use crate::error::CryptoError;
use crate::key::{KEY_SIZE, KeyMaterial};

/// Salt length for every Argon2id derivation.
pub const SALT_SIZE: usize = 16;

/// Length of a stored password verifier.
pub const VERIFIER_SIZE: usize = 32;

/// Largest accepted Argon2 memory cost (4 GiB).
pub const MAX_KDF_MEMORY_KIB: u32 = 4 * 1024 * 1024;

/// Largest accepted Argon2 pass count.
pub const MAX_KDF_ITERATIONS: u32 = 64;

/// Largest accepted Argon2 lane count.
pub const MAX_KDF_PARALLELISM: u32 = 64;

const HKDF_SALT: &[u8] = b"stirlitz-password-hkdf-v1";
const INFO_VERIFIER: &[u8] = b"stirlitz-password-verifier";
const INFO_WRAP: &[u8] = b"stirlitz-key-wrap";
const INFO_PASSPHRASE: &[u8] = b"stirlitz-passphrase-file-key";

/// Argon2id cost parameters.
///
/// Persisted alongside every salt so records stay readable when the
/// configured defaults change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024, // 64 MiB
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Minimal cost parameters so tests do not spend seconds in Argon2.
    #[cfg(any(test, feature = "test-utils"))]
    pub const fn insecure_fast() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }

    /// Reject costs outside the range every reader accepts. Anything sealed
    /// under parameters that pass this check can be opened again.
    pub fn check_bounds(&self) -> Result<(), CryptoError> {
        if !(1..=MAX_KDF_PARALLELISM).contains(&self.parallelism) {
            return Err(CryptoError::KeyDerivationFailed(format!(
                "parallelism {} outside 1..={MAX_KDF_PARALLELISM}",
                self.parallelism
            )));
        }
        if !(1..=MAX_KDF_ITERATIONS).contains(&self.iterations) {
            return Err(CryptoError::KeyDerivationFailed(format!(
                "iterations {} outside 1..={MAX_KDF_ITERATIONS}",
                self.iterations
            )));
        }
        if self.memory_kib > MAX_KDF_MEMORY_KIB || self.memory_kib < 8 * self.parallelism {
            return Err(CryptoError::KeyDerivationFailed(format!(
                "memory {} KiB outside {}..={MAX_KDF_MEMORY_KIB}",
                self.memory_kib,
                8 * self.parallelism
            )));
        }
        Ok(())
    }

    fn argon2(&self) -> Result<Argon2<'static>, CryptoError> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Generate a fresh random salt.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Secrets derived from a profile password. Zeroized on drop.
pub struct PasswordSecrets {
    verifier: Zeroizing<[u8; VERIFIER_SIZE]>,
    wrap_key: KeyMaterial,
}

impl PasswordSecrets {
    /// The value to persist as the profile's password hash.
    pub fn verifier(&self) -> &[u8; VERIFIER_SIZE] {
        &self.verifier
    }

    /// Constant-time comparison against a stored verifier.
    pub fn verify(&self, stored: &[u8]) -> bool {
        stored.len() == VERIFIER_SIZE && bool::from(self.verifier[..].ct_eq(stored))
    }

    /// Consume the secrets, keeping only the key-wrapping key.
    pub fn into_wrap_key(self) -> KeyMaterial {
        self.wrap_key
    }
}

/// Stretch a password and split it into verifier and wrapping key.
pub fn derive_password_secrets(
    password: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<PasswordSecrets, CryptoError> {
    let stretched = stretch(password, salt, params)?;
    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), &stretched[..]);

    let mut verifier = Zeroizing::new([0u8; VERIFIER_SIZE]);
    hk.expand(INFO_VERIFIER, &mut verifier[..])
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;

    let mut wrap = [0u8; KEY_SIZE];
    hk.expand(INFO_WRAP, &mut wrap)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    let wrap_key = KeyMaterial::from_bytes(wrap);
    wrap.zeroize();

    Ok(PasswordSecrets { verifier, wrap_key })
}

/// Derive a file key from a user name and password (passphrase mode).
///
/// The user name is length-delimited from the password by a NUL byte, so
/// `("ab", "c")` and `("a", "bc")` yield different keys.
pub fn derive_passphrase_key(
    user_name: &str,
    password: &str,
    salt: &[u8],
    params: &KdfParams,
) -> Result<KeyMaterial, CryptoError> {
    let mut input = Zeroizing::new(Vec::with_capacity(user_name.len() + password.len() + 1));
    input.extend_from_slice(user_name.as_bytes());
    input.push(0);
    input.extend_from_slice(password.as_bytes());

    let stretched = stretch(&input, salt, params)?;
    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), &stretched[..]);
    let mut okm = [0u8; KEY_SIZE];
    hk.expand(INFO_PASSPHRASE, &mut okm)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    let key = KeyMaterial::from_bytes(okm);
    okm.zeroize();
    Ok(key)
}

fn stretch(
    secret: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
    let mut out = Zeroizing::new([0u8; KEY_SIZE]);
    params
        .argon2()?
        .hash_password_into(secret, salt, &mut out[..])
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    Ok(out)
}
