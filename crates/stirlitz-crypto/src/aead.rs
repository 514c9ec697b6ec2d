//! Single-shot ChaCha20-Poly1305 sealing.
//!
//! Used for small payloads that fit in memory, chiefly wrapping a profile's
//! stored key under the password-derived wrapping key. Bulk data goes
//! through [`crate::stream`].

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::key::KeyMaterial;

/// Nonce size for ChaCha20-Poly1305.
pub const NONCE_SIZE: usize = 12;

/// Poly1305 tag size appended to every ciphertext.
pub const TAG_SIZE: usize = 16;

/// A sealed payload with the random nonce it was sealed under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sealed {
    #[serde(with = "hex::serde")]
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext including the 16-byte tag.
    #[serde(with = "hex::serde")]
    pub ciphertext: Vec<u8>,
}

pub(crate) fn cipher_for(key: &KeyMaterial) -> ChaCha20Poly1305 {
    ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()))
}

/// Seal `plaintext` under `key` with a fresh random nonce.
pub fn seal(key: &KeyMaterial, plaintext: &[u8], aad: &[u8]) -> Result<Sealed, CryptoError> {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher_for(key)
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    Ok(Sealed { nonce, ciphertext })
}

/// Open a [`Sealed`] payload. Any mismatch is an authentication failure.
pub fn open(
    key: &KeyMaterial,
    sealed: &Sealed,
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    cipher_for(key)
        .decrypt(
            Nonce::from_slice(&sealed.nonce),
            Payload {
                msg: &sealed.ciphertext,
                aad,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::AuthenticationFailed("sealed payload did not verify".into()))
}

/// Encrypt `key` under `wrapping` for storage at rest. `context` binds the
/// wrapped key to its owner (e.g. the profile name).
pub fn wrap_key(
    wrapping: &KeyMaterial,
    key: &KeyMaterial,
    context: &[u8],
) -> Result<Sealed, CryptoError> {
    seal(wrapping, key.as_bytes(), context)
}

/// Inverse of [`wrap_key`].
pub fn unwrap_key(
    wrapping: &KeyMaterial,
    sealed: &Sealed,
    context: &[u8],
) -> Result<KeyMaterial, CryptoError> {
    let bytes = open(wrapping, sealed, context)?;
    KeyMaterial::from_slice(&bytes)
}
