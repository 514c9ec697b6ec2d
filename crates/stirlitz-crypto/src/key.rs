//! Symmetric key material.
//!
//! A [`KeyMaterial`] is a 256-bit secret that both parties of a manual
//! exchange copy around as text. The text form is lowercase hex; decoding is
//! tolerant of the noise that copy-paste through chat windows introduces
//! (line wraps, spaces, `:`/`-` grouping) but strict about everything else.

use std::fmt;

use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::fingerprint::fingerprint_of;

/// Length of every symmetric key, in bytes.
pub const KEY_SIZE: usize = 32;

/// Length of the hex encoding of a key.
pub const ENCODED_KEY_LEN: usize = KEY_SIZE * 2;

/// A fixed-length symmetric key. Immutable once built, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    bytes: [u8; KEY_SIZE],
}

impl KeyMaterial {
    /// Generate a fresh key from the operating system CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Take ownership of raw key bytes.
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Copy key bytes out of a slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; KEY_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }

    /// Raw key bytes. Handle with care.
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Human-transcribable encoding (64 lowercase hex characters).
    pub fn encode(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Parse the text form produced by [`encode`](Self::encode).
    ///
    /// ASCII whitespace and `:`/`-` separators are ignored and hex digits
    /// may be upper case. Anything else, or a length other than
    /// [`ENCODED_KEY_LEN`] digits, is a [`CryptoError::MalformedKey`].
    pub fn decode(encoded: &str) -> Result<Self, CryptoError> {
        let mut cleaned: String = encoded
            .chars()
            .filter(|c| !c.is_ascii_whitespace() && *c != ':' && *c != '-')
            .collect();

        let result = if cleaned.is_empty() {
            Err(CryptoError::MalformedKey("key is empty".into()))
        } else if cleaned.len() != ENCODED_KEY_LEN {
            Err(CryptoError::MalformedKey(format!(
                "expected {ENCODED_KEY_LEN} hex digits, got {}",
                cleaned.len()
            )))
        } else {
            let mut bytes = [0u8; KEY_SIZE];
            match hex::decode_to_slice(&cleaned, &mut bytes) {
                Ok(()) => Ok(Self { bytes }),
                Err(e) => {
                    bytes.zeroize();
                    Err(CryptoError::MalformedKey(e.to_string()))
                }
            }
        };
        cleaned.zeroize();
        result
    }

    /// Short colon-separated fingerprint, safe to display and log.
    pub fn fingerprint(&self) -> String {
        fingerprint_of(&self.bytes)
    }
}

impl PartialEq for KeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        self.bytes[..].ct_eq(&other.bytes[..]).into()
    }
}

impl Eq for KeyMaterial {}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("fingerprint", &self.fingerprint())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}
