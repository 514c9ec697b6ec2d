//! Stirlitz cryptographic primitives
//!
//! Everything the engine needs to turn a manually exchanged key into
//! authenticated ciphertext, with no storage or scheduling policy.
//!
//! ## Crypto primitives
//!
//! - **Keys**: 256-bit [`KeyMaterial`], exchanged as 64 hex characters
//! - **Exchange**: sorted key pair → HKDF-SHA256 → shared key
//! - **Passwords**: Argon2id → HKDF split into verifier and key-wrapping key
//! - **Encryption**: ChaCha20-Poly1305, chunked STREAM-style container
//!   (7-byte random prefix + 4-byte counter + last-chunk flag)

pub mod aead;
pub mod armor;
pub mod error;
pub mod exchange;
pub mod fingerprint;
pub mod key;
pub mod password;
pub mod stream;

pub use aead::{NONCE_SIZE, Sealed, TAG_SIZE, unwrap_key, wrap_key};
pub use armor::{armor, dearmor};
pub use error::CryptoError;
pub use exchange::{ExchangeSession, derive_shared_key, generate_own_key, parse_opponent_key};
pub use fingerprint::{
    constant_time_str_eq, fingerprint_of, fingerprint_randomart, format_fingerprint_display,
};
pub use key::{ENCODED_KEY_LEN, KEY_SIZE, KeyMaterial};
pub use password::{
    KdfParams, MAX_KDF_ITERATIONS, MAX_KDF_MEMORY_KIB, MAX_KDF_PARALLELISM, PasswordSecrets,
    SALT_SIZE, VERIFIER_SIZE, derive_passphrase_key, derive_password_secrets, generate_salt,
};
pub use stream::{
    DEFAULT_CHUNK_SIZE, Header, KeySource, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE, PassphraseParams,
    clamp_chunk_size, decrypt_from_slice, decrypt_stream, encrypt_stream, encrypt_to_vec,
};
