//! Manual key exchange.
//!
//! Each party generates an own key and sends its text encoding to the other
//! side by whatever channel they trust (chat, paper, phone). Each side then
//! enters the counterpart's key as the opponent key. Both combine the pair
//! after sorting it, so the side that plays "own" and the side that plays
//! "opponent" arrive at the same shared key.
//!
//! Nothing here authenticates the counterparty. Comparing the fingerprint
//! of the previewed shared key out-of-band is the only check against a
//! substituted key, and committing it is the caller's decision.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::key::{KEY_SIZE, KeyMaterial};

/// HKDF salt for shared key derivation.
const HKDF_SALT: &[u8] = b"stirlitz-exchange-hkdf-salt-v1";

/// HKDF info string for shared key derivation.
const HKDF_INFO: &[u8] = b"stirlitz-shared-key-v1";

/// Combine two exchange keys into the shared key.
///
/// The pair is put in canonical (lexicographic) order first, so
/// `derive_shared_key(a, b) == derive_shared_key(b, a)`. Identical keys are
/// rejected: that happens when a user pastes their own key back in.
pub fn derive_shared_key(
    own: &KeyMaterial,
    opponent: &KeyMaterial,
) -> Result<KeyMaterial, CryptoError> {
    if own == opponent {
        return Err(CryptoError::MalformedKey(
            "opponent key is identical to own key".into(),
        ));
    }

    let (first, second) = if own.as_bytes() <= opponent.as_bytes() {
        (own, opponent)
    } else {
        (opponent, own)
    };

    let mut ikm = [0u8; KEY_SIZE * 2];
    ikm[..KEY_SIZE].copy_from_slice(first.as_bytes());
    ikm[KEY_SIZE..].copy_from_slice(second.as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), &ikm);
    ikm.zeroize();

    let mut okm = [0u8; KEY_SIZE];
    hk.expand(HKDF_INFO, &mut okm)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    let shared = KeyMaterial::from_bytes(okm);
    okm.zeroize();
    Ok(shared)
}

/// One exchange attempt.
///
/// Holds the locally generated own key and, once entered, the opponent key.
/// Dropping the session discards both.
#[derive(Debug)]
pub struct ExchangeSession {
    own: KeyMaterial,
    opponent: Option<KeyMaterial>,
}

impl Default for ExchangeSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ExchangeSession {
    /// Start an exchange with a freshly generated own key.
    pub fn new() -> Self {
        Self::with_own_key(generate_own_key())
    }

    /// Start an exchange with a caller-supplied own key.
    pub const fn with_own_key(own: KeyMaterial) -> Self {
        Self {
            own,
            opponent: None,
        }
    }

    /// Our key, to be sent to the counterpart.
    pub const fn own_key(&self) -> &KeyMaterial {
        &self.own
    }

    /// Text form of our key.
    pub fn own_key_encoded(&self) -> String {
        self.own.encode()
    }

    /// The opponent key, if one has been accepted.
    pub const fn opponent_key(&self) -> Option<&KeyMaterial> {
        self.opponent.as_ref()
    }

    /// Decode and validate the counterpart's key.
    ///
    /// On error any previously accepted opponent key is kept.
    pub fn set_opponent_key(&mut self, encoded: &str) -> Result<&KeyMaterial, CryptoError> {
        let opponent = parse_opponent_key(encoded)?;
        if opponent == self.own {
            return Err(CryptoError::MalformedKey(
                "opponent key is identical to own key".into(),
            ));
        }
        Ok(self.opponent.insert(opponent))
    }

    /// Derive the shared key without consuming the session.
    ///
    /// Returns `None` until an opponent key has been accepted.
    pub fn preview(&self) -> Option<Result<KeyMaterial, CryptoError>> {
        self.opponent
            .as_ref()
            .map(|opponent| derive_shared_key(&self.own, opponent))
    }
}

/// Generate an own key from the OS CSPRNG.
pub fn generate_own_key() -> KeyMaterial {
    KeyMaterial::generate()
}

/// Decode an opponent key from its pasted text form.
pub fn parse_opponent_key(encoded: &str) -> Result<KeyMaterial, CryptoError> {
    KeyMaterial::decode(encoded)
}
