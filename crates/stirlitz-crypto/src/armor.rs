//! Hex armor for ciphertext that travels as text.

use crate::error::CryptoError;

/// Lowercase hex of a container.
pub fn armor(container: &[u8]) -> String {
    hex::encode(container)
}

/// Decode armored text. Whitespace (line wraps from chat windows) is
/// ignored; anything that is not hex cannot be a ciphertext and is reported
/// as an authentication failure.
pub fn dearmor(text: &str) -> Result<Vec<u8>, CryptoError> {
    let cleaned: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    hex::decode(cleaned)
        .map_err(|e| CryptoError::AuthenticationFailed(format!("ciphertext is not hex: {e}")))
}
