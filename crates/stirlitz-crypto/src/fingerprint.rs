//! Key fingerprints for out-of-band verification.
//!
//! A manual key exchange cannot authenticate the counterparty, so the only
//! protection against a swapped key is the two people comparing what they
//! derived. Fingerprints are short, one-way summaries of a key; the
//! "randomart" box (OpenSSH's drunken bishop walk) turns a fingerprint into
//! a picture that is easier to compare over a video call than hex.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Domain separation for fingerprints, so a fingerprint is never a plain
/// SHA-256 of key bytes.
const FINGERPRINT_DOMAIN: &[u8] = b"stirlitz-key-fingerprint-v1";

/// Number of digest bytes shown in a fingerprint.
const FINGERPRINT_BYTES: usize = 16;

/// Inner width of the randomart box.
const WIDTH: usize = 17;
/// Inner height of the randomart box.
const HEIGHT: usize = 9;

/// Cell glyphs by visit count. The last two are the start/end markers.
const GLYPHS: &[u8] = b" .o+=*BOX@%&#/^SE";

#[allow(clippy::cast_possible_truncation)] // GLYPHS.len() == 17
const START_MARKER: u8 = GLYPHS.len() as u8 - 2;
#[allow(clippy::cast_possible_truncation)] // GLYPHS.len() == 17
const END_MARKER: u8 = GLYPHS.len() as u8 - 1;

/// Colon-separated hex fingerprint of raw key bytes.
pub fn fingerprint_of(key_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(FINGERPRINT_DOMAIN);
    hasher.update(key_bytes);
    let digest = hasher.finalize();
    digest[..FINGERPRINT_BYTES]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Compare two strings (fingerprints, user names) without an early exit on
/// the first differing byte.
pub fn constant_time_str_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

/// Render a fingerprint as a bordered randomart box with `title` centred in
/// the top border.
pub fn fingerprint_randomart(fingerprint: &str, title: &str) -> String {
    let walk = Sha256::digest(fingerprint.as_bytes());

    let mut field = [[0u8; WIDTH]; HEIGHT];
    let (mut x, mut y) = (WIDTH / 2, HEIGHT / 2);

    for byte in &walk {
        for shift in (0..8).step_by(2) {
            let step = (byte >> shift) & 0b11;
            x = if step & 0b01 == 0 {
                x.saturating_sub(1)
            } else {
                (x + 1).min(WIDTH - 1)
            };
            y = if step & 0b10 == 0 {
                y.saturating_sub(1)
            } else {
                (y + 1).min(HEIGHT - 1)
            };
            if field[y][x] < START_MARKER - 1 {
                field[y][x] += 1;
            }
        }
    }

    field[HEIGHT / 2][WIDTH / 2] = START_MARKER;
    field[y][x] = END_MARKER;

    let title: String = title.chars().filter(char::is_ascii).take(WIDTH).collect();
    let pad_left = (WIDTH - title.len()) / 2;
    let pad_right = WIDTH - title.len() - pad_left;

    let mut lines = Vec::with_capacity(HEIGHT + 2);
    lines.push(format!(
        "+{}{title}{}+",
        "-".repeat(pad_left),
        "-".repeat(pad_right)
    ));
    for row in &field {
        let inner: String = row
            .iter()
            .map(|&cell| GLYPHS[usize::from(cell).min(GLYPHS.len() - 1)] as char)
            .collect();
        lines.push(format!("|{inner}|"));
    }
    lines.push(format!("+{}+", "-".repeat(WIDTH)));
    lines.join("\n")
}

/// Break a colon-separated fingerprint into lines of eight groups.
pub fn format_fingerprint_display(fingerprint: &str) -> String {
    let parts: Vec<&str> = fingerprint.split(':').collect();
    parts
        .chunks(8)
        .map(|chunk| chunk.join(":"))
        .collect::<Vec<_>>()
        .join("\n")
}
