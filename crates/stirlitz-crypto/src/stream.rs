//! Chunked authenticated encryption over `Read`/`Write`.
//!
//! Container layout:
//!
//! ```text
//! header  = "STZ" | version u8 | key-source u8 | chunk_size u32 LE
//!           | nonce_prefix [7] | passphrase params (passphrase containers only)
//! params  = salt [16] | memory_kib u32 LE | iterations u32 LE | parallelism u32 LE
//! frame*  = len u32 LE | ciphertext+tag (len bytes)
//! nonce_i = nonce_prefix [7] | i u32 BE | last u8
//! ```
//!
//! Every frame is sealed with the whole header as associated data. The
//! nonce prefix is random per container, the counter orders frames within
//! it, and the last-flag byte makes truncation detectable. Plaintext never
//! needs to fit in memory: at most one chunk is buffered at a time.

use std::io::{self, Read, Write};

use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::aead::{NONCE_SIZE, TAG_SIZE, cipher_for};
use crate::error::CryptoError;
use crate::key::KeyMaterial;
use crate::password::{KdfParams, SALT_SIZE};

/// Container magic.
pub const MAGIC: &[u8; 3] = b"STZ";

/// Current container version.
pub const VERSION: u8 = 1;

/// Default plaintext chunk size (1 MiB).
pub const DEFAULT_CHUNK_SIZE: u32 = 1024 * 1024;

/// Smallest accepted chunk size (4 KiB).
pub const MIN_CHUNK_SIZE: u32 = 4 * 1024;

/// Largest accepted chunk size (64 MiB).
pub const MAX_CHUNK_SIZE: u32 = 64 * 1024 * 1024;

const NONCE_PREFIX_SIZE: usize = 7;
const FIXED_HEADER_LEN: usize = MAGIC.len() + 1 + 1 + 4 + NONCE_PREFIX_SIZE;
const PASSPHRASE_PARAMS_LEN: usize = SALT_SIZE + 3 * 4;

/// Clamp a configured chunk size into the accepted range.
pub fn clamp_chunk_size(requested: usize) -> u32 {
    u32::try_from(requested)
        .unwrap_or(MAX_CHUNK_SIZE)
        .clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
}

/// Where the container's key comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// A profile's stored (exchanged) key.
    Profile,
    /// A key derived from user name and password; the salt travels in the
    /// header.
    Passphrase,
}

impl KeySource {
    const fn to_byte(self) -> u8 {
        match self {
            Self::Profile => 0,
            Self::Passphrase => 1,
        }
    }

    fn from_byte(b: u8) -> Result<Self, CryptoError> {
        match b {
            0 => Ok(Self::Profile),
            1 => Ok(Self::Passphrase),
            other => Err(CryptoError::AuthenticationFailed(format!(
                "unknown key source {other}"
            ))),
        }
    }
}

/// Key derivation inputs stored in a passphrase container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassphraseParams {
    pub salt: [u8; SALT_SIZE],
    pub kdf: KdfParams,
}

impl PassphraseParams {
    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.kdf.memory_kib.to_le_bytes());
        out.extend_from_slice(&self.kdf.iterations.to_le_bytes());
        out.extend_from_slice(&self.kdf.parallelism.to_le_bytes());
    }

    fn parse(raw: &[u8; PASSPHRASE_PARAMS_LEN]) -> Result<Self, CryptoError> {
        let word = |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&raw[..SALT_SIZE]);
        let kdf = KdfParams {
            memory_kib: word(SALT_SIZE),
            iterations: word(SALT_SIZE + 4),
            parallelism: word(SALT_SIZE + 8),
        };
        // A forged header must not make decryption allocate gigabytes.
        kdf.check_bounds().map_err(|_| {
            CryptoError::AuthenticationFailed("unacceptable key derivation parameters".into())
        })?;
        Ok(Self { salt, kdf })
    }
}

/// Parsed or freshly built container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    chunk_size: u32,
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
    passphrase: Option<PassphraseParams>,
}

impl Header {
    /// Header for a container sealed with a profile key.
    pub fn for_profile(chunk_size: usize) -> Self {
        Self::build(chunk_size, None)
    }

    /// Header for a passphrase container, recording how its key was
    /// derived.
    pub fn for_passphrase(chunk_size: usize, params: PassphraseParams) -> Self {
        Self::build(chunk_size, Some(params))
    }

    fn build(chunk_size: usize, passphrase: Option<PassphraseParams>) -> Self {
        let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
        OsRng.fill_bytes(&mut nonce_prefix);
        Self {
            chunk_size: clamp_chunk_size(chunk_size),
            nonce_prefix,
            passphrase,
        }
    }

    pub const fn key_source(&self) -> KeySource {
        if self.passphrase.is_some() {
            KeySource::Passphrase
        } else {
            KeySource::Profile
        }
    }

    pub const fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Salt and KDF cost for passphrase containers.
    pub const fn passphrase(&self) -> Option<&PassphraseParams> {
        self.passphrase.as_ref()
    }

    /// Serialized form; also the associated data of every frame.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FIXED_HEADER_LEN + PASSPHRASE_PARAMS_LEN);
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        out.push(self.key_source().to_byte());
        out.extend_from_slice(&self.chunk_size.to_le_bytes());
        out.extend_from_slice(&self.nonce_prefix);
        if let Some(params) = &self.passphrase {
            params.write_to(&mut out);
        }
        out
    }

    /// Read and validate a header from the start of a container.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, CryptoError> {
        let mut fixed = [0u8; FIXED_HEADER_LEN];
        read_exact_or_auth(reader, &mut fixed, "truncated header")?;

        if &fixed[..3] != MAGIC {
            return Err(CryptoError::AuthenticationFailed(
                "not a stirlitz container".into(),
            ));
        }
        if fixed[3] != VERSION {
            return Err(CryptoError::AuthenticationFailed(format!(
                "unsupported container version {}",
                fixed[3]
            )));
        }
        let key_source = KeySource::from_byte(fixed[4])?;
        let chunk_size = u32::from_le_bytes([fixed[5], fixed[6], fixed[7], fixed[8]]);
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
            return Err(CryptoError::AuthenticationFailed(format!(
                "invalid chunk size {chunk_size}"
            )));
        }
        let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
        nonce_prefix.copy_from_slice(&fixed[9..]);

        let passphrase = match key_source {
            KeySource::Profile => None,
            KeySource::Passphrase => {
                let mut raw = [0u8; PASSPHRASE_PARAMS_LEN];
                read_exact_or_auth(reader, &mut raw, "truncated header")?;
                Some(PassphraseParams::parse(&raw)?)
            }
        };

        Ok(Self {
            chunk_size,
            nonce_prefix,
            passphrase,
        })
    }

    fn nonce(&self, index: u32, last: bool) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[..NONCE_PREFIX_SIZE].copy_from_slice(&self.nonce_prefix);
        nonce[NONCE_PREFIX_SIZE..NONCE_SIZE - 1].copy_from_slice(&index.to_be_bytes());
        nonce[NONCE_SIZE - 1] = u8::from(last);
        nonce
    }
}

/// Splits a reader into fixed-size plaintext chunks, flagging the last one.
///
/// Always yields at least one chunk: empty input is a single empty, last
/// chunk. When the input is an exact multiple of the chunk size the final
/// full chunk carries the flag.
pub struct Chunks<R> {
    reader: R,
    chunk_size: usize,
    pending: Option<Zeroizing<Vec<u8>>>,
    finished: bool,
}

impl<R: Read> Chunks<R> {
    pub const fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size,
            pending: None,
            finished: false,
        }
    }

    fn fill(&mut self) -> io::Result<Zeroizing<Vec<u8>>> {
        let mut buf = Zeroizing::new(vec![0u8; self.chunk_size]);
        let mut filled = 0;
        while filled < self.chunk_size {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn advance(&mut self) -> io::Result<(Zeroizing<Vec<u8>>, bool)> {
        let current = match self.pending.take() {
            Some(chunk) => chunk,
            None => self.fill()?,
        };
        if current.len() < self.chunk_size {
            return Ok((current, true));
        }
        let next = self.fill()?;
        if next.is_empty() {
            Ok((current, true))
        } else {
            self.pending = Some(next);
            Ok((current, false))
        }
    }
}

impl<R: Read> Iterator for Chunks<R> {
    type Item = io::Result<(Zeroizing<Vec<u8>>, bool)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let item = self.advance();
        match &item {
            Ok((_, true)) | Err(_) => self.finished = true,
            Ok((_, false)) => {}
        }
        Some(item)
    }
}

/// Encrypt everything `reader` yields into `writer` as one container.
///
/// `on_chunk` is called after each frame with the running plaintext byte
/// count; returning an error (typically [`CryptoError::Cancelled`]) stops
/// the stream. Returns the total plaintext length.
pub fn encrypt_stream<R, W, F>(
    key: &KeyMaterial,
    header: &Header,
    reader: R,
    writer: &mut W,
    mut on_chunk: F,
) -> Result<u64, CryptoError>
where
    R: Read,
    W: Write,
    F: FnMut(u64) -> Result<(), CryptoError>,
{
    let aad = header.to_bytes();
    writer.write_all(&aad)?;

    let cipher = cipher_for(key);
    let mut processed: u64 = 0;
    let mut index: u32 = 0;

    for chunk in Chunks::new(reader, header.chunk_size as usize) {
        let (plaintext, last) = chunk?;
        let nonce = header.nonce(index, last);
        let frame = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: &aad,
                },
            )
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        let len = u32::try_from(frame.len())
            .map_err(|_| CryptoError::EncryptionFailed("frame too large".into()))?;
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(&frame)?;

        processed += plaintext.len() as u64;
        on_chunk(processed)?;

        if !last {
            index = index
                .checked_add(1)
                .ok_or_else(|| CryptoError::EncryptionFailed("stream too long".into()))?;
        }
    }

    writer.flush()?;
    Ok(processed)
}

/// Decrypt the frames following `header` (already consumed from `reader`).
///
/// Plaintext is written chunk by chunk as frames verify, so on error the
/// writer may hold a verified prefix; callers that need all-or-nothing
/// output must write to a temporary target.
pub fn decrypt_stream<R, W, F>(
    key: &KeyMaterial,
    header: &Header,
    reader: &mut R,
    writer: &mut W,
    mut on_chunk: F,
) -> Result<u64, CryptoError>
where
    R: Read,
    W: Write,
    F: FnMut(u64) -> Result<(), CryptoError>,
{
    let aad = header.to_bytes();
    let cipher = cipher_for(key);
    let full_frame = header.chunk_size as usize + TAG_SIZE;
    let mut frame = Vec::with_capacity(full_frame);
    let mut processed: u64 = 0;
    let mut index: u32 = 0;

    loop {
        let mut len_bytes = [0u8; 4];
        read_exact_or_auth(reader, &mut len_bytes, "missing final chunk")?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        if !(TAG_SIZE..=full_frame).contains(&len) {
            return Err(CryptoError::AuthenticationFailed(format!(
                "invalid frame length {len}"
            )));
        }

        frame.resize(len, 0);
        read_exact_or_auth(reader, &mut frame, "truncated frame")?;

        // Only a full frame can be followed by another one.
        let (plaintext, last) = if len < full_frame {
            (open_frame(&cipher, header, index, true, &frame, &aad)?, true)
        } else {
            match open_frame(&cipher, header, index, false, &frame, &aad) {
                Ok(pt) => (pt, false),
                Err(_) => (open_frame(&cipher, header, index, true, &frame, &aad)?, true),
            }
        };

        writer.write_all(&plaintext)?;
        processed += plaintext.len() as u64;
        on_chunk(processed)?;

        if last {
            break;
        }
        index = index
            .checked_add(1)
            .ok_or_else(|| CryptoError::AuthenticationFailed("too many frames".into()))?;
    }

    let mut trailing = [0u8; 1];
    loop {
        match reader.read(&mut trailing) {
            Ok(0) => break,
            Ok(_) => {
                return Err(CryptoError::AuthenticationFailed(
                    "trailing data after final chunk".into(),
                ));
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }

    writer.flush()?;
    Ok(processed)
}

/// Encrypt an in-memory buffer into a complete container.
pub fn encrypt_to_vec(
    key: &KeyMaterial,
    header: &Header,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let mut out = Vec::with_capacity(plaintext.len() + FIXED_HEADER_LEN + 64);
    encrypt_stream(key, header, plaintext, &mut out, |_| Ok(()))?;
    Ok(out)
}

/// Decrypt a complete in-memory container.
pub fn decrypt_from_slice(
    key: &KeyMaterial,
    container: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let mut reader = container;
    let header = Header::read_from(&mut reader)?;
    let mut out = Zeroizing::new(Vec::with_capacity(container.len()));
    decrypt_stream(key, &header, &mut reader, &mut *out, |_| Ok(()))?;
    Ok(out)
}

fn open_frame(
    cipher: &ChaCha20Poly1305,
    header: &Header,
    index: u32,
    last: bool,
    frame: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let nonce = header.nonce(index, last);
    cipher
        .decrypt(Nonce::from_slice(&nonce), Payload { msg: frame, aad })
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::AuthenticationFailed(format!("chunk {index} did not verify")))
}

fn read_exact_or_auth<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    what: &str,
) -> Result<(), CryptoError> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            CryptoError::AuthenticationFailed(what.into())
        } else {
            CryptoError::IoError(e)
        }
    })
}
