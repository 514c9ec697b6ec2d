//! Error types for the Stirlitz core library.

use stirlitz_crypto::CryptoError;
use thiserror::Error;

/// Result type alias using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types. Every operation reports one of these; none is
/// swallowed.
#[derive(Debug, Error)]
pub enum Error {
    /// A required field (name, user name, password) was empty.
    #[error("Required field is empty: {0}")]
    EmptyField(&'static str),

    #[error("Passwords are not equal")]
    PasswordMismatch,

    #[error("Profile already exists: {0}")]
    ProfileExists(String),

    /// Unknown profile or wrong password. Deliberately does not say which.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Profile not found: {0}")]
    NotFound(String),

    #[error("Malformed key: {0}")]
    MalformedKey(String),

    /// Integrity check failed while decrypting.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Source and destination are the same file: {0}")]
    PathCollision(String),

    /// Another job is already running for this profile.
    #[error("A job is already running for profile {0}")]
    Busy(String),

    #[error("Operation cancelled")]
    Cancelled,

    /// The profile has no stored key yet; a key exchange is required.
    #[error("Profile {0} has no key; run a key exchange first")]
    MissingKey(String),

    /// Operation not allowed in the current session state.
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// Key derivation or encryption failed for a reason other than bad
    /// input (e.g. invalid KDF parameters).
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// A persisted profile record could not be understood.
    #[error("Corrupt profile record: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Copyable discriminant of [`Error`], for callers that map failures to
/// their own messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    EmptyField,
    PasswordMismatch,
    ProfileExists,
    InvalidCredentials,
    NotFound,
    MalformedKey,
    AuthenticationFailed,
    InvalidPath,
    SourceNotFound,
    PathCollision,
    Busy,
    Cancelled,
    MissingKey,
    InvalidState,
    Crypto,
    Storage,
    Config,
    Io,
}

impl Error {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyField(_) => ErrorKind::EmptyField,
            Self::PasswordMismatch => ErrorKind::PasswordMismatch,
            Self::ProfileExists(_) => ErrorKind::ProfileExists,
            Self::InvalidCredentials => ErrorKind::InvalidCredentials,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::MalformedKey(_) => ErrorKind::MalformedKey,
            Self::AuthenticationFailed(_) => ErrorKind::AuthenticationFailed,
            Self::InvalidPath(_) => ErrorKind::InvalidPath,
            Self::SourceNotFound(_) => ErrorKind::SourceNotFound,
            Self::PathCollision(_) => ErrorKind::PathCollision,
            Self::Busy(_) => ErrorKind::Busy,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::MissingKey(_) => ErrorKind::MissingKey,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::Crypto(_) => ErrorKind::Crypto,
            Self::Storage(_) | Self::Json(_) => ErrorKind::Storage,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

impl From<CryptoError> for Error {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::MalformedKey(msg) => Self::MalformedKey(msg),
            CryptoError::InvalidKeyLength { expected, actual } => {
                Self::MalformedKey(format!("expected {expected} bytes, got {actual}"))
            }
            CryptoError::AuthenticationFailed(msg) => Self::AuthenticationFailed(msg),
            CryptoError::Cancelled => Self::Cancelled,
            CryptoError::IoError(e) => Self::Io(e),
            CryptoError::EncryptionFailed(msg) | CryptoError::KeyDerivationFailed(msg) => {
                Self::Crypto(msg)
            }
        }
    }
}
