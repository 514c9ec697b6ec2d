//! Crypto job description and status.

use std::fmt;
use std::path::PathBuf;

use stirlitz_crypto::KeyMaterial;
use zeroize::Zeroizing;

use crate::error::ErrorKind;

/// Direction of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobMode {
    Encrypt,
    Decrypt,
}

impl fmt::Display for JobMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encrypt => f.write_str("encrypt"),
            Self::Decrypt => f.write_str("decrypt"),
        }
    }
}

/// Where a job reads from.
pub enum JobSource {
    Buffer(Zeroizing<Vec<u8>>),
    File(PathBuf),
}

/// Where a job writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTarget {
    Buffer,
    File(PathBuf),
}

/// The key a job runs under.
pub enum JobKey {
    /// An exchanged key, owned by the job for its duration.
    Key(KeyMaterial),
    /// Derive the key from user name and password. Encryption picks a fresh
    /// salt; decryption reads salt and cost from the container.
    Passphrase {
        user_name: String,
        password: Zeroizing<String>,
    },
}

/// Lifecycle of a job: `Pending → Running → Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    /// Plaintext bytes processed so far.
    Running { bytes: u64 },
    Completed,
    Failed(ErrorKind),
}

impl JobStatus {
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

/// What a completed job produced.
pub enum JobOutput {
    Buffer(Zeroizing<Vec<u8>>),
    File(PathBuf),
}

impl fmt::Debug for JobOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(buf) => write!(f, "Buffer({} bytes)", buf.len()),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

/// One encrypt or decrypt request.
pub struct CryptoJob {
    pub(crate) mode: JobMode,
    pub(crate) source: JobSource,
    pub(crate) target: JobTarget,
    pub(crate) key: JobKey,
    pub(crate) status: JobStatus,
}

impl CryptoJob {
    pub const fn new(mode: JobMode, source: JobSource, target: JobTarget, key: JobKey) -> Self {
        Self {
            mode,
            source,
            target,
            key,
            status: JobStatus::Pending,
        }
    }

    /// File to file.
    pub fn file(mode: JobMode, src: impl Into<PathBuf>, dst: impl Into<PathBuf>, key: JobKey) -> Self {
        Self::new(
            mode,
            JobSource::File(src.into()),
            JobTarget::File(dst.into()),
            key,
        )
    }

    /// Memory to memory.
    pub fn buffer(mode: JobMode, data: Vec<u8>, key: JobKey) -> Self {
        Self::new(
            mode,
            JobSource::Buffer(Zeroizing::new(data)),
            JobTarget::Buffer,
            key,
        )
    }

    pub const fn mode(&self) -> JobMode {
        self.mode
    }

    pub const fn status(&self) -> JobStatus {
        self.status
    }

    pub const fn target(&self) -> &JobTarget {
        &self.target
    }
}

impl fmt::Debug for CryptoJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            JobSource::Buffer(buf) => format!("buffer ({} bytes)", buf.len()),
            JobSource::File(path) => path.display().to_string(),
        };
        let key = match &self.key {
            JobKey::Key(k) => k.fingerprint(),
            JobKey::Passphrase { user_name, .. } => format!("passphrase of {user_name}"),
        };
        f.debug_struct("CryptoJob")
            .field("mode", &self.mode)
            .field("source", &source)
            .field("target", &self.target)
            .field("key", &key)
            .field("status", &self.status)
            .finish()
    }
}
