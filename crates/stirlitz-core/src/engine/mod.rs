//! Crypto engine: runs encrypt/decrypt jobs over buffers and files.
//!
//! Text and file jobs share one code path; only the reader and writer
//! differ. File output is streamed into a temporary file next to the
//! destination and renamed over it only after the last chunk verified, so a
//! failed or cancelled job leaves the destination exactly as it was.
//!
//! Everything here blocks. The session controller runs it on tokio's
//! blocking pool.

mod job;

use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use stirlitz_crypto::{
    CryptoError, Header, KdfParams, KeyMaterial, PassphraseParams, armor, dearmor,
    decrypt_stream, derive_passphrase_key, encrypt_stream, generate_salt,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

pub use job::{CryptoJob, JobKey, JobMode, JobOutput, JobSource, JobStatus, JobTarget};

use crate::config::Config;
use crate::error::{Error, Result};

/// Stateless job runner configured with chunk size and KDF cost.
#[derive(Debug, Clone, Copy)]
pub struct CryptoEngine {
    chunk_size: usize,
    kdf: KdfParams,
}

impl CryptoEngine {
    /// `chunk_size` is clamped when a container is built; `kdf` is the cost
    /// for new passphrase containers.
    pub const fn new(chunk_size: usize, kdf: KdfParams) -> Self {
        Self { chunk_size, kdf }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.crypto.effective_chunk_size(), config.kdf.params())
    }

    /// Check a job before anything is opened for writing.
    ///
    /// Order: [`Error::InvalidPath`], then [`Error::SourceNotFound`], then
    /// [`Error::PathCollision`]. A passphrase encryption whose configured
    /// KDF cost no reader would accept fails with [`Error::Config`].
    pub fn validate(&self, job: &CryptoJob) -> Result<()> {
        let src = match &job.source {
            JobSource::File(path) => Some(path.as_path()),
            JobSource::Buffer(_) => None,
        };

        if src.is_some_and(|p| p.as_os_str().is_empty()) {
            return Err(Error::InvalidPath("source path is empty".into()));
        }
        if let JobTarget::File(dst) = &job.target {
            validate_destination(dst)?;
        }

        if let Some(src) = src {
            match fs::metadata(src) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(Error::SourceNotFound(src.display().to_string()));
                }
                Err(e) => return Err(e.into()),
                Ok(meta) if meta.is_dir() => {
                    return Err(Error::InvalidPath(format!(
                        "{} is a directory",
                        src.display()
                    )));
                }
                Ok(_) => {}
            }
            File::open(src)?;

            if let JobTarget::File(dst) = &job.target {
                if same_file(src, dst)? {
                    return Err(Error::PathCollision(dst.display().to_string()));
                }
            }
        }

        if job.mode == JobMode::Encrypt && matches!(job.key, JobKey::Passphrase { .. }) {
            self.kdf
                .check_bounds()
                .map_err(|e| Error::Config(format!("passphrase key derivation: {e}")))?;
        }
        Ok(())
    }

    /// Run a job to completion, updating its status.
    ///
    /// `cancel` is checked before starting and at every chunk boundary;
    /// `progress` receives the running plaintext byte count.
    pub fn run<F>(
        &self,
        job: &mut CryptoJob,
        cancel: &CancellationToken,
        mut progress: F,
    ) -> Result<JobOutput>
    where
        F: FnMut(u64),
    {
        job.status = JobStatus::Running { bytes: 0 };
        let mut processed = 0;
        let result = self.execute(job, cancel, &mut |n| {
            processed = n;
            progress(n);
        });

        match &result {
            Ok(_) => {
                job.status = JobStatus::Completed;
                info!(mode = %job.mode, bytes = processed, "Crypto job completed");
            }
            Err(e) => {
                job.status = JobStatus::Failed(e.kind());
                warn!(mode = %job.mode, error = %e, "Crypto job failed");
            }
        }
        result
    }

    /// Encrypt text and armor the container as hex.
    pub fn encrypt_text(&self, key: JobKey, text: &str) -> Result<String> {
        let job = CryptoJob::buffer(JobMode::Encrypt, text.as_bytes().to_vec(), key);
        let container = self.run_buffer(job)?;
        Ok(armor(&container))
    }

    /// Decrypt hex-armored text. Plaintext that is not UTF-8 is reported as
    /// an I/O error of kind `InvalidData`.
    pub fn decrypt_text(&self, key: JobKey, armored: &str) -> Result<Zeroizing<String>> {
        let container = dearmor(armored)?;
        let mut plaintext = self.run_buffer(CryptoJob::buffer(JobMode::Decrypt, container, key))?;
        match String::from_utf8(std::mem::take(&mut *plaintext)) {
            Ok(text) => Ok(Zeroizing::new(text)),
            Err(e) => {
                e.into_bytes().zeroize();
                Err(Error::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "decrypted text is not valid UTF-8",
                )))
            }
        }
    }

    fn run_buffer(&self, mut job: CryptoJob) -> Result<Zeroizing<Vec<u8>>> {
        match self.run(&mut job, &CancellationToken::new(), |_| {})? {
            JobOutput::Buffer(buf) => Ok(buf),
            JobOutput::File(path) => Err(Error::InvalidState(format!(
                "buffer job wrote to {}",
                path.display()
            ))),
        }
    }

    fn execute(
        &self,
        job: &CryptoJob,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(u64),
    ) -> Result<JobOutput> {
        self.validate(job)?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut on_chunk = |n: u64| {
            if cancel.is_cancelled() {
                return Err(CryptoError::Cancelled);
            }
            debug!(bytes = n, "Chunk processed");
            progress(n);
            Ok(())
        };

        let reader: Box<dyn Read + '_> = match &job.source {
            JobSource::Buffer(buf) => Box::new(&buf[..]),
            JobSource::File(path) => Box::new(BufReader::new(File::open(path)?)),
        };

        match &job.target {
            JobTarget::Buffer => {
                let mut out = Zeroizing::new(Vec::new());
                self.transform(job.mode, &job.key, reader, &mut *out, &mut on_chunk)?;
                Ok(JobOutput::Buffer(out))
            }
            JobTarget::File(dst) => {
                let mut tmp = tempfile::Builder::new()
                    .prefix(".stirlitz-")
                    .suffix(".part")
                    .tempfile_in(destination_dir(dst))?;
                let mut writer = BufWriter::new(tmp.as_file_mut());
                self.transform(job.mode, &job.key, reader, &mut writer, &mut on_chunk)?;
                writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
                tmp.as_file().sync_all()?;
                tmp.persist(dst).map_err(|e| Error::Io(e.error))?;
                Ok(JobOutput::File(dst.clone()))
            }
        }
    }

    fn transform<W: Write>(
        &self,
        mode: JobMode,
        key: &JobKey,
        mut reader: Box<dyn Read + '_>,
        writer: &mut W,
        on_chunk: &mut dyn FnMut(u64) -> std::result::Result<(), CryptoError>,
    ) -> Result<u64> {
        match mode {
            JobMode::Encrypt => {
                let (key, header): (Cow<'_, KeyMaterial>, Header) = match key {
                    JobKey::Key(k) => (Cow::Borrowed(k), Header::for_profile(self.chunk_size)),
                    JobKey::Passphrase {
                        user_name,
                        password,
                    } => {
                        let params = PassphraseParams {
                            salt: generate_salt(),
                            kdf: self.kdf,
                        };
                        let k =
                            derive_passphrase_key(user_name, password, &params.salt, &params.kdf)?;
                        (
                            Cow::Owned(k),
                            Header::for_passphrase(self.chunk_size, params),
                        )
                    }
                };
                Ok(encrypt_stream(&key, &header, reader, writer, |n| {
                    on_chunk(n)
                })?)
            }
            JobMode::Decrypt => {
                let header = Header::read_from(&mut reader)?;
                let key: Cow<'_, KeyMaterial> = match (key, header.passphrase()) {
                    (JobKey::Key(k), None) => Cow::Borrowed(k),
                    (
                        JobKey::Passphrase {
                            user_name,
                            password,
                        },
                        Some(params),
                    ) => Cow::Owned(derive_passphrase_key(
                        user_name,
                        password,
                        &params.salt,
                        &params.kdf,
                    )?),
                    (JobKey::Key(_), Some(_)) => {
                        return Err(Error::AuthenticationFailed(
                            "container was sealed with a passphrase".into(),
                        ));
                    }
                    (JobKey::Passphrase { .. }, None) => {
                        return Err(Error::AuthenticationFailed(
                            "container was sealed with a profile key".into(),
                        ));
                    }
                };
                Ok(decrypt_stream(&key, &header, &mut reader, writer, |n| {
                    on_chunk(n)
                })?)
            }
        }
    }
}

fn validate_destination(dst: &Path) -> Result<()> {
    if dst.as_os_str().is_empty() {
        return Err(Error::InvalidPath("destination path is empty".into()));
    }
    if dst.file_name().is_none() || dst.is_dir() {
        return Err(Error::InvalidPath(format!(
            "{} is not a file path",
            dst.display()
        )));
    }
    let dir = destination_dir(dst);
    if !dir.is_dir() {
        return Err(Error::InvalidPath(format!(
            "directory {} does not exist",
            dir.display()
        )));
    }
    Ok(())
}

fn destination_dir(dst: &Path) -> &Path {
    dst.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Whether `dst` names the same file as the existing `src`, through
/// relative paths, symlinks or (on Unix) hard links.
fn same_file(src: &Path, dst: &Path) -> Result<bool> {
    if src == dst {
        return Ok(true);
    }
    let src_canon = fs::canonicalize(src)?;
    let dst_canon = match fs::canonicalize(dst) {
        Ok(p) => p,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let dir = fs::canonicalize(destination_dir(dst))?;
            match dst.file_name() {
                Some(name) => dir.join(name),
                None => PathBuf::from(dst),
            }
        }
        Err(e) => return Err(e.into()),
    };
    if src_canon == dst_canon {
        return Ok(true);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if let Ok(dst_meta) = fs::metadata(dst) {
            let src_meta = fs::metadata(src)?;
            return Ok(src_meta.dev() == dst_meta.dev() && src_meta.ino() == dst_meta.ino());
        }
    }
    Ok(false)
}
