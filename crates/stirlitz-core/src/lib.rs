//! Stirlitz Core Library
//!
//! The engine behind the `stirlitz` caller:
//! - Password-protected profile store with atomic record writes
//! - Crypto jobs over text buffers and files, all-or-nothing output
//! - Per-profile job serialization
//! - Session state machine driving login, key exchange and crypto
//! - Configuration resolution, tracing setup and common error types

pub mod config;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod profile;
pub mod session;
pub mod tracing_init;

pub use config::Config;
pub use engine::{CryptoEngine, CryptoJob, JobKey, JobMode, JobOutput, JobStatus};
pub use error::{Error, ErrorKind, Result};
pub use jobs::{JobRegistry, JobSlot};
pub use profile::{Profile, ProfileStore};
pub use session::{JobHandle, SessionController, SessionState, SharedKeyPreview};
