//! Stirlitz CLI Library
//!
//! Command-line caller for the Stirlitz core: profile management, manual
//! key exchange and text/file encryption. Interactive input goes through
//! dialoguer; every command also runs non-interactively from flags and
//! environment variables.

pub mod context;
pub mod file_cmd;
pub mod key_cmd;
pub mod local_cmd;
pub mod oneshot;
pub mod profile_cmd;
pub mod prompt;
pub mod text_cmd;
