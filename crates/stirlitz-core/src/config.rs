//! Configuration resolution for Stirlitz.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`$XDG_CONFIG_HOME/stirlitz/settings.json`)
//! 3. Environment variables
//! 4. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use stirlitz_crypto::{DEFAULT_CHUNK_SIZE, KdfParams, clamp_chunk_size};

use crate::error::{Error, Result};

/// Complete Stirlitz configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub crypto: CryptoConfig,
    #[serde(default)]
    pub kdf: KdfConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Where profiles live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    pub profiles_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            profiles_dir: default_profiles_dir(),
        }
    }
}

/// Container settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CryptoConfig {
    /// Plaintext bytes per frame. Clamped to 4 KiB..=64 MiB when used.
    pub chunk_size: usize,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE as usize, // 1 MiB
        }
    }
}

impl CryptoConfig {
    pub fn effective_chunk_size(&self) -> usize {
        clamp_chunk_size(self.chunk_size) as usize
    }
}

/// Argon2id cost for new profiles and passphrase containers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KdfConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        let params = KdfParams::default();
        Self {
            memory_kib: params.memory_kib,
            iterations: params.iterations,
            parallelism: params.parallelism,
        }
    }
}

impl KdfConfig {
    pub const fn params(&self) -> KdfParams {
        KdfParams {
            memory_kib: self.memory_kib,
            iterations: self.iterations,
            parallelism: self.parallelism,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config() -> Result<Config> {
    load_config_from(global_config_path().as_deref(), |name| {
        std::env::var(name).ok()
    })
}

/// Resolve configuration from an explicit global file and environment
/// lookup. A missing file is not an error; an unreadable or invalid one is.
pub fn load_config_from<F>(global_path: Option<&Path>, env: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match global_path {
        Some(path) if path.exists() => load_config_file(path)?,
        _ => Config::default(),
    };
    apply_env_overrides(&mut config, env);
    config
        .kdf
        .params()
        .check_bounds()
        .map_err(|e| Error::Config(format!("kdf: {e}")))?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("stirlitz").join("settings.json"))
}

/// Default profile directory: the platform data dir (`$XDG_DATA_HOME` or
/// `~/.local/share` on Linux) plus `stirlitz/profiles`.
pub fn default_profiles_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("share")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stirlitz")
        .join("profiles")
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn apply_env_overrides<F>(config: &mut Config, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = env("STIRLITZ_PROFILES_DIR") {
        if !val.is_empty() {
            config.store.profiles_dir = PathBuf::from(val);
        }
    }
    if let Some(val) = env("STIRLITZ_CHUNK_SIZE") {
        if let Ok(n) = val.parse() {
            config.crypto.chunk_size = n;
        }
    }
    if let Some(val) = env("STIRLITZ_LOG_LEVEL") {
        config.log.level = val;
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn default_chunk_size_is_one_mib() {
        let config = Config::default();
        assert_eq!(config.crypto.chunk_size, 1024 * 1024);
        assert_eq!(config.crypto.effective_chunk_size(), 1024 * 1024);
    }

    #[test]
    fn default_kdf_matches_crypto_defaults() {
        assert_eq!(Config::default().kdf.params(), KdfParams::default());
    }

    #[test]
    fn default_profiles_dir_ends_with_stirlitz_profiles() {
        let dir = default_profiles_dir();
        assert!(dir.ends_with("stirlitz/profiles"));
    }

    #[test]
    fn chunk_size_is_clamped_when_used() {
        let crypto = CryptoConfig { chunk_size: 10 };
        assert_eq!(crypto.effective_chunk_size(), 4 * 1024);
        let crypto = CryptoConfig {
            chunk_size: usize::MAX,
        };
        assert_eq!(crypto.effective_chunk_size(), 64 * 1024 * 1024);
    }

    #[test]
    fn missing_global_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = load_config_from(Some(&tmp.path().join("absent.json")), no_env).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn partial_global_file_keeps_other_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, r#"{"kdf": {"iterations": 5}, "log": {"json": true}}"#).unwrap();

        let config = load_config_from(Some(&path), no_env).unwrap();
        assert_eq!(config.kdf.iterations, 5);
        assert_eq!(config.kdf.memory_kib, KdfParams::default().memory_kib);
        assert!(config.log.json);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.crypto, CryptoConfig::default());
    }

    #[test]
    fn invalid_global_file_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            load_config_from(Some(&path), no_env),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn out_of_range_kdf_cost_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        for body in [
            r#"{"kdf": {"iterations": 100}}"#,
            r#"{"kdf": {"parallelism": 0}}"#,
            r#"{"kdf": {"memory_kib": 4294967295}}"#,
        ] {
            std::fs::write(&path, body).unwrap();
            assert!(
                matches!(load_config_from(Some(&path), no_env), Err(Error::Config(_))),
                "{body} accepted"
            );
        }
    }

    #[test]
    fn env_overrides_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, r#"{"crypto": {"chunk_size": 8192}}"#).unwrap();

        let env: HashMap<&str, &str> = [
            ("STIRLITZ_PROFILES_DIR", "/tmp/stz"),
            ("STIRLITZ_CHUNK_SIZE", "65536"),
            ("STIRLITZ_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();
        let config =
            load_config_from(Some(&path), |k| env.get(k).map(ToString::to_string)).unwrap();
        assert_eq!(config.store.profiles_dir, PathBuf::from("/tmp/stz"));
        assert_eq!(config.crypto.chunk_size, 65536);
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn unparsable_env_chunk_size_is_ignored() {
        let config = load_config_from(None, |k| {
            (k == "STIRLITZ_CHUNK_SIZE").then(|| "lots".to_string())
        })
        .unwrap();
        assert_eq!(config.crypto.chunk_size, CryptoConfig::default().chunk_size);
    }
}
