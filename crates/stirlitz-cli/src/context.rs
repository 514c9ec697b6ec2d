//! Shared state for one CLI invocation.

use std::path::PathBuf;
use std::sync::Arc;

use stirlitz_core::config::Config;
use stirlitz_core::{CryptoEngine, JobRegistry, ProfileStore, SessionController};

use crate::prompt;

/// Everything a subcommand needs to open sessions.
#[derive(Debug, Clone)]
pub struct CliContext {
    store: Arc<ProfileStore>,
    registry: JobRegistry,
    engine: CryptoEngine,
    /// Never prompt; read secrets from the environment instead.
    pub non_interactive: bool,
    /// Answer confirmations with yes.
    pub assume_yes: bool,
}

impl CliContext {
    /// Open the profile directory named by the configuration.
    pub fn open(config: &Config, non_interactive: bool, assume_yes: bool) -> anyhow::Result<Self> {
        let dir: PathBuf = config.store.profiles_dir.clone();
        let store = ProfileStore::open(&dir, config.kdf.params())
            .map_err(|e| anyhow::anyhow!("Cannot open profile directory {}: {e}", dir.display()))?;
        tracing::debug!(dir = %dir.display(), "Profile store opened");
        Ok(Self::with_store(
            store,
            CryptoEngine::from_config(config),
            non_interactive,
            assume_yes,
        ))
    }

    pub fn with_store(
        store: ProfileStore,
        engine: CryptoEngine,
        non_interactive: bool,
        assume_yes: bool,
    ) -> Self {
        Self {
            store: Arc::new(store),
            registry: JobRegistry::new(),
            engine,
            non_interactive,
            assume_yes,
        }
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    /// A fresh, unauthenticated session.
    pub fn session(&self) -> SessionController {
        SessionController::new(Arc::clone(&self.store), self.registry.clone(), self.engine)
    }

    /// A session logged into `profile`, asking for its password.
    pub async fn login(&self, profile: &str) -> anyhow::Result<SessionController> {
        let password = prompt::password(self.non_interactive, &format!("Password for {profile}"))?;
        let mut session = self.session();
        session.login(profile, &password).await?;
        Ok(session)
    }

    /// Ask for confirmation unless `--yes` was given.
    pub fn confirm(&self, question: &str) -> anyhow::Result<bool> {
        if self.assume_yes {
            return Ok(true);
        }
        prompt::confirm(self.non_interactive, question)
    }
}
