//! Per-profile job serialization.
//!
//! At most one crypto job runs per profile. A second claim while the first
//! slot is alive fails fast with [`Error::Busy`]; nothing is queued.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::{Error, Result};

/// Registry of profiles with a running job. Cheap to clone; clones share
/// state, so one registry per process serializes every controller.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    active: Arc<Mutex<HashSet<String>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `key`, or fail with `Busy` if it is taken.
    pub fn try_claim(&self, key: &str) -> Result<JobSlot> {
        if !self.lock().insert(key.to_string()) {
            debug!(slot = key, "Job slot busy");
            return Err(Error::Busy(key.to_string()));
        }
        Ok(JobSlot {
            registry: self.clone(),
            key: key.to_string(),
        })
    }

    pub fn is_busy(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set stays consistent even if a holder panicked.
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A claimed job slot, released on drop.
#[derive(Debug)]
pub struct JobSlot {
    registry: JobRegistry,
    key: String,
}

impl JobSlot {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for JobSlot {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.key);
    }
}
