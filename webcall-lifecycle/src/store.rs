//! Persisted lifecycle state
//!
//! Survives process restarts so a crashed daemon resumes the user's intent.
//! Written whenever the connect intent or the keep-awake totals change.

use crate::keepalive::KeepAliveAccounting;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// State that outlives the process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Whether a live session is wanted
    #[serde(default)]
    pub connect_wanted: bool,
    /// Cookie header value sent with the login exchange
    #[serde(default)]
    pub cookies: Option<String>,
    /// Sleep-lock accounting
    #[serde(default)]
    pub keep_awake: KeepAliveAccounting,
    /// Version of the client that wrote this state
    #[serde(default)]
    pub app_version: String,
}

impl PersistedState {
    /// Reset version-scoped data if the state was written by another version.
    /// Returns true if anything changed.
    pub fn migrate(&mut self, version: &str) -> bool {
        if self.app_version == version {
            return false;
        }
        info!(
            "Client version changed ({} -> {}), resetting keep-awake accounting",
            if self.app_version.is_empty() { "none" } else { self.app_version.as_str() },
            version
        );
        self.app_version = version.to_string();
        self.keep_awake.reset();
        true
    }
}

/// Key/value persistence used by the lifecycle manager
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<PersistedState>;
    fn save(&self, state: &PersistedState) -> Result<()>;
}

/// JSON file store
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    /// Store state in `lifecycle_state.json` inside `state_dir`
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            path: state_dir.as_ref().join("lifecycle_state.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> Result<PersistedState> {
        if !self.path.exists() {
            debug!("No persisted lifecycle state at {}", self.path.display());
            return Ok(PersistedState::default());
        }

        let data = fs::read_to_string(&self.path)?;
        match serde_json::from_str(&data) {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!(
                    "Ignoring unreadable lifecycle state {}: {}",
                    self.path.display(),
                    e
                );
                Ok(PersistedState::default())
            }
        }
    }

    fn save(&self, state: &PersistedState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;

        debug!("Persisted lifecycle state to {}", self.path.display());
        Ok(())
    }
}

/// In-memory store for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<PersistedState>,
}

impl MemoryStateStore {
    pub fn new(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Copy of the last saved state
    pub fn snapshot(&self) -> PersistedState {
        match self.state.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<PersistedState> {
        Ok(self.snapshot())
    }

    fn save(&self, state: &PersistedState) -> Result<()> {
        match self.state.lock() {
            Ok(mut current) => *current = state.clone(),
            Err(poisoned) => *poisoned.into_inner() = state.clone(),
        }
        Ok(())
    }
}
