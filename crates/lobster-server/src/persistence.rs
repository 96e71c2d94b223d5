use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use lobster_dispatch::Endpoint;
use lobster_ledger::JsonFile;
use lobster_types::{Quote, Task};

/// Marketplace state besides the ledger, which keeps its own snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistedState {
    pub tasks: Vec<Task>,
    pub quotes: Vec<Quote>,
    pub endpoints: Vec<Endpoint>,
}

/// `state.json` in the state directory.
pub struct StateFile {
    file: JsonFile,
}

impl StateFile {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            file: JsonFile::new(state_dir.join("state.json")),
        }
    }

    /// Empty state if none was saved yet.
    pub fn load(&self) -> Result<PersistedState> {
        let state = self.file.load().context("Failed to load marketplace state")?;
        Ok(state.unwrap_or_default())
    }

    pub fn save(&self, state: &PersistedState) -> Result<()> {
        self.file
            .save(state)
            .context("Failed to save marketplace state")
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}
