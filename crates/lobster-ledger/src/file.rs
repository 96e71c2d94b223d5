use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use lobster_types::{LobsterError, Result};

/// A JSON document on disk, replaced atomically on save (`.tmp` then rename).
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `None` if the file does not exist yet.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.storage("read", e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| self.storage("parse", e))
    }

    pub fn save<T: Serialize>(&self, value: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.storage("create directory for", e))?;
        }
        let content = serde_json::to_vec_pretty(value).map_err(|e| self.storage("serialize", e))?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content).map_err(|e| self.storage("write", e))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| self.storage("replace", e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn storage(&self, action: &str, e: impl std::fmt::Display) -> LobsterError {
        LobsterError::Storage(format!("failed to {action} {}: {e}", self.path.display()))
    }
}
