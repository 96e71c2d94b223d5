use std::path::Path;

use serde::{Deserialize, Serialize};

use lobster_types::{Result, Wallet};

use crate::entry::{LedgerEntry, OpReceipt};
use crate::file::JsonFile;

/// Point-in-time export of the ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub wallets: Vec<Wallet>,
    /// Journals of all accounts, each account's entries oldest first.
    pub entries: Vec<LedgerEntry>,
    pub receipts: Vec<OpReceipt>,
}

/// The ledger snapshot in the state directory.
pub struct SnapshotFile {
    file: JsonFile,
}

impl SnapshotFile {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            file: JsonFile::new(state_dir.join("ledger.json")),
        }
    }

    /// Empty snapshot if none was saved yet.
    pub fn load(&self) -> Result<LedgerSnapshot> {
        Ok(self.file.load()?.unwrap_or_default())
    }

    pub fn save(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        self.file.save(snapshot)
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}
