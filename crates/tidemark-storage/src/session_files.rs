//! Session file storage - byte-level API for session persistence.
//!
//! One file per session (`<id>.json`), a `.bak` sibling holding the
//! previous version, and a transient `.tmp` staging file. Load falls back
//! from primary to backup at the call site; this layer only distinguishes
//! missing from unreadable.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::atomic::{self, write_with_backup};
use crate::error::{Result, StorageError};

/// Low-level session file store with byte-level API.
#[derive(Debug, Clone)]
pub struct SessionFileStore {
    dir: PathBuf,
}

impl SessionFileStore {
    /// Open a session store rooted at `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Primary file path for a session id.
    pub fn path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Store raw session data with backup of the previous version.
    pub fn save(&self, id: &str, data: &[u8]) -> Result<()> {
        write_with_backup(&self.path(id), data)
    }

    /// Read raw session data from the primary file.
    pub fn load(&self, id: &str) -> Result<Vec<u8>> {
        let path = self.path(id);
        if !path.exists() {
            return Err(StorageError::NotFound(path));
        }
        Ok(fs::read(path)?)
    }

    /// Read raw session data from the backup file.
    pub fn load_backup(&self, id: &str) -> Result<Vec<u8>> {
        let path = atomic::bak_path(&self.path(id));
        if !path.exists() {
            return Err(StorageError::NotFound(path));
        }
        Ok(fs::read(path)?)
    }

    /// Copy the backup over the primary file after a successful backup load.
    pub fn restore_backup(&self, id: &str) -> Result<()> {
        let primary = self.path(id);
        let backup = atomic::bak_path(&primary);
        fs::copy(&backup, &primary)?;
        debug!(session_id = %id, "restored session primary from backup");
        Ok(())
    }

    /// Check whether a primary file exists for `id`.
    pub fn exists(&self, id: &str) -> bool {
        self.path(id).exists()
    }

    /// Remove all on-disk artifacts (primary, backup, staging) for `id`.
    ///
    /// Returns true if the primary file existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let primary = self.path(id);
        let existed = primary.exists();
        for path in [
            primary.clone(),
            atomic::bak_path(&primary),
            atomic::tmp_path(&primary),
        ] {
            remove_if_present(&path)?;
        }
        Ok(existed)
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
