//! Crash-safe file writes.
//!
//! Every durable write in Tidemark goes through these helpers: bytes land
//! in a `.tmp` sibling first and only an atomic rename makes them visible.
//! A crash at any point leaves either the old file or the new file intact,
//! never a torn one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Suffix for the staging file of an in-flight write.
pub const TMP_SUFFIX: &str = "tmp";

/// Suffix for the backup copy of the previous version.
pub const BAK_SUFFIX: &str = "bak";

/// Path of the staging sibling for `path` (`foo.json` -> `foo.json.tmp`).
pub fn tmp_path(path: &Path) -> PathBuf {
    sibling(path, TMP_SUFFIX)
}

/// Path of the backup sibling for `path` (`foo.json` -> `foo.json.bak`).
pub fn bak_path(path: &Path) -> PathBuf {
    sibling(path, BAK_SUFFIX)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Write `bytes` to `path` via temp-then-rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Write `bytes` to `path` via temp-then-rename, first copying any existing
/// target to its `.bak` sibling.
///
/// Protocol order matters: the temp file is fully written and synced before
/// the backup copy, and the backup copy completes before the rename. No
/// interleaving of a crash with these steps can leave `path` corrupt.
pub fn write_with_backup(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    if path.exists() {
        fs::copy(path, bak_path(path))?;
    }

    fs::rename(&tmp, path)?;
    Ok(())
}
