//! Checkpoint file storage - gzip-compressed blobs, one per checkpoint id.
//!
//! Checkpoints are immutable once written, so there is no backup sibling;
//! writes still stage through `.tmp` so a crash never exposes a partial
//! file.

use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::atomic;
use crate::error::{Result, StorageError};

/// Low-level checkpoint blob store.
#[derive(Debug, Clone)]
pub struct CheckpointFileStore {
    dir: PathBuf,
}

impl CheckpointFileStore {
    /// Open a checkpoint store rooted at `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// File path for a checkpoint id.
    pub fn path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json.gz"))
    }

    /// Compress and store a checkpoint blob.
    pub fn save(&self, id: &str, data: &[u8]) -> Result<()> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        let compressed = encoder.finish()?;
        atomic::write_atomic(&self.path(id), &compressed)
    }

    /// Load and decompress a checkpoint blob.
    pub fn load(&self, id: &str) -> Result<Vec<u8>> {
        let path = self.path(id);
        if !path.exists() {
            return Err(StorageError::NotFound(path));
        }
        let compressed = fs::read(&path)?;
        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut data = Vec::new();
        decoder
            .read_to_end(&mut data)
            .map_err(|e| StorageError::corrupt(&path, e.to_string()))?;
        Ok(data)
    }

    /// Check whether a blob exists for `id`.
    pub fn exists(&self, id: &str) -> bool {
        self.path(id).exists()
    }

    /// Delete the blob for `id`. Returns true if it existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        match fs::remove_file(self.path(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = CheckpointFileStore::new(dir.path()).unwrap();

        let data = br#"{"metadata":{"id":"cp-1"},"session":{}}"#;
        store.save("cp-1", data).unwrap();

        let loaded = store.load("cp-1").unwrap();
        assert_eq!(loaded, data.to_vec());
    }

    #[test]
    fn test_blob_is_actually_compressed() {
        let dir = tempdir().unwrap();
        let store = CheckpointFileStore::new(dir.path()).unwrap();

        let data = vec![b'a'; 64 * 1024];
        store.save("cp-big", &data).unwrap();

        let on_disk = fs::metadata(store.path("cp-big")).unwrap().len();
        assert!(on_disk < data.len() as u64 / 10);
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let store = CheckpointFileStore::new(dir.path()).unwrap();

        let err = store.load("nope").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_load_garbage_is_corrupt() {
        let dir = tempdir().unwrap();
        let store = CheckpointFileStore::new(dir.path()).unwrap();

        fs::write(store.path("cp-bad"), b"not gzip at all").unwrap();

        let err = store.load("cp-bad").unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }

    #[test]
    fn test_delete() {
        let dir = tempdir().unwrap();
        let store = CheckpointFileStore::new(dir.path()).unwrap();

        store.save("cp-1", b"data").unwrap();
        assert!(store.exists("cp-1"));

        assert!(store.delete("cp-1").unwrap());
        assert!(!store.exists("cp-1"));
        assert!(!store.delete("cp-1").unwrap());
    }
}
