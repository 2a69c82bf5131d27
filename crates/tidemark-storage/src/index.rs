//! Whole-map JSON index files.
//!
//! Both the session index and the checkpoint index are small maps rewritten
//! in full on every change, using the same temp-then-rename discipline as
//! the data files. A missing index reads as empty.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::atomic::write_atomic;
use crate::error::{Result, StorageError};

/// Read an index file into a map. A missing file yields an empty map.
pub fn read_index<T: DeserializeOwned>(path: &Path) -> Result<BTreeMap<String, T>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| StorageError::corrupt(path, e.to_string()))
}

/// Atomically replace an index file with the given map.
pub fn write_index<T: Serialize>(path: &Path, entries: &BTreeMap<String, T>) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(entries)
        .map_err(|e| StorageError::corrupt(path, e.to_string()))?;
    write_atomic(path, &bytes)
}
