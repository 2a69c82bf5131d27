//! Engine configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Session lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Messages before `check_session_boundary` reports a split is due.
    pub max_messages_per_session: usize,
    /// Sessions held in the in-memory LRU cache.
    pub max_cached_sessions: usize,
    /// Seconds between auto-save flushes (0 disables the loop).
    pub autosave_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_messages_per_session: 5000,
            max_cached_sessions: 20,
            autosave_interval_secs: 60,
        }
    }
}

/// Context window settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContextConfig {
    /// Model-supplied total context ceiling.
    pub max_tokens: usize,
    /// Floor guaranteed to the system category.
    pub system_min_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: 150_000,
            system_min_tokens: 1000,
        }
    }
}

/// Checkpointing and retention settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CheckpointConfig {
    pub enabled: bool,
    /// Checkpoint every N eligible messages.
    pub frequency: u64,
    /// Keep every auto checkpoint newer than this many hours.
    pub keep_all_hours: i64,
    /// Among older auto checkpoints, keep every Nth (oldest-first count).
    pub keep_every_nth: usize,
    /// Auto checkpoints older than this are always deleted.
    pub max_age_days: i64,
    /// Hard cap on surviving auto checkpoints.
    pub max_auto_checkpoints: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frequency: 1,
            keep_all_hours: 24,
            keep_every_nth: 10,
            max_age_days: 30,
            max_auto_checkpoints: 1000,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Workspace directory; sessions and checkpoints live underneath.
    pub workspace: PathBuf,
    pub session: SessionConfig,
    pub context: ContextConfig,
    pub checkpoint: CheckpointConfig,
}

impl EngineConfig {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file. Missing keys take defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn conversations_dir(&self) -> PathBuf {
        self.workspace.join("conversations")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.workspace.join("checkpoints")
    }
}
