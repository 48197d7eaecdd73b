//! JSON State Documents
//!
//! Each governor component persists exactly one JSON document under the
//! workspace root. Loads never fail: a missing file is a fresh start and a
//! corrupt one is logged and replaced by the default state. Saves go through
//! a temp file and a rename so an interrupted write never leaves a torn file.

use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Directory (relative to the workspace) holding all state documents
pub const STATE_DIR: &str = "state";

pub const TRUST_FILE: &str = "trust.json";
pub const PROPOSALS_FILE: &str = "proposals.json";
pub const PROACTIVE_FILE: &str = "proactive.json";
pub const ACTION_LOG_FILE: &str = "action-log.json";
pub const THREADS_FILE: &str = "threads.json";

/// Persistence errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Absolute path of a state document inside `workspace`
pub fn state_path(workspace: &Path, file: &str) -> PathBuf {
    workspace.join(STATE_DIR).join(file)
}

/// Read a document, falling back to `T::default()` when absent or unreadable
pub fn load_document<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No state file, starting fresh");
            return T::default();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read state file, using defaults");
            return T::default();
        }
    };

    match serde_json::from_str(&raw) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Corrupt state file, using defaults");
            T::default()
        }
    }
}

/// Write a document atomically (temp file, then rename over the target)
pub fn save_document<T>(path: &Path, doc: &T) -> Result<(), StoreError>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let data = serde_json::to_string_pretty(doc)?;

    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, &data).map_err(|source| StoreError::Io {
        path: temp_path.clone(),
        source,
    })?;

    if let Err(source) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        });
    }

    debug!(path = %path.display(), bytes = data.len(), "State saved");
    Ok(())
}
