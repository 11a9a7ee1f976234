//! Where trained parameters go when a run completes.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Result, TrainError};

/// Persists a model's exported parameters under a name.
pub trait CheckpointStore: Send + Sync {
    /// Stores `payload` under `name` and returns where it landed.
    fn save(&self, name: &str, payload: &str) -> Result<PathBuf>;
}

/// One `<name>.json` file per artifact inside a directory.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    dir: PathBuf,
}

impl JsonDirStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        JsonDirStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        // Reject empty names and path traversal.
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(TrainError::Checkpoint(format!("invalid artifact name '{}'", name)));
        }
        Ok(self.dir.join(format!("{}.json", name)))
    }
}

impl CheckpointStore for JsonDirStore {
    fn save(&self, name: &str, payload: &str) -> Result<PathBuf> {
        let path = self.path_for(name)?;
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            TrainError::Checkpoint(format!("could not create '{}': {}", self.dir.display(), e))
        })?;
        // Write to a sibling temp file first so a crash never leaves a torn artifact.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, payload)
            .and_then(|_| std::fs::rename(&tmp, &path))
            .map_err(|e| TrainError::Checkpoint(format!("could not write '{}': {}", path.display(), e)))?;
        info!(path = %path.display(), bytes = payload.len(), "Saved checkpoint");
        Ok(path)
    }
}
