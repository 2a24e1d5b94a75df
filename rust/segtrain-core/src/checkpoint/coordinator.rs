// rust/segtrain-core/src/checkpoint/coordinator.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::CheckpointConfig;
use crate::error::{Result, TrainError};
use crate::storage::StorageBackend;

use super::format::TrainingState;
use super::reader::CheckpointReader;
use super::writer::{list_checkpoints, CheckpointWriter};

/// Saves training state under a run directory and finds it again.
pub struct CheckpointCoordinator {
    storage: Arc<dyn StorageBackend>,
    dir: PathBuf,
    name: String,
    writer: CheckpointWriter,
    reader: CheckpointReader,
}

impl CheckpointCoordinator {
    pub fn new(storage: Arc<dyn StorageBackend>, dir: impl Into<PathBuf>, config: &CheckpointConfig) -> Self {
        let dir = dir.into();
        Self {
            writer: CheckpointWriter::new(storage.clone(), dir.clone(), config.clone()),
            reader: CheckpointReader::new(storage.clone()),
            name: config.name.clone(),
            storage,
            dir,
        }
    }

    /// Persists `state` as the checkpoint for `state.global_step`.
    ///
    /// Returns once the file is complete and visible under its final name.
    pub fn save(&self, state: &TrainingState) -> Result<PathBuf> {
        let payload = bincode::serialize(state)
            .map_err(|e| TrainError::checkpoint_with_source("failed to serialize training state", e))?;
        let path = self.writer.write(state.global_step, &payload)?;
        tracing::info!(step = state.global_step, "Checkpoint saved in: {}", path.display());
        Ok(path)
    }

    /// Step and path of the highest-step checkpoint, without verifying it.
    pub fn latest(&self) -> Result<Option<(u64, PathBuf)>> {
        Ok(list_checkpoints(self.storage.as_ref(), &self.dir, &self.name)?.pop())
    }

    /// Restores the newest checkpoint that passes verification.
    ///
    /// Checkpoints are tried from the highest step down; any that fail to
    /// read, decode or agree with their file name are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::NoCheckpoint`] when no valid checkpoint exists.
    pub fn resume(&self) -> Result<TrainingState> {
        let checkpoints = list_checkpoints(self.storage.as_ref(), &self.dir, &self.name)?;

        for (step, path) in checkpoints.into_iter().rev() {
            match self.load(step, &path) {
                Ok(state) => {
                    tracing::info!(step, "Restoring model from: {}", path.display());
                    return Ok(state);
                }
                Err(e) => {
                    tracing::warn!(step, path = %path.display(), error = %e, "Skipping unreadable checkpoint");
                }
            }
        }

        Err(TrainError::no_checkpoint(&self.dir))
    }

    fn load(&self, step: u64, path: &Path) -> Result<TrainingState> {
        let (header, payload) = self.reader.read(path)?;
        let state: TrainingState = bincode::deserialize(&payload)
            .map_err(|e| TrainError::checkpoint_with_source("failed to decode training state", e))?;

        if header.step != step || state.global_step != step {
            return Err(TrainError::checkpoint(format!(
                "file name says step {step}, header says {}, state says {}",
                header.step, state.global_step
            )));
        }
        Ok(state)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
