// rust/segtrain-core/src/checkpoint/writer.rs

//! Checkpoint writer implementation.

use std::hash::Hasher;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use twox_hash::XxHash64;

use crate::config::CheckpointConfig;
use crate::error::{Result, TrainError};
use crate::storage::StorageBackend;

use super::format::{checkpoint_file_name, parse_checkpoint_step, CheckpointHeader};

/// Writes checkpoints with compression and integrity verification.
///
/// The `CheckpointWriter` handles:
/// - Compressing data with configurable algorithms (none, lz4, zstd)
/// - Computing checksums for integrity verification
/// - Atomic writes (write to temp file then rename)
/// - Cleanup of old checkpoints
pub struct CheckpointWriter {
    storage: Arc<dyn StorageBackend>,
    dir: PathBuf,
    config: CheckpointConfig,
}

impl CheckpointWriter {
    pub fn new(storage: Arc<dyn StorageBackend>, dir: impl Into<PathBuf>, config: CheckpointConfig) -> Self {
        Self {
            storage,
            dir: dir.into(),
            config,
        }
    }

    /// Writes the checkpoint for `step` and returns its path.
    ///
    /// With atomic writes the file only appears under its final name once it
    /// is complete. Afterwards, checkpoints with a higher step are removed as
    /// left over from an abandoned run, then older ones beyond `keep_last_n`.
    /// The checkpoint just written is never removed.
    pub fn write(&self, step: u64, data: &[u8]) -> Result<PathBuf> {
        self.storage.create_dir_all(&self.dir)?;

        let checksum = calculate_checksum(data);
        let compressed = self.compress(data)?;
        let header = CheckpointHeader::new(
            step,
            self.config.compression.clone(),
            data.len() as u64,
            checksum,
        );

        let header_bytes = bincode::serialize(&header)
            .map_err(|e| TrainError::checkpoint_with_source("failed to serialize header", e))?;

        let header_len = u32::try_from(header_bytes.len())
            .map_err(|_| TrainError::checkpoint("checkpoint header too large"))?;
        let mut checkpoint_data = Vec::with_capacity(4 + header_bytes.len() + compressed.len());
        checkpoint_data.extend_from_slice(&header_len.to_le_bytes());
        checkpoint_data.extend_from_slice(&header_bytes);
        checkpoint_data.extend_from_slice(&compressed);

        let filename = checkpoint_file_name(&self.config.name, step);
        let final_path = self.dir.join(&filename);

        if self.config.atomic_writes {
            let temp_path = self.dir.join(format!(".{filename}.tmp"));
            self.storage.write_all(&temp_path, &checkpoint_data)?;
            self.storage.rename(&temp_path, &final_path)?;
        } else {
            self.storage.write_all(&final_path, &checkpoint_data)?;
        }

        self.cleanup_old_checkpoints(step)?;

        Ok(final_path)
    }

    /// Compresses data according to the configured algorithm.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self.config.compression.as_str() {
            "none" => Ok(data.to_vec()),
            "lz4" => Ok(lz4_flex::compress_prepend_size(data)),
            "zstd" => zstd::encode_all(data, self.config.compression_level)
                .map_err(|e| TrainError::checkpoint_with_source("zstd compression failed", e)),
            other => Err(TrainError::checkpoint(format!(
                "unknown compression algorithm: {other}"
            ))),
        }
    }

    /// Steps and paths of this writer's checkpoints, oldest first.
    pub fn list(&self) -> Result<Vec<(u64, PathBuf)>> {
        list_checkpoints(self.storage.as_ref(), &self.dir, &self.config.name)
    }

    /// Makes `current` the newest checkpoint and keeps at most `keep_last_n`.
    fn cleanup_old_checkpoints(&self, current: u64) -> Result<()> {
        let mut kept = Vec::new();
        for (step, path) in self.list()? {
            if step > current {
                tracing::warn!(step, current, path = %path.display(), "Removing checkpoint from a previous run");
                self.storage.delete(&path)?;
            } else {
                kept.push((step, path));
            }
        }

        let keep = self.config.keep_last_n.max(1);
        if kept.len() > keep {
            let to_delete = kept.len() - keep;
            for (step, path) in kept.iter().take(to_delete) {
                tracing::debug!(step, path = %path.display(), "Removing old checkpoint");
                self.storage.delete(path)?;
            }
        }
        Ok(())
    }
}

/// Checkpoints named `name` directly under `dir`, sorted by step.
pub(crate) fn list_checkpoints(
    storage: &dyn StorageBackend,
    dir: &Path,
    name: &str,
) -> Result<Vec<(u64, PathBuf)>> {
    let mut checkpoints: Vec<(u64, PathBuf)> = storage
        .list(dir)?
        .into_iter()
        .filter_map(|file| parse_checkpoint_step(name, &file).map(|step| (step, dir.join(file))))
        .collect();
    checkpoints.sort();
    Ok(checkpoints)
}

/// XXHash64 of `data` with seed 0.
pub(crate) fn calculate_checksum(data: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::storage::LocalStorage;
    use tempfile::TempDir;

    fn create_test_writer(compression: &str, keep_last_n: usize) -> (CheckpointWriter, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(
            LocalStorage::new(&StorageConfig {
                base_path: temp_dir.path().to_path_buf(),
                ..Default::default()
            })
            .unwrap(),
        );

        let config = CheckpointConfig {
            compression: compression.to_string(),
            compression_level: 3,
            keep_last_n,
            ..Default::default()
        };

        (CheckpointWriter::new(storage, "run", config), temp_dir)
    }

    #[test]
    fn test_write_creates_file() {
        let (writer, temp_dir) = create_test_writer("none", 3);

        let path = writer.write(250, b"state").unwrap();

        assert_eq!(path, Path::new("run/chkpt-250.ckpt"));
        assert!(temp_dir.path().join(&path).exists());
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let (writer, temp_dir) = create_test_writer("lz4", 3);
        writer.write(1, b"state").unwrap();

        let names: Vec<_> = std::fs::read_dir(temp_dir.path().join("run"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["chkpt-1.ckpt".to_string()]);
    }

    #[test]
    fn test_checksum_calculation() {
        assert_eq!(calculate_checksum(b"hello world"), calculate_checksum(b"hello world"));
        assert_ne!(calculate_checksum(b"hello world"), calculate_checksum(b"different data"));
    }

    #[test]
    fn test_compression_none() {
        let (writer, _temp) = create_test_writer("none", 3);
        let data = b"test data that won't be compressed";
        assert_eq!(writer.compress(data).unwrap(), data);
    }

    #[test]
    fn test_compression_lz4() {
        let (writer, _temp) = create_test_writer("lz4", 3);
        let data = b"test data for compression";
        let compressed = writer.compress(data).unwrap();
        assert_eq!(lz4_flex::decompress_size_prepended(&compressed).unwrap(), data);
    }

    #[test]
    fn test_compression_zstd() {
        let (writer, _temp) = create_test_writer("zstd", 3);
        let data = vec![42u8; 4096];
        let compressed = writer.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
    }

    #[test]
    fn test_unknown_compression() {
        let (writer, _temp) = create_test_writer("gzip", 3);
        assert!(writer.write(1, b"x").is_err());
    }

    #[test]
    fn test_cleanup_keeps_highest_steps() {
        let (writer, _temp) = create_test_writer("none", 2);

        // 1000 sorts before 250 as a string; cleanup must go by step
        for step in [250, 500, 750, 1000] {
            writer.write(step, b"state").unwrap();
        }

        let steps: Vec<u64> = writer.list().unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(steps, vec![750, 1000]);
    }

    #[test]
    fn test_write_below_existing_steps_survives() {
        let (writer, temp_dir) = create_test_writer("none", 5);
        for step in [5500, 5750, 6000, 6250, 6520] {
            writer.write(step, b"old run").unwrap();
        }

        let path = writer.write(250, b"new run").unwrap();

        assert!(temp_dir.path().join(&path).exists());
        let steps: Vec<u64> = writer.list().unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(steps, vec![250]);

        writer.write(500, b"new run").unwrap();
        let steps: Vec<u64> = writer.list().unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(steps, vec![250, 500]);
    }

    #[test]
    fn test_non_atomic_write() {
        let (writer, temp_dir) = create_test_writer("none", 3);
        let writer = CheckpointWriter {
            config: CheckpointConfig {
                atomic_writes: false,
                ..writer.config.clone()
            },
            ..writer
        };

        let path = writer.write(3, b"state").unwrap();
        assert!(temp_dir.path().join(path).exists());
    }
}
