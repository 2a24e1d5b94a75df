// rust/segtrain-core/src/checkpoint/reader.rs

//! Checkpoint reader implementation.

use std::path::Path;
use std::sync::Arc;

use crate::error::{Result, TrainError};
use crate::storage::StorageBackend;

use super::format::CheckpointHeader;
use super::writer::calculate_checksum;

/// Reads and verifies checkpoints.
pub struct CheckpointReader {
    storage: Arc<dyn StorageBackend>,
}

impl CheckpointReader {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Reads and decompresses a checkpoint, verifying its integrity.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read
    /// - The header is truncated, has the wrong magic or an unknown version
    /// - Decompression fails
    /// - The checksum or size doesn't match
    pub fn read(&self, path: &Path) -> Result<(CheckpointHeader, Vec<u8>)> {
        let checkpoint_data = self.storage.read_all(path)?;

        if checkpoint_data.len() < 4 {
            return Err(TrainError::checkpoint(format!(
                "checkpoint file too small: {}",
                path.display()
            )));
        }
        let (len_bytes, rest) = checkpoint_data.split_at(4);
        let header_len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;

        if rest.len() < header_len {
            return Err(TrainError::checkpoint(format!(
                "checkpoint file truncated: header incomplete in {}",
                path.display()
            )));
        }
        let (header_bytes, compressed) = rest.split_at(header_len);

        let header: CheckpointHeader = bincode::deserialize(header_bytes)
            .map_err(|e| TrainError::checkpoint_with_source("failed to deserialize header", e))?;

        if !header.validate_magic() {
            return Err(TrainError::checkpoint(format!(
                "invalid magic bytes: expected {:?}, got {:?}",
                CheckpointHeader::MAGIC,
                header.magic
            )));
        }
        if !header.validate_version() {
            return Err(TrainError::checkpoint(format!(
                "unsupported version: expected {}, got {}",
                CheckpointHeader::VERSION,
                header.version
            )));
        }

        let decompressed = decompress(compressed, &header.compression)?;

        if decompressed.len() as u64 != header.uncompressed_size {
            return Err(TrainError::checkpoint(format!(
                "size mismatch: expected {}, got {}",
                header.uncompressed_size,
                decompressed.len()
            )));
        }

        let computed_checksum = calculate_checksum(&decompressed);
        if computed_checksum != header.checksum {
            return Err(TrainError::checkpoint(format!(
                "checksum mismatch: expected {}, got {}",
                header.checksum, computed_checksum
            )));
        }

        Ok((header, decompressed))
    }
}

fn decompress(data: &[u8], compression: &str) -> Result<Vec<u8>> {
    match compression {
        "none" => Ok(data.to_vec()),
        "lz4" => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| TrainError::checkpoint_with_source("lz4 decompression failed", e)),
        "zstd" => zstd::decode_all(data)
            .map_err(|e| TrainError::checkpoint_with_source("zstd decompression failed", e)),
        _ => Err(TrainError::checkpoint(format!(
            "unknown compression algorithm: {compression}"
        ))),
    }
}
