// rust/segtrain-core/src/checkpoint/format.rs

//! Checkpoint file format.
//!
//! ```text
//! +------------------------+
//! | Header Length (4 bytes)|  <- u32 little-endian
//! +------------------------+
//! | Header (bincode)       |  <- CheckpointHeader
//! +------------------------+
//! | Compressed Payload     |  <- bincode TrainingState, compressed per header
//! +------------------------+
//! ```
//!
//! Files are named `<name>-<step>.ckpt`, so the step can be recovered from a
//! directory listing without opening anything.

use serde::{Deserialize, Serialize};

/// Header for a checkpoint file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointHeader {
    /// Magic bytes identifying this as a checkpoint file ("SGCK")
    pub magic: [u8; 4],
    /// Format version number
    pub version: u32,
    /// Global step the checkpoint was taken at
    pub step: u64,
    /// Compression algorithm used ("none", "lz4", or "zstd")
    pub compression: String,
    /// Size of the payload before compression
    pub uncompressed_size: u64,
    /// XXHash64 checksum of the uncompressed payload
    pub checksum: u64,
}

impl CheckpointHeader {
    pub const MAGIC: [u8; 4] = *b"SGCK";

    pub const VERSION: u32 = 1;

    pub fn new(step: u64, compression: String, uncompressed_size: u64, checksum: u64) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            step,
            compression,
            uncompressed_size,
            checksum,
        }
    }

    pub fn validate_magic(&self) -> bool {
        self.magic == Self::MAGIC
    }

    pub fn validate_version(&self) -> bool {
        self.version == Self::VERSION
    }
}

/// Everything needed to continue a run: the step counter plus the model and
/// optimizer state, each as the opaque bytes their owners produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingState {
    pub global_step: u64,
    pub model: Vec<u8>,
    pub optimizer: Vec<u8>,
}

pub(crate) const EXTENSION: &str = ".ckpt";

/// File name of the checkpoint for `step`.
pub fn checkpoint_file_name(name: &str, step: u64) -> String {
    format!("{name}-{step}{EXTENSION}")
}

/// Step encoded in a checkpoint file name, if `file_name` is one of `name`'s
/// checkpoints. Temporary files (leading `.`) never match.
pub fn parse_checkpoint_step(name: &str, file_name: &str) -> Option<u64> {
    if file_name.starts_with('.') {
        return None;
    }
    let step = file_name
        .strip_prefix(name)?
        .strip_prefix('-')?
        .strip_suffix(EXTENSION)?;
    if step.is_empty() || !step.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    step.parse().ok()
}
