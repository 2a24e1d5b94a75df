// rust/segtrain-core/src/storage/local.rs

//! Local filesystem storage backend.
//!
//! Small files are read through a buffered reader. Files at or above the
//! configured threshold (large scans, checkpoints) are memory-mapped.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use super::traits::{ObjectMeta, StorageBackend, StorageReader, StorageWriter};
use crate::config::StorageConfig;
use crate::error::{Result, TrainError};

/// Local filesystem storage backend.
pub struct LocalStorage {
    /// Base path for relative paths.
    base_path: PathBuf,
    buffer_size: usize,
    use_mmap: bool,
    /// File size threshold at or above which reads use mmap.
    mmap_threshold: u64,
}

impl LocalStorage {
    /// Creates a new `LocalStorage` instance from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base path cannot be created.
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let base_path = config.base_path.clone();

        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(|e| {
                TrainError::storage_with_source(&base_path, "failed to create base directory", e)
            })?;
        }

        Ok(Self {
            base_path,
            buffer_size: config.buffer_size.max(1),
            use_mmap: config.use_mmap,
            mmap_threshold: config.mmap_threshold,
        })
    }

    /// Resolves a path relative to the base path.
    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }

    fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    TrainError::storage_with_source(parent, "failed to create parent directories", e)
                })?;
            }
        }
        Ok(())
    }
}

impl StorageBackend for LocalStorage {
    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.resolve_path(path).exists())
    }

    fn metadata(&self, path: &Path) -> Result<ObjectMeta> {
        let full_path = self.resolve_path(path);
        let meta = fs::metadata(&full_path).map_err(|e| {
            TrainError::storage_with_source(&full_path, "failed to read metadata", e)
        })?;

        Ok(ObjectMeta {
            size: meta.len(),
            modified: meta.modified().ok(),
            is_dir: meta.is_dir(),
        })
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>> {
        let full_path = self.resolve_path(path);
        let file = File::open(&full_path)
            .map_err(|e| TrainError::storage_with_source(&full_path, "failed to open file", e))?;

        let size = file
            .metadata()
            .map_err(|e| {
                TrainError::storage_with_source(&full_path, "failed to read file metadata", e)
            })?
            .len();

        if self.use_mmap && size > 0 && size >= self.mmap_threshold {
            // SAFETY: the file is opened read-only and the map lives as long
            // as the reader.
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| {
                TrainError::storage_with_source(&full_path, "failed to memory-map file", e)
            })?;
            Ok(Box::new(MmapReader { mmap, position: 0 }))
        } else {
            Ok(Box::new(LocalReader {
                reader: BufReader::with_capacity(self.buffer_size, file),
                size,
            }))
        }
    }

    fn open_write(&self, path: &Path) -> Result<Box<dyn StorageWriter>> {
        let full_path = self.resolve_path(path);
        Self::ensure_parent(&full_path)?;

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&full_path)
            .map_err(|e| TrainError::storage_with_source(&full_path, "failed to create file", e))?;

        Ok(Box::new(LocalWriter {
            writer: BufWriter::with_capacity(self.buffer_size, file),
            path: full_path,
        }))
    }

    fn open_append(&self, path: &Path) -> Result<Box<dyn StorageWriter>> {
        let full_path = self.resolve_path(path);
        Self::ensure_parent(&full_path)?;

        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&full_path)
            .map_err(|e| {
                TrainError::storage_with_source(&full_path, "failed to open file for appending", e)
            })?;

        Ok(Box::new(LocalWriter {
            writer: BufWriter::with_capacity(self.buffer_size, file),
            path: full_path,
        }))
    }

    fn delete(&self, path: &Path) -> Result<()> {
        let full_path = self.resolve_path(path);

        if full_path.is_dir() {
            fs::remove_dir_all(&full_path).map_err(|e| {
                TrainError::storage_with_source(&full_path, "failed to delete directory", e)
            })
        } else {
            fs::remove_file(&full_path).map_err(|e| {
                TrainError::storage_with_source(&full_path, "failed to delete file", e)
            })
        }
    }

    fn list(&self, prefix: &Path) -> Result<Vec<String>> {
        let full_path = self.resolve_path(prefix);

        if !full_path.exists() {
            return Ok(Vec::new());
        }
        if !full_path.is_dir() {
            return Err(TrainError::storage(&full_path, "path is not a directory"));
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&full_path).map_err(|e| {
            TrainError::storage_with_source(&full_path, "failed to read directory", e)
        })? {
            let entry = entry.map_err(|e| {
                TrainError::storage_with_source(&full_path, "failed to read directory entry", e)
            })?;
            if let Some(name) = entry.file_name().to_str() {
                entries.push(name.to_string());
            }
        }

        entries.sort();
        Ok(entries)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from_path = self.resolve_path(from);
        let to_path = self.resolve_path(to);
        Self::ensure_parent(&to_path)?;

        fs::rename(&from_path, &to_path).map_err(|e| {
            TrainError::storage_with_source(
                &from_path,
                format!("failed to rename to {}", to_path.display()),
                e,
            )
        })
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let full_path = self.resolve_path(path);
        fs::create_dir_all(&full_path).map_err(|e| {
            TrainError::storage_with_source(&full_path, "failed to create directories", e)
        })
    }
}

struct LocalReader {
    reader: BufReader<File>,
    size: u64,
}

impl Read for LocalReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

impl StorageReader for LocalReader {
    fn size(&self) -> u64 {
        self.size
    }
}

struct MmapReader {
    mmap: Mmap,
    position: usize,
}

impl Read for MmapReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = &self.mmap[self.position.min(self.mmap.len())..];
        let to_read = buf.len().min(remaining.len());
        buf[..to_read].copy_from_slice(&remaining[..to_read]);
        self.position += to_read;
        Ok(to_read)
    }
}

impl StorageReader for MmapReader {
    fn size(&self) -> u64 {
        self.mmap.len() as u64
    }
}

struct LocalWriter {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl Write for LocalWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl StorageWriter for LocalWriter {
    fn finish(mut self: Box<Self>) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| TrainError::storage_with_source(&self.path, "failed to flush writer", e))?;

        // Sync to disk
        self.writer.get_ref().sync_all().map_err(|e| {
            TrainError::storage_with_source(&self.path, "failed to sync file to disk", e)
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_storage() -> (LocalStorage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig {
            base_path: temp_dir.path().to_path_buf(),
            buffer_size: 4096,
            use_mmap: true,
            mmap_threshold: 1024, // Low threshold for testing
        };
        let storage = LocalStorage::new(&config).unwrap();
        (storage, temp_dir)
    }

    #[test]
    fn test_new_creates_base_dir() {
        let temp_dir = TempDir::new().unwrap();
        let new_base = temp_dir.path().join("run");

        let config = StorageConfig {
            base_path: new_base.clone(),
            ..Default::default()
        };

        let _storage = LocalStorage::new(&config).unwrap();
        assert!(new_base.exists());
    }

    #[test]
    fn test_exists() {
        let (storage, _temp) = create_test_storage();

        assert!(!storage.exists(Path::new("training.csv")).unwrap());
        storage
            .write_all(Path::new("training.csv"), b"p1/a.png,p1/b.png\n")
            .unwrap();
        assert!(storage.exists(Path::new("training.csv")).unwrap());
    }

    #[test]
    fn test_metadata() {
        let (storage, _temp) = create_test_storage();

        let data = b"hello world";
        storage.write_all(Path::new("test.txt"), data).unwrap();

        let meta = storage.metadata(Path::new("test.txt")).unwrap();
        assert_eq!(meta.size, data.len() as u64);
        assert!(!meta.is_dir);
        assert!(meta.modified.is_some());

        storage.create_dir_all(Path::new("subdir")).unwrap();
        assert!(storage.metadata(Path::new("subdir")).unwrap().is_dir);

        assert!(storage.metadata(Path::new("nonexistent.txt")).is_err());
    }

    #[test]
    fn test_write_and_read_small_file() {
        let (storage, _temp) = create_test_storage();

        let data = b"hello world";
        let mut writer = storage.open_write(Path::new("small.txt")).unwrap();
        writer.write_all(data).unwrap();
        writer.finish().unwrap();

        let mut reader = storage.open_read(Path::new("small.txt")).unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();

        assert_eq!(buf, data);
        assert_eq!(reader.size(), data.len() as u64);
    }

    #[test]
    fn test_write_and_read_large_file() {
        let (storage, _temp) = create_test_storage();

        // Above the 1024 byte mmap threshold
        let data: Vec<u8> = (0..2048).map(|i| (i % 256) as u8).collect();
        storage.write_all(Path::new("large.bin"), &data).unwrap();

        let reader = storage.open_read(Path::new("large.bin")).unwrap();
        assert_eq!(reader.size(), data.len() as u64);
        assert_eq!(storage.read_all(Path::new("large.bin")).unwrap(), data);
    }

    #[test]
    fn test_open_write_creates_parents() {
        let (storage, temp) = create_test_storage();

        storage
            .write_all(Path::new("run/nested/val.csv"), b"x,y\n")
            .unwrap();
        assert!(temp.path().join("run/nested/val.csv").exists());
    }

    #[test]
    fn test_open_append_keeps_content() {
        let (storage, _temp) = create_test_storage();

        let mut writer = storage.open_append(Path::new("run/log.csv")).unwrap();
        writer.write_all(b"a\n").unwrap();
        writer.finish().unwrap();

        let mut writer = storage.open_append(Path::new("run/log.csv")).unwrap();
        writer.write_all(b"b\n").unwrap();
        writer.finish().unwrap();

        assert_eq!(storage.read_all(Path::new("run/log.csv")).unwrap(), b"a\nb\n");
    }

    #[test]
    fn test_open_read_missing() {
        let (storage, _temp) = create_test_storage();
        assert!(storage.open_read(Path::new("missing.png")).is_err());
    }

    #[test]
    fn test_list() {
        let (storage, _temp) = create_test_storage();

        assert!(storage.list(Path::new("run")).unwrap().is_empty());

        storage.write_all(Path::new("run/b.ckpt"), b"b").unwrap();
        storage.write_all(Path::new("run/a.ckpt"), b"a").unwrap();

        assert_eq!(
            storage.list(Path::new("run")).unwrap(),
            vec!["a.ckpt".to_string(), "b.ckpt".to_string()]
        );
        assert!(storage.list(Path::new("run/a.ckpt")).is_err());
    }

    #[test]
    fn test_rename_and_delete() {
        let (storage, _temp) = create_test_storage();

        storage.write_all(Path::new(".x.tmp"), b"data").unwrap();
        storage
            .rename(Path::new(".x.tmp"), Path::new("ckpt/x"))
            .unwrap();

        assert!(!storage.exists(Path::new(".x.tmp")).unwrap());
        assert_eq!(storage.read_all(Path::new("ckpt/x")).unwrap(), b"data");

        storage.delete(Path::new("ckpt/x")).unwrap();
        assert!(!storage.exists(Path::new("ckpt/x")).unwrap());

        storage.delete(Path::new("ckpt")).unwrap();
        assert!(!storage.exists(Path::new("ckpt")).unwrap());
    }

    #[test]
    fn test_absolute_paths_bypass_base() {
        let (storage, _temp) = create_test_storage();
        let other = TempDir::new().unwrap();
        let abs = other.path().join("abs.txt");

        storage.write_all(&abs, b"abs").unwrap();
        assert!(abs.exists());
    }
}
