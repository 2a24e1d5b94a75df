// rust/segtrain-core/src/summary.rs

//! Structured records emitted by the training loop.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::error::{Result, TrainError};
use crate::storage::{StorageBackend, StorageWriter};

pub const TRAINING_LOGISTIC_LOSS: &str = "training/logistic_loss";
pub const TRAINING_LOSS: &str = "training/loss";
pub const VALIDATION_LOGISTIC_LOSS: &str = "val/logistic_loss";

/// File name of the CSV summary log inside the run directory.
pub const SUMMARY_FILE: &str = "summaries.csv";

#[derive(Debug, Clone, PartialEq)]
pub enum SummaryRecord {
    /// `tag -> value @ step`
    Scalar { tag: String, step: u64, value: f64 },
    /// A checkpoint for `step` was stored at `path`.
    Checkpoint { step: u64, path: PathBuf },
}

impl SummaryRecord {
    pub fn scalar(tag: impl Into<String>, step: u64, value: f64) -> Self {
        Self::Scalar {
            tag: tag.into(),
            step,
            value,
        }
    }

    pub fn step(&self) -> u64 {
        match self {
            Self::Scalar { step, .. } | Self::Checkpoint { step, .. } => *step,
        }
    }
}

/// Destination for summary records.
pub trait SummarySink: Send {
    fn record(&mut self, record: SummaryRecord) -> Result<()>;

    /// Pushes buffered records to their destination.
    fn flush(&mut self) -> Result<()>;
}

#[derive(Serialize)]
struct Row<'a> {
    wall_time: f64,
    step: u64,
    tag: &'a str,
    value: String,
}

/// Writes records as `wall_time,step,tag,value` rows.
///
/// Checkpoint records use the tag `checkpoint` and the stored path as value.
/// An existing file is kept and appended to, so a resumed run continues the
/// same log.
pub struct CsvSummaryWriter {
    writer: csv::Writer<Box<dyn StorageWriter>>,
    path: PathBuf,
}

impl CsvSummaryWriter {
    pub fn open(storage: &dyn StorageBackend, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let is_new = !storage.exists(&path)? || storage.metadata(&path)?.size == 0;
        let inner = storage.open_append(&path)?;

        let writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(inner);

        Ok(Self { writer, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SummarySink for CsvSummaryWriter {
    fn record(&mut self, record: SummaryRecord) -> Result<()> {
        let wall_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();

        let row = match &record {
            SummaryRecord::Scalar { tag, step, value } => Row {
                wall_time,
                step: *step,
                tag,
                value: value.to_string(),
            },
            SummaryRecord::Checkpoint { step, path } => Row {
                wall_time,
                step: *step,
                tag: "checkpoint",
                value: path.display().to_string(),
            },
        };

        self.writer
            .serialize(row)
            .map_err(|e| TrainError::serialization(format!("failed to write summary row: {e}")))
    }

    fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| TrainError::storage_with_source(&self.path, "failed to flush summaries", e))
    }
}

/// Keeps records in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySummarySink {
    records: Arc<Mutex<Vec<SummaryRecord>>>,
    flushes: Arc<Mutex<usize>>,
}

impl MemorySummarySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SummaryRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `(step, value)` of every scalar with `tag`, in emission order.
    pub fn scalars(&self, tag: &str) -> Vec<(u64, f64)> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                SummaryRecord::Scalar { tag: t, step, value } if t == tag => Some((step, value)),
                _ => None,
            })
            .collect()
    }

    pub fn checkpoints(&self) -> Vec<(u64, PathBuf)> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                SummaryRecord::Checkpoint { step, path } => Some((step, path)),
                SummaryRecord::Scalar { .. } => None,
            })
            .collect()
    }

    /// How many times the sink was flushed.
    pub fn flush_count(&self) -> usize {
        *self.flushes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SummarySink for MemorySummarySink {
    fn record(&mut self, record: SummaryRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        *self.flushes.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::storage::LocalStorage;
    use tempfile::TempDir;

    fn storage() -> (LocalStorage, TempDir) {
        let temp = TempDir::new().unwrap();
        let storage = LocalStorage::new(&StorageConfig {
            base_path: temp.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();
        (storage, temp)
    }

    fn read_rows(storage: &LocalStorage) -> Vec<Vec<String>> {
        let bytes = storage.read_all(Path::new("run/summaries.csv")).unwrap();
        csv::Reader::from_reader(bytes.as_slice())
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn test_csv_writer_rows() {
        let (storage, _temp) = storage();
        let mut sink = CsvSummaryWriter::open(&storage, "run/summaries.csv").unwrap();

        sink.record(SummaryRecord::scalar(TRAINING_LOSS, 0, 0.5)).unwrap();
        sink.record(SummaryRecord::Checkpoint {
            step: 1,
            path: PathBuf::from("run/chkpt-1.ckpt"),
        })
        .unwrap();
        sink.flush().unwrap();

        let rows = read_rows(&storage);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1..], ["0", "training/loss", "0.5"]);
        assert_eq!(rows[1][1..], ["1", "checkpoint", "run/chkpt-1.ckpt"]);
        assert!(rows[0][0].parse::<f64>().unwrap() > 0.0);
    }

    #[test]
    fn test_csv_writer_appends_on_reopen() {
        let (storage, _temp) = storage();
        {
            let mut sink = CsvSummaryWriter::open(&storage, "run/summaries.csv").unwrap();
            sink.record(SummaryRecord::scalar(VALIDATION_LOGISTIC_LOSS, 1, 0.7))
                .unwrap();
            sink.flush().unwrap();
        }
        let mut sink = CsvSummaryWriter::open(&storage, "run/summaries.csv").unwrap();
        sink.record(SummaryRecord::scalar(VALIDATION_LOGISTIC_LOSS, 100, 0.6))
            .unwrap();
        sink.flush().unwrap();

        let text = String::from_utf8(storage.read_all(Path::new("run/summaries.csv")).unwrap()).unwrap();
        assert_eq!(text.matches("wall_time").count(), 1);

        let steps: Vec<String> = read_rows(&storage).into_iter().map(|r| r[1].clone()).collect();
        assert_eq!(steps, vec!["1", "100"]);
    }

    #[test]
    fn test_flushed_rows_reach_disk_while_open() {
        let (storage, _temp) = storage();
        let mut sink = CsvSummaryWriter::open(&storage, "run/summaries.csv").unwrap();

        sink.record(SummaryRecord::scalar(TRAINING_LOSS, 249, 0.3)).unwrap();
        sink.flush().unwrap();

        let rows = read_rows(&storage);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][1], "249");
        drop(sink);
    }

    #[test]
    fn test_memory_sink_shares_records() {
        let sink = MemorySummarySink::new();
        let mut writer = sink.clone();

        writer.record(SummaryRecord::scalar(TRAINING_LOSS, 0, 1.0)).unwrap();
        writer.record(SummaryRecord::scalar(TRAINING_LOSS, 1, 0.5)).unwrap();
        writer.record(SummaryRecord::scalar("other", 1, 9.0)).unwrap();
        writer
            .record(SummaryRecord::Checkpoint {
                step: 2,
                path: PathBuf::from("run/chkpt-2.ckpt"),
            })
            .unwrap();
        writer.flush().unwrap();

        assert_eq!(sink.scalars(TRAINING_LOSS), vec![(0, 1.0), (1, 0.5)]);
        assert_eq!(sink.checkpoints(), vec![(2, PathBuf::from("run/chkpt-2.ckpt"))]);
        assert_eq!(sink.records().len(), 4);
        assert_eq!(sink.records()[3].step(), 2);
        assert_eq!(sink.flush_count(), 1);
    }
}
