// rust/segtrain-core/src/error.rs

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {

    #[error("Malformed manifest '{source_name}'{}: {message}", line_suffix(.line))]
    Format {
        source_name: String,
        line: Option<u64>,
        message: String,
    },

    #[error("Not enough patients for validation: requested {requested}, found {available}")]
    InsufficientData {
        requested: usize,
        available: usize,
    },

    #[error("Failed to read example '{path}': {message}")]
    DataRead {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("No checkpoint found under '{dir}'")]
    NoCheckpoint {
        dir: PathBuf,
    },

    #[error("Storage error at '{path}': {message}")]
    Storage {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Checkpoint error: {message}")]
    Checkpoint {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Model error: {message}")]
    Model {
        message: String,
    },

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, TrainError>;

fn line_suffix(line: &Option<u64>) -> String {
    match line {
        Some(line) => format!(" at line {line}"),
        None => String::new(),
    }
}

// Convenience constructors
impl TrainError {

    pub fn format(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Format {
            source_name: source_name.into(),
            line: None,
            message: message.into(),
        }
    }

    pub fn format_at_line(
        source_name: impl Into<String>,
        line: u64,
        message: impl Into<String>,
    ) -> Self {
        Self::Format {
            source_name: source_name.into(),
            line: Some(line),
            message: message.into(),
        }
    }

    pub fn insufficient_data(requested: usize, available: usize) -> Self {
        Self::InsufficientData { requested, available }
    }

    pub fn data_read(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::DataRead {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn data_read_with_source(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::DataRead {
            path: path.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn no_checkpoint(dir: impl Into<PathBuf>) -> Self {
        Self::NoCheckpoint { dir: dir.into() }
    }

    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn checkpoint(message: impl Into<String>) -> Self {
        Self::Checkpoint {
            message: message.into(),
            source: None,
        }
    }

    pub fn checkpoint_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Checkpoint {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn model(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns true for failures reading a training or validation example.
    pub fn is_data_read(&self) -> bool {
        matches!(self, Self::DataRead { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_message_includes_line() {
        let err = TrainError::format_at_line("training.csv", 3, "expected 2 fields, found 1");
        let msg = err.to_string();
        assert!(msg.contains("training.csv"));
        assert!(msg.contains("line 3"));
        assert!(msg.contains("expected 2 fields"));
    }

    #[test]
    fn test_format_message_without_line() {
        let err = TrainError::format("val.csv", "manifest is empty");
        assert_eq!(err.to_string(), "Malformed manifest 'val.csv': manifest is empty");
    }

    #[test]
    fn test_insufficient_data_message() {
        let err = TrainError::insufficient_data(10, 3);
        assert!(err.to_string().contains("requested 10, found 3"));
    }

    #[test]
    fn test_data_read_keeps_source() {
        use std::error::Error as _;
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = TrainError::data_read_with_source("p1/a.png", "failed to open", io);
        assert!(err.is_data_read());
        assert!(err.source().is_some());
    }
}
