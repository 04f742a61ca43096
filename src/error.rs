//! Error types for the record processing pipeline
//!
//! Rejected or filtered records are never errors. These types only cover
//! malformed configuration and storage failures surfaced through write handles.

use thiserror::Error;

/// Main error type for pipeline construction and runtime operations
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid processor configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Input error: {0}")]
    Input(#[from] std::io::Error),

    #[error("Malformed record on line {line}: {source}")]
    MalformedRecord {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl PipelineError {
    /// Create invalid configuration error
    pub fn invalid_configuration<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create malformed record error for the given 1-based input line
    pub fn malformed_record(line: usize, source: serde_json::Error) -> Self {
        Self::MalformedRecord { line, source }
    }
}

/// Errors reported by storage writers and backends
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage writer is closed")]
    WriterClosed,

    #[error("Write was abandoned before completion")]
    Abandoned,

    #[error("Backend error: {message}")]
    Backend { message: String },
}

impl StorageError {
    /// Create backend error
    pub fn backend<S: Into<String>>(message: S) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type carried by pending writes
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_configuration_constructor() {
        let error = PipelineError::invalid_configuration("max_elements must be positive");
        assert!(matches!(error, PipelineError::InvalidConfiguration { .. }));
        assert_eq!(
            error.to_string(),
            "Invalid processor configuration: max_elements must be positive"
        );
    }

    #[test]
    fn test_storage_error_converts_into_pipeline_error() {
        let error: PipelineError = StorageError::WriterClosed.into();
        assert!(matches!(error, PipelineError::Storage(StorageError::WriterClosed)));
        assert_eq!(error.to_string(), "Storage error: Storage writer is closed");
    }

    #[test]
    fn test_backend_constructor() {
        let error = StorageError::backend("disk full");
        assert_eq!(error.to_string(), "Backend error: disk full");
    }

    #[test]
    fn test_malformed_record_reports_line() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error = PipelineError::malformed_record(7, source);
        assert!(error.to_string().starts_with("Malformed record on line 7"));
    }
}
