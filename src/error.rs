//! Error types for portal-etl
//!
//! This module provides the error taxonomy for the library:
//! - Acquisition failures raised by the portal driver
//! - Watch timeouts raised by the download watcher
//! - Transform/load failures raised by the post-processing collaborators
//! - Queue-task failures wrapping any of the above at the worker boundary

use crate::types::TaskId;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for portal-etl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for portal-etl
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download_dir")
        key: Option<String>,
    },

    /// Portal driver failed during one of the acquisition phases
    #[error("acquisition failed during {phase}: {message}")]
    Acquisition {
        /// The acquisition phase that failed (e.g., "navigate", "export")
        phase: String,
        /// Driver-specific failure description
        message: String,
    },

    /// Download watch ended in a terminal timeout state
    #[error("watch timeout: {0}")]
    Watch(#[from] WatchTimeout),

    /// Record transformation failed
    #[error("transform error: {0}")]
    Transform(#[from] TransformError),

    /// Relational-store load failed
    #[error("load error: {0}")]
    Load(#[from] LoadError),

    /// A deferred task failed inside the queue worker
    ///
    /// Wraps the underlying error together with the stable task identity so
    /// retry bookkeeping and logging can refer to the same logical task.
    #[error("deferred task '{label}' (id {id}) failed: {source}")]
    QueueTask {
        /// Stable task id assigned at enqueue time
        id: TaskId,
        /// Human-readable task label
        label: String,
        /// The error raised by the task operation
        #[source]
        source: Box<Error>,
    },

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Convenience constructor for portal-driver failures
    pub fn acquisition(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Acquisition {
            phase: phase.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for configuration errors
    pub fn config(message: impl Into<String>, key: Option<&str>) -> Self {
        Self::Config {
            message: message.into(),
            key: key.map(str::to_owned),
        }
    }
}

/// Terminal states of a download watch
///
/// Each variant names the state-machine stage in which the timeout elapsed.
#[derive(Debug, Error)]
pub enum WatchTimeout {
    /// No entry matching the expected prefix ever appeared
    #[error("no file with prefix '{prefix}' appeared within {timeout_secs}s")]
    NotStarted {
        /// Expected filename prefix
        prefix: String,
        /// Configured timeout in seconds
        timeout_secs: u64,
    },

    /// Partial-marker files were still present when the timeout elapsed
    #[error("download with prefix '{prefix}' stuck in partial state after {timeout_secs}s")]
    Stuck {
        /// Expected filename prefix
        prefix: String,
        /// Configured timeout in seconds
        timeout_secs: u64,
    },

    /// Partial markers cleared but no final file matched prefix and extension
    #[error("no final file with prefix '{prefix}' found within {timeout_secs}s")]
    NotFound {
        /// Expected filename prefix
        prefix: String,
        /// Configured timeout in seconds
        timeout_secs: u64,
    },
}

/// Record transformation errors (schema/shape mismatch)
#[derive(Debug, Error)]
pub enum TransformError {
    /// Input file could not be parsed
    #[error("malformed input {path}: {reason}")]
    Malformed {
        /// Path of the raw input file
        path: PathBuf,
        /// Why parsing failed
        reason: String,
    },

    /// Input columns do not match the target schema
    #[error("schema mismatch for {path}: {reason}")]
    SchemaMismatch {
        /// Path of the raw input file
        path: PathBuf,
        /// Description of the mismatch
        reason: String,
    },
}

/// Relational-store load errors
#[derive(Debug, Error)]
pub enum LoadError {
    /// Bulk load of a CSV file failed
    #[error("bulk load of {path} into {table} failed: {reason}")]
    BulkLoad {
        /// Path of the CSV file being loaded
        path: PathBuf,
        /// Destination table
        table: String,
        /// Why the load failed
        reason: String,
    },

    /// A store statement failed to execute
    #[error("statement failed: {0}")]
    Statement(String),

    /// The CSV file had no data rows
    #[error("empty source file: {0}")]
    EmptySource(PathBuf),
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquisition_error_display_includes_phase() {
        let err = Error::acquisition("select_report", "element not found");
        assert_eq!(
            err.to_string(),
            "acquisition failed during select_report: element not found"
        );
    }

    #[test]
    fn watch_timeout_converts_into_error() {
        let err: Error = WatchTimeout::NotStarted {
            prefix: "CNT_27".to_string(),
            timeout_secs: 10,
        }
        .into();
        assert!(matches!(err, Error::Watch(WatchTimeout::NotStarted { .. })));
        assert!(err.to_string().contains("CNT_27"));
    }

    #[test]
    fn queue_task_error_preserves_source() {
        let inner = Error::Transform(TransformError::Malformed {
            path: PathBuf::from("raw.csv"),
            reason: "truncated row".to_string(),
        });
        let err = Error::QueueTask {
            id: TaskId(7),
            label: "CNT_27:transform".to_string(),
            source: Box::new(inner),
        };
        let text = err.to_string();
        assert!(text.contains("CNT_27:transform"));
        assert!(text.contains("id 7"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
