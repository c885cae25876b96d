//! Error types for loading operations

use std::path::PathBuf;
use thiserror::Error;

use crate::source::RecordKind;

/// Errors raised by the destination store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Schema version mismatch
    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch { expected: i32, found: i32 },

    /// Store setting rejected before reaching the database
    #[error("Invalid setting: {0}")]
    InvalidSetting(String),
}

/// Errors that abort a load run
#[derive(Error, Debug)]
pub enum LoadError {
    /// File name carries neither record kind suffix
    #[error("Cannot classify {path}: name ends in neither 'comments' nor 'submissions'")]
    Classification { path: PathBuf },

    /// File name names a different kind than the one requested
    #[error("{path} looks like {found} but {expected} was requested")]
    KindMismatch {
        path: PathBuf,
        expected: RecordKind,
        found: RecordKind,
    },

    /// Glob pattern could not be parsed
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Destination store failure
    #[error(transparent)]
    Storage(#[from] StoreError),

    /// A stage worker panicked
    #[error("{0} worker panicked")]
    WorkerPanicked(&'static str),

    /// The writer drained without seeing every batch it was owed
    #[error("Pipeline drained incomplete: {0}")]
    Incomplete(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-file read failures; these abandon one file and never end the run
#[derive(Error, Debug)]
pub enum ReadError {
    /// File could not be opened
    #[error("Cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Decompression or read failure part way through
    #[error("Read failed in {path} after line {line}: {source}")]
    Read {
        path: PathBuf,
        line: u64,
        #[source]
        source: std::io::Error,
    },

    /// Downstream queue closed, the run is shutting down
    #[error("Queue closed while reading {0}")]
    QueueClosed(PathBuf),
}

impl StoreError {
    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            StoreError::SchemaVersionMismatch { expected, found } => {
                format!(
                    "Schema version mismatch (expected v{expected}, found v{found}).\n\n\
                    Hint: load into a fresh database file."
                )
            }
            _ => self.to_string(),
        }
    }
}

impl LoadError {
    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            LoadError::Classification { path } => {
                format!(
                    "Cannot tell whether {} holds comments or submissions.\n\n\
                    Hint: dump files must end in 'comments' or 'submissions' (before .zst), \
                    or pass --kind to load oddly named files.",
                    path.display()
                )
            }
            LoadError::KindMismatch {
                path,
                expected,
                found,
            } => {
                format!(
                    "{} is named like a {found} dump but --kind {expected} was given.\n\n\
                    Hint: drop --kind or split the inputs into separate runs.",
                    path.display()
                )
            }
            LoadError::InvalidPattern(pattern) => {
                format!(
                    "Invalid glob pattern: {pattern}\n\n\
                    Hint: Use standard glob syntax like 'dumps/*_comments.zst'."
                )
            }
            LoadError::Storage(err) => {
                format!(
                    "{}\n\nFiles committed before the failure stay registered; \
                    re-run the same command to continue.",
                    err.user_message()
                )
            }
            _ => self.to_string(),
        }
    }

    /// Whether the failure happened before any data could be written
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            LoadError::Classification { .. }
                | LoadError::KindMismatch { .. }
                | LoadError::InvalidPattern(_)
                | LoadError::InvalidConfig(_)
        )
    }
}

impl From<duckdb::Error> for StoreError {
    fn from(err: duckdb::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<duckdb::Error> for LoadError {
    fn from(err: duckdb::Error) -> Self {
        LoadError::Storage(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors() {
        let err = LoadError::Classification {
            path: PathBuf::from("RC_2015-01.zst"),
        };
        assert!(err.is_configuration());
        assert!(err.user_message().contains("--kind"));

        let err = LoadError::Storage(StoreError::Database("disk full".to_string()));
        assert!(!err.is_configuration());
        assert!(err.user_message().contains("disk full"));
    }

    #[test]
    fn test_kind_mismatch_message() {
        let err = LoadError::KindMismatch {
            path: PathBuf::from("AskReddit_comments.zst"),
            expected: RecordKind::Submissions,
            found: RecordKind::Comments,
        };
        assert_eq!(
            err.to_string(),
            "AskReddit_comments.zst looks like comments but submissions was requested"
        );
    }
}
