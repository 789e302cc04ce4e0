//! Error types for sftpsync

use std::fmt;

use thiserror::Error;

use crate::locator::LocatorError;

/// Result type alias for sftpsync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Step of a single file copy that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStage {
    OpenSource,
    OpenDestination,
    Read,
    Write,
    CloseSource,
    Commit,
}

impl fmt::Display for CopyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            CopyStage::OpenSource => "opening source",
            CopyStage::OpenDestination => "opening destination",
            CopyStage::Read => "reading",
            CopyStage::Write => "writing",
            CopyStage::CloseSource => "closing source",
            CopyStage::Commit => "committing",
        };
        f.write_str(stage)
    }
}

/// Main error type for sftpsync
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid locator: {0}")]
    Locator(#[from] LocatorError),

    #[error("Connection error: {0}")]
    Connect(String),

    #[error("Remote error at {path}: {message}")]
    Remote { path: String, message: String },

    #[error("Object store error for {key}: {message}")]
    Store { key: String, message: String },

    #[error("Copying {path} to {key} failed while {stage}: {source}")]
    Copy {
        path: String,
        key: String,
        stage: CopyStage,
        source: Box<SyncError>,
    },

    #[error("{0} root cannot be empty")]
    EmptyRoot(&'static str),

    #[error("path {path:?} must start with source root {root:?}")]
    OutsideRoot { root: String, path: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub(crate) fn remote(path: impl Into<String>, message: impl fmt::Display) -> Self {
        SyncError::Remote {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn store(key: impl Into<String>, message: impl fmt::Display) -> Self {
        SyncError::Store {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Check if re-running the sync could succeed without changing anything.
    ///
    /// Mapping violations are contract breaches between the walker and the
    /// configured roots, so they are never retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Connect(_)
            | SyncError::Remote { .. }
            | SyncError::Store { .. }
            | SyncError::Io(_) => true,
            SyncError::Copy { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// True for mapping-invariant violations
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, SyncError::EmptyRoot(_) | SyncError::OutsideRoot { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_error_message_names_path_key_and_stage() {
        let err = SyncError::Copy {
            path: "/a/file".to_string(),
            key: "dest/file".to_string(),
            stage: CopyStage::Write,
            source: Box::new(SyncError::store("dest/file", "connection reset")),
        };
        let msg = err.to_string();
        assert!(msg.contains("/a/file"));
        assert!(msg.contains("dest/file"));
        assert!(msg.contains("while writing"));
        assert!(msg.contains("connection reset"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_contract_violations_are_not_retryable() {
        let err = SyncError::OutsideRoot {
            root: "/a/".to_string(),
            path: "/b/file".to_string(),
        };
        assert!(err.is_contract_violation());
        assert!(!err.is_retryable());
        assert!(!SyncError::EmptyRoot("source").is_retryable());
    }
}
