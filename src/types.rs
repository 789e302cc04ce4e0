//! Core types for sftpsync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sync::StalenessPolicy;

/// Default streaming chunk size in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// One entry produced by a remote tree traversal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Absolute, remote-rooted path
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    /// Modification time; SFTP servers may only report whole seconds
    pub modified: DateTime<Utc>,
}

impl RemoteEntry {
    pub fn file(path: impl Into<String>, size: u64, modified: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            is_dir: false,
            size,
            modified,
        }
    }

    pub fn dir(path: impl Into<String>, modified: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            is_dir: true,
            size: 0,
            modified,
        }
    }
}

/// Metadata of an existing destination object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub size: u64,
    /// Last write time, if the provider reports one
    pub modified: Option<DateTime<Utc>>,
}

/// Why a file is being uploaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadReason {
    /// No object exists at the destination key
    Missing,
    /// Object exists with a different size
    SizeChanged,
    /// Object is not strictly newer than the remote file
    Stale,
}

impl UploadReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadReason::Missing => "missing",
            UploadReason::SizeChanged => "size changed",
            UploadReason::Stale => "stale",
        }
    }
}

/// Per-file sync decision, recomputed on every run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    Upload(UploadReason),
    Skip,
}

impl SyncDecision {
    pub fn is_upload(&self) -> bool {
        matches!(self, SyncDecision::Upload(_))
    }
}

/// Options for a single sync run
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Staleness policy deciding upload vs skip
    pub policy: StalenessPolicy,
    /// Bytes requested per source read
    pub chunk_size: usize,
    /// Log decisions without copying anything
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            policy: StalenessPolicy::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            dry_run: false,
        }
    }
}

/// Totals of a successful sync run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub files_seen: u64,
    pub directories_seen: u64,
    pub uploaded: u64,
    pub skipped: u64,
    pub bytes_uploaded: u64,
    pub dry_run: bool,
}
