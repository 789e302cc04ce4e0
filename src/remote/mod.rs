//! Remote file tree abstraction
//!
//! The sync engine only needs three things from the source side: a one-shot
//! pre-order walk, a way to open a file for reading, and an explicit close on
//! that reader. `MemoryTree` backs the tests; `SftpTree` talks to a real
//! server over libssh2.
//!
//! # Feature Flags
//!
//! `SftpTree` requires the `sftp` feature.

pub mod memory;
#[cfg(feature = "sftp")]
mod sftp;

pub use memory::MemoryTree;
#[cfg(feature = "sftp")]
pub use sftp::{SftpTree, SshAuth};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::types::RemoteEntry;

/// A remote filesystem that can be walked and read
#[async_trait]
pub trait RemoteTree: Send + Sync {
    /// Start a walk of the subtree rooted at `root`.
    ///
    /// The root itself is yielded first, then every descendant in pre-order
    /// with siblings sorted by name. The walker is not restartable.
    fn walk(&self, root: &str) -> Box<dyn RemoteWalker + '_>;

    /// Open a file reported by a walk for reading
    async fn open(&self, path: &str) -> Result<Box<dyn SourceReader>>;
}

/// One-shot traversal cursor
#[async_trait]
pub trait RemoteWalker: Send {
    /// Next entry, an error, or `None` when the walk is exhausted.
    ///
    /// Callers stop at the first error.
    async fn next_entry(&mut self) -> Option<Result<RemoteEntry>>;
}

/// Streaming reader over one remote file
#[async_trait]
pub trait SourceReader: Send {
    /// Read up to `max` bytes; `None` at end of file
    async fn read_chunk(&mut self, max: usize) -> Result<Option<Bytes>>;

    /// Release the remote handle, reporting any error the server returns
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Child path under a walked directory.
///
/// The directory string is kept verbatim so every path a walk yields has the
/// walk root as a literal prefix.
pub(crate) fn child_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_path_keeps_parent_verbatim() {
        assert_eq!(child_path("/", "a"), "/a");
        assert_eq!(child_path("/data", "a"), "/data/a");
        assert_eq!(child_path("/data/", "a"), "/data/a");
        assert_eq!(child_path("/data//", "a"), "/data//a");
    }
}
