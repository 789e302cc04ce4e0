//! sftpsync - mirror an SFTP directory tree into cloud object storage
//!
//! One-way and additive: files missing or stale in the bucket are uploaded,
//! nothing is ever deleted, and the SFTP side is the only source of truth.

pub mod error;
pub mod locator;
pub mod remote;
pub mod store;
pub mod sync;
pub mod types;

pub use error::{Result, SyncError};
pub use sync::{sync, SyncRoots};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
