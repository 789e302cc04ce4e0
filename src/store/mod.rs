//! Destination object store abstraction
//!
//! Writers are all-or-nothing: bytes become visible only on `commit`, and
//! `abort` leaves either no object or the previous one untouched.
//!
//! # Feature Flags
//!
//! `S3Store` (S3 and GCS interoperability) requires the `cloud` feature.

pub mod memory;
#[cfg(feature = "cloud")]
mod s3;

pub use memory::MemoryStore;
#[cfg(feature = "cloud")]
pub use s3::{S3Store, StoreConfig, DEFAULT_PART_SIZE, GCS_ENDPOINT, MIN_PART_SIZE};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::types::ObjectMeta;

/// Key-addressed object storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Metadata of the object at `key`, or `None` if there is none
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>>;

    /// Start a cancellable write to `key`
    async fn writer(&self, key: &str) -> Result<Box<dyn ObjectWriter>>;
}

/// Cancellable write scope for a single object
#[async_trait]
pub trait ObjectWriter: Send {
    async fn write(&mut self, chunk: Bytes) -> Result<()>;

    /// Make the object visible
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard everything written so far
    async fn abort(self: Box<Self>) -> Result<()>;
}
