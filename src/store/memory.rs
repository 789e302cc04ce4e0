//! In-memory object store
//!
//! Records every lookup, commit and abort so tests can assert on them.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{ObjectStore, ObjectWriter};
use crate::error::{Result, SyncError};
use crate::types::ObjectMeta;

/// A stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Bytes,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, StoredObject>,
    fail_head: HashSet<String>,
    fail_write: HashSet<String>,
    fail_open: HashSet<String>,
    fail_commit: HashSet<String>,
    heads: Vec<String>,
    commits: Vec<String>,
    aborts: Vec<String>,
}

/// Object store held entirely in memory
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    keep_mtime: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Store that stamps committed objects with the commit time
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            keep_mtime: true,
        }
    }

    /// Store that never reports a modification time
    pub fn without_mtime() -> Self {
        Self {
            keep_mtime: false,
            ..Self::new()
        }
    }

    /// Seed an object directly
    pub fn put(&self, key: &str, data: impl Into<Bytes>, modified: Option<DateTime<Utc>>) {
        self.inner.lock().objects.insert(
            key.to_string(),
            StoredObject {
                data: data.into(),
                modified,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.inner.lock().objects.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().objects.keys().cloned().collect()
    }

    /// Make lookups of `key` fail with a non-"not found" error
    pub fn fail_head(&self, key: &str) {
        self.inner.lock().fail_head.insert(key.to_string());
    }

    /// Make writes to `key` fail
    pub fn fail_write(&self, key: &str) {
        self.inner.lock().fail_write.insert(key.to_string());
    }

    /// Make opening a writer for `key` fail
    pub fn fail_open(&self, key: &str) {
        self.inner.lock().fail_open.insert(key.to_string());
    }

    /// Make committing `key` fail after all writes succeeded
    pub fn fail_commit(&self, key: &str) {
        self.inner.lock().fail_commit.insert(key.to_string());
    }

    /// Keys looked up, in order
    pub fn heads(&self) -> Vec<String> {
        self.inner.lock().heads.clone()
    }

    /// Keys committed, in order
    pub fn commits(&self) -> Vec<String> {
        self.inner.lock().commits.clone()
    }

    /// Keys whose writes were aborted, in order
    pub fn aborts(&self) -> Vec<String> {
        self.inner.lock().aborts.clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        let mut inner = self.inner.lock();
        inner.heads.push(key.to_string());
        if inner.fail_head.contains(key) {
            return Err(SyncError::store(key, "access denied"));
        }
        Ok(inner.objects.get(key).map(|obj| ObjectMeta {
            size: obj.data.len() as u64,
            modified: obj.modified,
        }))
    }

    async fn writer(&self, key: &str) -> Result<Box<dyn ObjectWriter>> {
        let fail = {
            let inner = self.inner.lock();
            if inner.fail_open.contains(key) {
                return Err(SyncError::store(key, "bucket not writable"));
            }
            inner.fail_write.contains(key)
        };
        Ok(Box::new(MemoryWriter {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
            buffer: BytesMut::new(),
            fail,
            keep_mtime: self.keep_mtime,
        }))
    }
}

struct MemoryWriter {
    inner: Arc<Mutex<Inner>>,
    key: String,
    buffer: BytesMut,
    fail: bool,
    keep_mtime: bool,
}

#[async_trait]
impl ObjectWriter for MemoryWriter {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        if self.fail {
            return Err(SyncError::store(&self.key, "upload interrupted"));
        }
        self.buffer.extend_from_slice(&chunk);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryWriter {
            inner,
            key,
            buffer,
            keep_mtime,
            ..
        } = *self;
        let mut inner = inner.lock();
        if inner.fail_commit.contains(&key) {
            return Err(SyncError::store(&key, "upload could not be finalized"));
        }
        inner.objects.insert(
            key.clone(),
            StoredObject {
                data: buffer.freeze(),
                modified: keep_mtime.then(Utc::now),
            },
        );
        inner.commits.push(key);
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        let MemoryWriter { inner, key, .. } = *self;
        inner.lock().aborts.push(key);
        Ok(())
    }
}
