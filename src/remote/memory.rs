//! In-memory remote tree
//!
//! Used by tests and dry runs against fixtures. Supports injecting listing,
//! read and close failures per path.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{child_path, RemoteTree, RemoteWalker, SourceReader};
use crate::error::{Result, SyncError};
use crate::types::RemoteEntry;

#[derive(Debug, Clone)]
struct Node {
    is_dir: bool,
    content: Bytes,
    modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: BTreeMap<String, Node>,
    fail_listing: HashSet<String>,
    fail_read: HashSet<String>,
    fail_close: HashSet<String>,
    opened: Vec<String>,
}

/// Remote tree held entirely in memory
#[derive(Debug, Clone)]
pub struct MemoryTree {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTree {
    /// Empty tree containing only `/`
    pub fn new() -> Self {
        let mut inner = Inner::default();
        inner.nodes.insert(
            "/".to_string(),
            Node {
                is_dir: true,
                content: Bytes::new(),
                modified: DateTime::<Utc>::default(),
            },
        );
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Add or replace a file, creating missing parent directories
    pub fn add_file(&self, path: &str, content: impl Into<Bytes>, modified: DateTime<Utc>) {
        let path = normalize(path);
        let mut inner = self.inner.lock();
        create_parents(&mut inner.nodes, &path, modified);
        inner.nodes.insert(
            path,
            Node {
                is_dir: false,
                content: content.into(),
                modified,
            },
        );
    }

    /// Add an empty directory, creating missing parents
    pub fn add_dir(&self, path: &str, modified: DateTime<Utc>) {
        let path = normalize(path);
        let mut inner = self.inner.lock();
        create_parents(&mut inner.nodes, &path, modified);
        inner.nodes.entry(path).or_insert(Node {
            is_dir: true,
            content: Bytes::new(),
            modified,
        });
    }

    /// Make listing `dir` fail
    pub fn fail_listing(&self, dir: &str) {
        self.inner.lock().fail_listing.insert(normalize(dir));
    }

    /// Make reads of `path` fail after the first chunk
    pub fn fail_read(&self, path: &str) {
        self.inner.lock().fail_read.insert(normalize(path));
    }

    /// Make closing a reader of `path` fail
    pub fn fail_close(&self, path: &str) {
        self.inner.lock().fail_close.insert(normalize(path));
    }

    /// Paths opened for reading, in order
    pub fn opened(&self) -> Vec<String> {
        self.inner.lock().opened.clone()
    }
}

#[async_trait]
impl RemoteTree for MemoryTree {
    fn walk(&self, root: &str) -> Box<dyn RemoteWalker + '_> {
        Box::new(MemoryWalker {
            inner: Arc::clone(&self.inner),
            root: Some(root.to_string()),
            pending_dir: None,
            stack: Vec::new(),
        })
    }

    async fn open(&self, path: &str) -> Result<Box<dyn SourceReader>> {
        let mut inner = self.inner.lock();
        let node = match inner.nodes.get(&normalize(path)) {
            Some(node) if !node.is_dir => node.clone(),
            Some(_) => return Err(SyncError::remote(path, "is a directory")),
            None => return Err(SyncError::remote(path, "no such file")),
        };
        inner.opened.push(path.to_string());
        let key = normalize(path);
        Ok(Box::new(MemoryReader {
            path: path.to_string(),
            data: node.content,
            pos: 0,
            fail_read: inner.fail_read.contains(&key),
            fail_close: inner.fail_close.contains(&key),
        }))
    }
}

struct MemoryWalker {
    inner: Arc<Mutex<Inner>>,
    root: Option<String>,
    pending_dir: Option<String>,
    stack: Vec<RemoteEntry>,
}

impl MemoryWalker {
    fn children(&self, dir: &str) -> Result<Vec<RemoteEntry>> {
        let inner = self.inner.lock();
        let key = normalize(dir);
        if inner.fail_listing.contains(&key) {
            return Err(SyncError::remote(dir, "permission denied"));
        }
        let prefix = if key == "/" {
            key.clone()
        } else {
            format!("{}/", key)
        };
        let children = inner
            .nodes
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter(|(path, _)| !path[prefix.len()..].contains('/') && path.len() > prefix.len())
            .map(|(path, node)| {
                let child = child_path(dir, &path[prefix.len()..]);
                to_entry(child, node)
            })
            .collect();
        Ok(children)
    }
}

#[async_trait]
impl RemoteWalker for MemoryWalker {
    async fn next_entry(&mut self) -> Option<Result<RemoteEntry>> {
        if let Some(root) = self.root.take() {
            let node = self.inner.lock().nodes.get(&normalize(&root)).cloned();
            let Some(node) = node else {
                return Some(Err(SyncError::remote(root, "no such file or directory")));
            };
            let entry = to_entry(root, &node);
            if entry.is_dir {
                self.pending_dir = Some(entry.path.clone());
            }
            return Some(Ok(entry));
        }

        if let Some(dir) = self.pending_dir.take() {
            match self.children(&dir) {
                Ok(children) => self.stack.extend(children.into_iter().rev()),
                Err(e) => return Some(Err(e)),
            }
        }

        let entry = self.stack.pop()?;
        if entry.is_dir {
            self.pending_dir = Some(entry.path.clone());
        }
        Some(Ok(entry))
    }
}

struct MemoryReader {
    path: String,
    data: Bytes,
    pos: usize,
    fail_read: bool,
    fail_close: bool,
}

#[async_trait]
impl SourceReader for MemoryReader {
    async fn read_chunk(&mut self, max: usize) -> Result<Option<Bytes>> {
        if self.fail_read && (self.pos > 0 || self.data.is_empty()) {
            return Err(SyncError::remote(&self.path, "connection lost"));
        }
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let end = (self.pos + max.max(1)).min(self.data.len());
        let chunk = self.data.slice(self.pos..end);
        self.pos = end;
        Ok(Some(chunk))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        if self.fail_close {
            return Err(SyncError::remote(&self.path, "failed to close handle"));
        }
        Ok(())
    }
}

fn to_entry(path: String, node: &Node) -> RemoteEntry {
    RemoteEntry {
        path,
        is_dir: node.is_dir,
        size: node.content.len() as u64,
        modified: node.modified,
    }
}

fn normalize(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

fn create_parents(nodes: &mut BTreeMap<String, Node>, path: &str, modified: DateTime<Utc>) {
    let mut current = String::new();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    for segment in segments.iter().take(segments.len().saturating_sub(1)) {
        current.push('/');
        current.push_str(segment);
        nodes.entry(current.clone()).or_insert(Node {
            is_dir: true,
            content: Bytes::new(),
            modified,
        });
    }
}
