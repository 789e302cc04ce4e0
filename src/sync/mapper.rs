//! Source path to destination key mapping

use std::borrow::Cow;

use crate::error::{Result, SyncError};

/// Map a traversed remote path to an object key under `dest_root`.
///
/// `source_path` must lie under `source_root`; the relative remainder is
/// joined onto `dest_root` with lexical cleaning and returned without the
/// leading `/`, since object keys are not rooted.
pub fn map_path(source_root: &str, source_path: &str, dest_root: &str) -> Result<String> {
    if source_root.is_empty() {
        return Err(SyncError::EmptyRoot("source"));
    }
    if dest_root.is_empty() {
        return Err(SyncError::EmptyRoot("destination"));
    }

    let root: Cow<'_, str> = if source_root.ends_with('/') {
        Cow::Borrowed(source_root)
    } else {
        Cow::Owned(format!("{}/", source_root))
    };
    let relative = source_path
        .strip_prefix(root.as_ref())
        .ok_or_else(|| SyncError::OutsideRoot {
            root: root.to_string(),
            path: source_path.to_string(),
        })?;

    let joined = clean_rooted(&format!("{}/{}", dest_root, relative));
    Ok(joined[1..].to_string())
}

/// Lexically clean a path and root it at `/`.
///
/// Empty and `.` segments are dropped, `..` removes the previous segment and
/// never climbs above the root.
pub fn clean_rooted(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}

/// The (source root, destination root) pair anchoring one sync run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRoots {
    source: String,
    destination: String,
}

impl SyncRoots {
    /// A source root ending in several `/` is reduced to one; walks and
    /// key mapping both use the reduced form.
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Result<Self> {
        let source = collapse_trailing_slashes(source.into());
        let destination = destination.into();
        if source.is_empty() {
            return Err(SyncError::EmptyRoot("source"));
        }
        if destination.is_empty() {
            return Err(SyncError::EmptyRoot("destination"));
        }
        Ok(Self {
            source,
            destination,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Destination key for a path produced by a walk rooted at `source()`
    pub fn key_for(&self, source_path: &str) -> Result<String> {
        map_path(&self.source, source_path, &self.destination)
    }
}

fn collapse_trailing_slashes(mut path: String) -> String {
    if path.ends_with("//") {
        let kept = path.trim_end_matches('/').len() + 1;
        path.truncate(kept);
    }
    path
}
