//! Sequential walk / decide / copy loop

use crate::error::Result;
use crate::remote::RemoteTree;
use crate::store::ObjectStore;
use crate::types::{RemoteEntry, SyncDecision, SyncOptions, SyncSummary, UploadReason};

use super::copy::copy_file;
use super::mapper::SyncRoots;

/// Mirror every file under `roots.source()` into `store` under
/// `roots.destination()`.
///
/// Entries are handled one at a time in walk order. The first traversal,
/// lookup, mapping or copy error stops the run; files copied before it stay
/// in the store, so re-running resumes where this run stopped.
pub async fn sync(
    remote: &dyn RemoteTree,
    roots: &SyncRoots,
    store: &dyn ObjectStore,
    options: &SyncOptions,
) -> Result<SyncSummary> {
    let mut summary = SyncSummary {
        dry_run: options.dry_run,
        ..Default::default()
    };

    tracing::info!(
        "Syncing {} -> {}{}",
        roots.source(),
        roots.destination(),
        if options.dry_run { " (dry run)" } else { "" }
    );

    let mut walker = remote.walk(roots.source());
    while let Some(entry) = walker.next_entry().await {
        let entry = entry?;
        if entry.is_dir {
            summary.directories_seen += 1;
            continue;
        }
        summary.files_seen += 1;

        let key = roots.key_for(&entry.path)?;
        match decide(store, options, &entry, &key).await? {
            SyncDecision::Skip => {
                tracing::debug!("{}: skipping; mtime and size match", entry.path);
                summary.skipped += 1;
            }
            SyncDecision::Upload(reason) if options.dry_run => {
                tracing::info!("{}: would copy to {} ({})", entry.path, key, reason.as_str());
                summary.uploaded += 1;
            }
            SyncDecision::Upload(reason) => {
                tracing::info!("{}: copying to {} ({}) ...", entry.path, key, reason.as_str());
                let bytes =
                    copy_file(remote, &entry.path, store, &key, options.chunk_size).await?;
                summary.uploaded += 1;
                summary.bytes_uploaded += bytes;
            }
        }
    }

    tracing::info!(
        "Sync finished: {} files, {} uploaded ({} bytes), {} skipped",
        summary.files_seen,
        summary.uploaded,
        summary.bytes_uploaded,
        summary.skipped
    );
    Ok(summary)
}

async fn decide(
    store: &dyn ObjectStore,
    options: &SyncOptions,
    entry: &RemoteEntry,
    key: &str,
) -> Result<SyncDecision> {
    Ok(match store.head(key).await? {
        None => SyncDecision::Upload(UploadReason::Missing),
        Some(meta) => options.policy.decide(entry, &meta),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::remote::MemoryTree;
    use crate::store::MemoryStore;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, 1, 8, 30, 0).unwrap()
    }

    fn roots(source: &str, dest: &str) -> SyncRoots {
        SyncRoots::new(source, dest).unwrap()
    }

    #[tokio::test]
    async fn test_first_run_uploads_everything() {
        let tree = MemoryTree::new();
        tree.add_file("/data/a.txt", "aaa", ts());
        tree.add_file("/data/sub/b.txt", "bbbb", ts());
        let store = MemoryStore::new();

        let summary = sync(&tree, &roots("/data", "/backup"), &store, &SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.files_seen, 2);
        assert_eq!(summary.directories_seen, 2);
        assert_eq!(summary.uploaded, 2);
        assert_eq!(summary.bytes_uploaded, 7);
        assert_eq!(store.keys(), vec!["backup/a.txt", "backup/sub/b.txt"]);
    }

    #[tokio::test]
    async fn test_directories_are_never_looked_up() {
        let tree = MemoryTree::new();
        tree.add_dir("/data/empty", ts());
        tree.add_file("/data/x/y", "1", ts());
        let store = MemoryStore::new();

        sync(&tree, &roots("/data", "/"), &store, &SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(store.heads(), vec!["x/y"]);
        assert_eq!(tree.opened(), vec!["/data/x/y"]);
    }

    #[tokio::test]
    async fn test_stale_object_is_replaced() {
        let tree = MemoryTree::new();
        tree.add_file("/f", "new!", ts());
        let store = MemoryStore::new();
        store.put("f", "old!", Some(ts() - Duration::days(1)));

        let summary = sync(&tree, &roots("/", "/"), &store, &SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.uploaded, 1);
        assert_eq!(store.get("f").unwrap().data, "new!");
    }

    #[tokio::test]
    async fn test_dry_run_copies_nothing() {
        let tree = MemoryTree::new();
        tree.add_file("/f", "x", ts());
        let store = MemoryStore::new();
        let options = SyncOptions {
            dry_run: true,
            ..Default::default()
        };

        let summary = sync(&tree, &roots("/", "/"), &store, &options).await.unwrap();

        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.bytes_uploaded, 0);
        assert!(summary.dry_run);
        assert!(store.keys().is_empty());
        assert!(tree.opened().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_error_aborts() {
        let tree = MemoryTree::new();
        tree.add_file("/a", "1", ts());
        tree.add_file("/b", "2", ts());
        let store = MemoryStore::new();
        store.fail_head("a");

        let err = sync(&tree, &roots("/", "/"), &store, &SyncOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Store { .. }));
        assert!(store.keys().is_empty());
        assert_eq!(store.heads(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_traversal_error_aborts() {
        let tree = MemoryTree::new();
        tree.add_file("/a/1", "1", ts());
        tree.add_file("/b/2", "2", ts());
        tree.fail_listing("/b");
        let store = MemoryStore::new();

        let err = sync(&tree, &roots("/", "/"), &store, &SyncOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Remote { .. }));
        assert_eq!(store.keys(), vec!["a/1"]);
    }

    #[tokio::test]
    async fn test_file_root_is_a_contract_violation() {
        let tree = MemoryTree::new();
        tree.add_file("/only", "1", ts());
        let store = MemoryStore::new();

        let err = sync(&tree, &roots("/only", "/"), &store, &SyncOptions::default())
            .await
            .unwrap_err();

        assert!(err.is_contract_violation());
        assert!(store.heads().is_empty());
    }
}
