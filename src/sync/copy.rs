//! Streaming copy of one remote file into one object

use crate::error::{CopyStage, Result, SyncError};
use crate::remote::{RemoteTree, SourceReader};
use crate::store::{ObjectStore, ObjectWriter};

/// Stream `source_path` into a new object at `key`.
///
/// The object is committed only after every byte was written and the source
/// closed cleanly. Any failure aborts the write first, so the destination is
/// left with either the complete new object or whatever was there before.
/// Returns the number of bytes copied.
pub async fn copy_file(
    remote: &dyn RemoteTree,
    source_path: &str,
    store: &dyn ObjectStore,
    key: &str,
    chunk_size: usize,
) -> Result<u64> {
    let fail = |stage: CopyStage, source: SyncError| SyncError::Copy {
        path: source_path.to_string(),
        key: key.to_string(),
        stage,
        source: Box::new(source),
    };

    let mut reader = remote
        .open(source_path)
        .await
        .map_err(|e| fail(CopyStage::OpenSource, e))?;
    let mut writer = match store.writer(key).await {
        Ok(writer) => writer,
        Err(e) => {
            close_quietly(reader, source_path).await;
            return Err(fail(CopyStage::OpenDestination, e));
        }
    };

    let mut copied: u64 = 0;
    loop {
        let chunk = match reader.read_chunk(chunk_size).await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                abort_quietly(writer, key).await;
                close_quietly(reader, source_path).await;
                return Err(fail(CopyStage::Read, e));
            }
        };
        let len = chunk.len() as u64;
        if let Err(e) = writer.write(chunk).await {
            abort_quietly(writer, key).await;
            close_quietly(reader, source_path).await;
            return Err(fail(CopyStage::Write, e));
        }
        copied += len;
    }

    if let Err(e) = reader.close().await {
        abort_quietly(writer, key).await;
        return Err(fail(CopyStage::CloseSource, e));
    }
    writer
        .commit()
        .await
        .map_err(|e| fail(CopyStage::Commit, e))?;

    Ok(copied)
}

async fn abort_quietly(writer: Box<dyn ObjectWriter>, key: &str) {
    if let Err(e) = writer.abort().await {
        tracing::warn!("Failed to abort write of {}: {}", key, e);
    }
}

async fn close_quietly(reader: Box<dyn SourceReader>, path: &str) {
    if let Err(e) = reader.close().await {
        tracing::debug!("Ignoring close error for {}: {}", path, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryTree;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn content(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_copy_streams_all_bytes() {
        let tree = MemoryTree::new();
        let data = content(10_000);
        tree.add_file("/src/big.bin", data.clone(), Utc::now());
        let store = MemoryStore::new();

        let copied = copy_file(&tree, "/src/big.bin", &store, "dst/big.bin", 333)
            .await
            .unwrap();

        assert_eq!(copied, 10_000);
        assert_eq!(store.get("dst/big.bin").unwrap().data, data);
        assert_eq!(store.commits(), vec!["dst/big.bin"]);
    }

    #[tokio::test]
    async fn test_copy_empty_file_commits_empty_object() {
        let tree = MemoryTree::new();
        tree.add_file("/empty", Vec::new(), Utc::now());
        let store = MemoryStore::new();

        let copied = copy_file(&tree, "/empty", &store, "empty", 1024).await.unwrap();
        assert_eq!(copied, 0);
        assert!(store.get("empty").unwrap().data.is_empty());
    }

    #[tokio::test]
    async fn test_read_failure_aborts_write() {
        let tree = MemoryTree::new();
        tree.add_file("/f", content(100), Utc::now());
        tree.fail_read("/f");
        let store = MemoryStore::new();

        let err = copy_file(&tree, "/f", &store, "f", 10).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Copy {
                stage: CopyStage::Read,
                ..
            }
        ));
        assert!(store.get("f").is_none());
        assert_eq!(store.aborts(), vec!["f"]);
    }

    #[tokio::test]
    async fn test_write_failure_keeps_previous_object() {
        let tree = MemoryTree::new();
        tree.add_file("/f", content(100), Utc::now());
        let store = MemoryStore::new();
        store.put("f", "previous", None);
        store.fail_write("f");

        let err = copy_file(&tree, "/f", &store, "f", 10).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Copy {
                stage: CopyStage::Write,
                ..
            }
        ));
        assert_eq!(store.get("f").unwrap().data, "previous");
    }

    #[tokio::test]
    async fn test_close_failure_aborts_write() {
        let tree = MemoryTree::new();
        tree.add_file("/f", content(100), Utc::now());
        tree.fail_close("/f");
        let store = MemoryStore::new();

        let err = copy_file(&tree, "/f", &store, "f", 1000).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Copy {
                stage: CopyStage::CloseSource,
                ..
            }
        ));
        assert!(store.get("f").is_none());
        assert!(store.commits().is_empty());
    }

    #[tokio::test]
    async fn test_missing_source_fails_before_writing() {
        let tree = MemoryTree::new();
        let store = MemoryStore::new();

        let err = copy_file(&tree, "/nope", &store, "nope", 10).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Copy {
                stage: CopyStage::OpenSource,
                ..
            }
        ));
        assert!(store.aborts().is_empty());
    }

    #[tokio::test]
    async fn test_unwritable_destination_fails_before_reading() {
        let tree = MemoryTree::new();
        tree.add_file("/f", content(100), Utc::now());
        let store = MemoryStore::new();
        store.fail_open("f");

        let err = copy_file(&tree, "/f", &store, "f", 10).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Copy {
                stage: CopyStage::OpenDestination,
                ..
            }
        ));
        assert_eq!(tree.opened(), vec!["/f"]);
        assert!(store.aborts().is_empty());
        assert!(store.commits().is_empty());
    }

    #[tokio::test]
    async fn test_commit_failure_keeps_previous_object() {
        let tree = MemoryTree::new();
        tree.add_file("/f", content(100), Utc::now());
        let store = MemoryStore::new();
        store.put("f", "previous", None);
        store.fail_commit("f");

        let err = copy_file(&tree, "/f", &store, "f", 10).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Copy {
                stage: CopyStage::Commit,
                ..
            }
        ));
        assert_eq!(store.get("f").unwrap().data, "previous");
        assert!(store.commits().is_empty());
    }
}
