//! Property-based tests for sftpsync
//!
//! These tests verify invariants that must hold for all inputs:
//! - Key mapping is deterministic and never produces a rooted key
//! - Paths outside the source root are always rejected
//! - The staleness decision only depends on whole seconds
//!
//! Run with: cargo test --test property_tests

use proptest::prelude::*;

// ============================================================================
// PATH MAPPING TESTS
// ============================================================================

mod mapping_tests {
    use super::*;
    use sftpsync::sync::{clean_rooted, map_path};

    fn segment() -> impl Strategy<Value = String> {
        "[a-z0-9_.-]{1,8}".prop_filter("no dot segments", |s| s != "." && s != "..")
    }

    fn rooted_path(max: usize) -> impl Strategy<Value = String> {
        prop::collection::vec(segment(), 0..max).prop_map(|segs| format!("/{}", segs.join("/")))
    }

    proptest! {
        /// Invariant: mapped keys never start with a separator
        #[test]
        fn keys_are_unrooted(
            root in rooted_path(3),
            rel in prop::collection::vec(segment(), 1..4),
            dest in rooted_path(3),
        ) {
            let root_slash = if root.ends_with('/') { root.clone() } else { format!("{}/", root) };
            let path = format!("{}{}", root_slash, rel.join("/"));
            let key = map_path(&root, &path, &dest).unwrap();
            prop_assert!(!key.starts_with('/'));
            prop_assert!(!key.contains("//"));
        }

        /// Invariant: the relative part is preserved under the destination
        #[test]
        fn relative_part_preserved(
            root in rooted_path(3),
            rel in prop::collection::vec(segment(), 1..4),
            dest in rooted_path(3),
        ) {
            let root_slash = if root.ends_with('/') { root.clone() } else { format!("{}/", root) };
            let path = format!("{}{}", root_slash, rel.join("/"));
            let key = map_path(&root, &path, &dest).unwrap();
            let expected = clean_rooted(&format!("{}/{}", dest, rel.join("/")));
            prop_assert_eq!(key, expected[1..].to_string());
        }

        /// Invariant: a trailing slash on the source root does not change the key
        #[test]
        fn trailing_slash_irrelevant(
            root in rooted_path(3).prop_filter("not bare root", |r| r != "/"),
            rel in prop::collection::vec(segment(), 1..4),
        ) {
            let path = format!("{}/{}", root, rel.join("/"));
            let with = map_path(&format!("{}/", root), &path, "/d").unwrap();
            let without = map_path(&root, &path, "/d").unwrap();
            prop_assert_eq!(with, without);
        }

        /// Invariant: sibling paths sharing a name prefix are rejected
        #[test]
        fn prefix_siblings_rejected(
            root in rooted_path(3).prop_filter("not bare root", |r| r != "/"),
            suffix in "[a-z]{1,4}",
            file in segment(),
        ) {
            let path = format!("{}{}/{}", root, suffix, file);
            let result = map_path(&root, &path, "/d");
            prop_assert!(result.is_err());
            prop_assert!(result.unwrap_err().is_contract_violation());
        }

        /// Invariant: cleaning is idempotent
        #[test]
        fn clean_idempotent(s in "[a-z./]{0,30}") {
            let once = clean_rooted(&s);
            prop_assert_eq!(clean_rooted(&once), once);
        }
    }
}

// ============================================================================
// STALENESS TESTS
// ============================================================================

mod staleness_tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use sftpsync::sync::{MissingMtime, StalenessPolicy};
    use sftpsync::{ObjectMeta, RemoteEntry, SyncDecision, UploadReason};

    fn at(secs: i64, millis: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap() + Duration::milliseconds(millis)
    }

    proptest! {
        /// Invariant: sub-second parts never change the decision
        #[test]
        fn subsecond_noise_ignored(
            secs in 1_000_000i64..2_000_000_000,
            delta in -3i64..3,
            remote_ms in 0i64..1000,
            dest_ms in 0i64..1000,
            size in 0u64..10_000,
        ) {
            let policy = StalenessPolicy::default();
            let remote = RemoteEntry::file("/f", size, at(secs, remote_ms));
            let dest = ObjectMeta { size, modified: Some(at(secs + delta, dest_ms)) };
            let expected = if delta > 0 {
                SyncDecision::Skip
            } else {
                SyncDecision::Upload(UploadReason::Stale)
            };
            prop_assert_eq!(policy.decide(&remote, &dest), expected);
        }

        /// Invariant: any size difference forces an upload
        #[test]
        fn size_mismatch_always_uploads(
            remote_size in 0u64..1_000_000,
            dest_size in 0u64..1_000_000,
            dest_has_time in any::<bool>(),
            fresh in any::<bool>(),
        ) {
            prop_assume!(remote_size != dest_size);
            let policy = StalenessPolicy::new(if fresh {
                MissingMtime::AssumeFresh
            } else {
                MissingMtime::AssumeStale
            });
            let t = at(1_700_000_000, 0);
            let remote = RemoteEntry::file("/f", remote_size, t);
            let dest = ObjectMeta {
                size: dest_size,
                modified: dest_has_time.then(|| t + Duration::days(1)),
            };
            prop_assert!(policy.decide(&remote, &dest).is_upload());
        }
    }
}
