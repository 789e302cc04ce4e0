//! Size + modification-time staleness policy
//!
//! A destination object is current when it is strictly newer than the remote
//! file and has the same size. Both times are truncated to whole seconds
//! first, because SFTP servers are not required to report sub-second
//! precision.

use std::fmt;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::types::{ObjectMeta, RemoteEntry, SyncDecision, UploadReason};

/// What to assume when the store does not report a write time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum MissingMtime {
    /// Treat the object as written one second after the remote file, so only
    /// a size change forces an upload.
    #[default]
    AssumeFresh,
    /// Always upload.
    AssumeStale,
}

impl MissingMtime {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissingMtime::AssumeFresh => "assume-fresh",
            MissingMtime::AssumeStale => "assume-stale",
        }
    }
}

impl fmt::Display for MissingMtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides whether a remote file must be uploaded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalenessPolicy {
    pub missing_mtime: MissingMtime,
}

impl StalenessPolicy {
    pub fn new(missing_mtime: MissingMtime) -> Self {
        Self { missing_mtime }
    }

    /// Compare a remote file against the existing destination object
    pub fn decide(&self, remote: &RemoteEntry, dest: &ObjectMeta) -> SyncDecision {
        let remote_time = truncate_to_second(remote.modified);
        let dest_time = match dest.modified {
            Some(t) => truncate_to_second(t),
            None => match self.missing_mtime {
                MissingMtime::AssumeFresh => remote_time + Duration::seconds(1),
                MissingMtime::AssumeStale => return SyncDecision::Upload(UploadReason::Stale),
            },
        };

        if dest.size != remote.size {
            SyncDecision::Upload(UploadReason::SizeChanged)
        } else if dest_time > remote_time {
            SyncDecision::Skip
        } else {
            SyncDecision::Upload(UploadReason::Stale)
        }
    }
}

/// Drop sub-second precision
pub fn truncate_to_second(t: DateTime<Utc>) -> DateTime<Utc> {
    t.trunc_subsecs(0)
}
