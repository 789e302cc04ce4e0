//! Synchronization decision engine
//!
//! Walks the remote tree, maps each file to an object key, decides with the
//! staleness policy whether the object is current, and streams the file into
//! the store when it is not.

mod copy;
mod engine;
mod mapper;
mod staleness;

pub use copy::copy_file;
pub use engine::sync;
pub use mapper::{clean_rooted, map_path, SyncRoots};
pub use staleness::{truncate_to_second, MissingMtime, StalenessPolicy};
