//! Concurrency control module.
//!
//! - **LockTable**: exclusive row locks with wait-for deadlock detection
//! - **Version / Anchor**: the on-disk layout of rows and their versions
//! - **Snapshot**: visibility of a version to a transaction
//! - **VersionManager**: MVCC over the data manager and transaction table

pub mod lock;
pub mod mvcc;
pub mod version;
pub mod visibility;

pub use lock::LockTable;
pub use mvcc::{IsolationLevel, VersionManager};
pub use version::{Anchor, Version, MAX_ROW_PAYLOAD};
pub use visibility::Snapshot;
