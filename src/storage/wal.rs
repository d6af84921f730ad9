//! Write-ahead log.
//!
//! Every page mutation made by the data manager is first appended here as a
//! [`LogRecord`] carrying enough bytes to redo or undo it. Records are framed
//! as `[len:u32][checksum:u32][bincode payload]`.

pub mod manager;
pub mod record;

pub use manager::{WalConfig, WalIterator, WalManager};
pub use record::{InsertRecord, LogRecord, UpdateRecord};
