pub mod access;
pub mod concurrency;
pub mod database;
pub mod error;
pub mod recovery;
pub mod session;
pub mod storage;
pub mod transaction;

pub use concurrency::IsolationLevel;
pub use database::{Database, DatabaseConfig, Transaction};
pub use error::{Error, Result};
