//! Crash recovery.
//!
//! Runs when the data file was not closed cleanly. The log is replayed in two
//! passes: committed work is redone front to back, everything else is undone
//! back to front. Transactions left active by the crash are then aborted and
//! the log is checkpointed away.

pub mod replay;

pub use replay::{Recovery, RecoveryStats};
