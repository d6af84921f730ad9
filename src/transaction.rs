//! Transaction identity and the persistent transaction status table.
//!
//! - **Xid**: monotonically increasing transaction id, starting at 1
//! - **TransactionState**: ACTIVE, COMMITTED or ABORTED, one byte on disk
//! - **TransactionTable**: the status of every xid ever begun, durable

pub mod state;
pub mod table;

pub use state::TransactionState;
pub use table::TransactionTable;

/// Transaction identifier.
pub type Xid = u64;

/// The super transaction. Always committed, never active; used for writes
/// made outside any user transaction.
pub const SUPER_XID: Xid = 0;
