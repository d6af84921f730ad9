//! Page storage for the data manager.
//!
//! - **ByteStore**: byte-addressed backing (file or memory) shared by every on-disk structure
//! - **PageManager**: fixed-size (8KB) page reads and writes over a store
//! - **BufferPoolManager**: bounded page cache with pinning and LRU eviction
//! - **DataPage / meta page**: the two page layouts of the data file
//! - **WalManager**: checksummed, append-only redo/undo log

pub mod buffer;
pub mod disk;
pub mod page;
pub mod wal;

pub use buffer::{BufferPoolManager, PageRef};
pub use disk::{ByteStore, FileStore, MemoryStore, PageManager, PAGE_SIZE};
pub use page::{DataPage, Page, PageBuf, PageId};
