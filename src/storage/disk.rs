pub mod page_manager;
pub mod store;

pub use page_manager::{PageManager, PAGE_SIZE};
pub use store::{ByteStore, FileStore, MemoryStore};
