//! Data manager layer.
//!
//! - **Uid**: address of a data item (page id + offset)
//! - **data_item**: the `[valid][size][payload]` item layout
//! - **PageIndex**: free-space buckets used to place new items
//! - **DataManager**: logged insert/read/update/free of items, recovery on open

pub mod data_item;
pub mod data_manager;
pub mod page_index;

pub use data_item::{Uid, MAX_PAYLOAD};
pub use data_manager::DataManager;
pub use page_index::PageIndex;
