pub mod data_page;
pub mod meta_page;

use crate::storage::PAGE_SIZE;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

pub type PageBuf = [u8; PAGE_SIZE];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub u32);

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Page{}", self.0)
    }
}

/// A resident page. Owned by the buffer pool; callers reach it through a
/// pinned [`PageRef`](crate::storage::buffer::PageRef).
pub struct Page {
    page_id: PageId,
    data: RwLock<Box<PageBuf>>,
    dirty: AtomicBool,
}

impl Page {
    pub(crate) fn new(page_id: PageId, data: Box<PageBuf>) -> Self {
        Self {
            page_id,
            data: RwLock::new(data),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Box<PageBuf>> {
        self.data.read()
    }

    /// Locks the page for mutation and marks it dirty.
    pub fn write(&self) -> RwLockWriteGuard<'_, Box<PageBuf>> {
        let guard = self.data.write();
        self.dirty.store(true, Ordering::SeqCst);
        guard
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Clears the dirty flag, returning whether it was set. Callers hold a
    /// read guard so no writer can slip in between the check and the flush.
    pub(crate) fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }
}

pub use data_page::DataPage;
