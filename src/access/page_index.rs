//! Free-space index over data pages.
//!
//! Pages are bucketed by free space in steps of `PAGE_SIZE / INTERVALS`. A
//! selected page leaves the index until the caller puts it back, so two
//! inserts never race for the same page.

use parking_lot::Mutex;

use crate::storage::page::PageId;
use crate::storage::PAGE_SIZE;

const INTERVALS: usize = 40;
const THRESHOLD: usize = PAGE_SIZE / INTERVALS;

pub struct PageIndex {
    buckets: Mutex<Vec<Vec<(PageId, usize)>>>,
}

impl PageIndex {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(vec![Vec::new(); INTERVALS + 1]),
        }
    }

    pub fn add(&self, page_id: PageId, free_space: usize) {
        let bucket = (free_space / THRESHOLD).min(INTERVALS);
        self.buckets.lock()[bucket].push((page_id, free_space));
    }

    /// Takes a page with at least `space` free bytes out of the index.
    pub fn select(&self, space: usize) -> Option<(PageId, usize)> {
        let mut buckets = self.buckets.lock();
        let first = (space / THRESHOLD).min(INTERVALS);
        for bucket in &mut buckets[first..] {
            if let Some(pos) = bucket.iter().position(|&(_, free)| free >= space) {
                return Some(bucket.swap_remove(pos));
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.buckets.lock().iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PageIndex {
    fn default() -> Self {
        Self::new()
    }
}
