pub mod lru;
pub mod replacer;

use crate::error::{Error, Result};
use crate::storage::page::{Page, PageBuf, PageId};
use crate::storage::{PageManager, PAGE_SIZE};
use log::debug;
use parking_lot::Mutex;
use replacer::{FrameId, Replacer};
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

struct Frame {
    page: Arc<Page>,
    pin_count: u32,
}

/// Bounded page cache with reference-counted (pinned) pages.
#[derive(Clone)]
pub struct BufferPoolManager {
    inner: Arc<BufferPoolInner>,
}

struct BufferPoolInner {
    state: Mutex<PoolState>,
    page_manager: Mutex<PageManager>,
    max_frames: usize,
}

struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    frames: HashMap<FrameId, Frame>,
    replacer: Box<dyn Replacer>,
    next_frame_id: FrameId,
}

impl BufferPoolManager {
    pub fn new(page_manager: PageManager, replacer: Box<dyn Replacer>, max_frames: usize) -> Self {
        Self {
            inner: Arc::new(BufferPoolInner {
                state: Mutex::new(PoolState {
                    page_table: HashMap::with_capacity(max_frames),
                    frames: HashMap::with_capacity(max_frames),
                    replacer,
                    next_frame_id: 0,
                }),
                page_manager: Mutex::new(page_manager),
                max_frames,
            }),
        }
    }

    /// Pins the page, loading it from disk if it is not resident. The page is
    /// released when the returned reference is dropped.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PageRef> {
        let mut state = self.inner.state.lock();
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            return self.pin(&mut state, frame_id);
        }

        let mut data = Box::new([0u8; PAGE_SIZE]);
        self.inner
            .page_manager
            .lock()
            .read_page(page_id, &mut data[..])?;

        let frame_id = self.claim_frame(&mut state)?;
        state.frames.insert(
            frame_id,
            Frame {
                page: Arc::new(Page::new(page_id, data)),
                pin_count: 0,
            },
        );
        state.page_table.insert(page_id, frame_id);
        self.pin(&mut state, frame_id)
    }

    /// Appends a page initialized with `initial` and returns its id. The page
    /// is written through and is not made resident.
    pub fn new_page(&self, initial: &PageBuf) -> Result<PageId> {
        self.inner.page_manager.lock().allocate_page(&initial[..])
    }

    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let page = {
            let state = self.inner.state.lock();
            state
                .page_table
                .get(&page_id)
                .and_then(|frame_id| state.frames.get(frame_id))
                .map(|frame| Arc::clone(&frame.page))
        };

        if let Some(page) = page {
            self.write_back(&page)?;
            self.inner.page_manager.lock().sync()?;
        }
        Ok(())
    }

    pub fn flush_all(&self) -> Result<()> {
        let pages: Vec<Arc<Page>> = {
            let state = self.inner.state.lock();
            state
                .frames
                .values()
                .map(|frame| Arc::clone(&frame.page))
                .collect()
        };

        for page in &pages {
            self.write_back(page)?;
        }
        self.inner.page_manager.lock().sync()
    }

    pub fn num_pages(&self) -> Result<u32> {
        self.inner.page_manager.lock().num_pages()
    }

    pub fn resident_pages(&self) -> usize {
        self.inner.state.lock().frames.len()
    }

    /// Pin count of a resident page, `None` if the page is not cached.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.inner.state.lock();
        state
            .page_table
            .get(&page_id)
            .and_then(|frame_id| state.frames.get(frame_id))
            .map(|frame| frame.pin_count)
    }

    fn pin(&self, state: &mut PoolState, frame_id: FrameId) -> Result<PageRef> {
        let frame = state.frames.get_mut(&frame_id).ok_or_else(|| {
            Error::CorruptStorage(format!("page table points at missing frame {}", frame_id))
        })?;
        frame.pin_count += 1;
        let page = Arc::clone(&frame.page);
        state.replacer.pin(frame_id);

        Ok(PageRef {
            page,
            frame_id,
            pool: Arc::clone(&self.inner),
        })
    }

    /// Returns a free frame id, evicting the least recently released unpinned
    /// page when the pool is at capacity.
    fn claim_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if state.frames.len() < self.inner.max_frames {
            let frame_id = state.next_frame_id;
            state.next_frame_id += 1;
            return Ok(frame_id);
        }

        let victim = state.replacer.evict().ok_or(Error::CacheFull)?;
        if let Some(frame) = state.frames.get(&victim) {
            let page = Arc::clone(&frame.page);
            if let Err(e) = self.write_back(&page) {
                state.replacer.unpin(victim);
                return Err(e);
            }
            state.frames.remove(&victim);
            state.page_table.remove(&page.page_id());
            debug!("Evicted {} from frame {}", page.page_id(), victim);
        }
        Ok(victim)
    }

    fn write_back(&self, page: &Page) -> Result<()> {
        let data = page.read();
        if page.take_dirty() {
            let result = self
                .inner
                .page_manager
                .lock()
                .write_page(page.page_id(), &data[..]);
            if result.is_err() {
                page.mark_dirty();
            }
            result?;
        }
        Ok(())
    }
}

/// A pinned page. Dropping it releases the pin; a page with pin count 0
/// becomes a candidate for eviction.
pub struct PageRef {
    page: Arc<Page>,
    frame_id: FrameId,
    pool: Arc<BufferPoolInner>,
}

impl Deref for PageRef {
    type Target = Page;

    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

impl Drop for PageRef {
    fn drop(&mut self) {
        let mut guard = self.pool.state.lock();
        let state = &mut *guard;
        if let Some(frame) = state.frames.get_mut(&self.frame_id) {
            frame.pin_count = frame.pin_count.saturating_sub(1);
            if frame.pin_count == 0 {
                state.replacer.unpin(self.frame_id);
            }
        }
    }
}
