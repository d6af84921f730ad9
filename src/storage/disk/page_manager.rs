use crate::error::{Error, Result};
use crate::storage::disk::store::ByteStore;
use crate::storage::page::PageId;
use log::warn;

pub const PAGE_SIZE: usize = 8192;

/// Fixed-size page access over a byte store.
pub struct PageManager {
    store: Box<dyn ByteStore>,
}

impl PageManager {
    /// Wraps an empty store.
    pub fn create(mut store: Box<dyn ByteStore>) -> Result<Self> {
        store.truncate(0)?;
        Ok(Self { store })
    }

    /// Wraps an existing store. A trailing partial page can only come from an
    /// allocation torn by a crash, so nothing references it and it is dropped.
    pub fn open(mut store: Box<dyn ByteStore>) -> Result<Self> {
        let size = store.size()?;
        let partial = size % PAGE_SIZE as u64;
        if partial != 0 {
            warn!(
                "Page file ends with a torn page ({} bytes), truncating",
                partial
            );
            store.truncate(size - partial)?;
        }
        Ok(Self { store })
    }

    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        Self::check_buffer(buf.len())?;
        self.check_bound(page_id)?;
        self.store.read_at(Self::page_offset(page_id), buf)
    }

    pub fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        Self::check_buffer(data.len())?;
        self.check_bound(page_id)?;
        self.store.write_at(Self::page_offset(page_id), data)
    }

    pub fn num_pages(&self) -> Result<u32> {
        Ok((self.store.size()? / PAGE_SIZE as u64) as u32)
    }

    /// Appends a page holding `initial` and makes it durable before returning.
    pub fn allocate_page(&mut self, initial: &[u8]) -> Result<PageId> {
        Self::check_buffer(initial.len())?;
        let page_id = PageId(self.num_pages()?);
        self.store.write_at(Self::page_offset(page_id), initial)?;
        self.store.sync()?;
        Ok(page_id)
    }

    pub fn sync(&mut self) -> Result<()> {
        self.store.sync()
    }

    fn check_bound(&self, page_id: PageId) -> Result<()> {
        let num_pages = self.num_pages()?;
        if page_id.0 >= num_pages {
            return Err(Error::CorruptStorage(format!(
                "page {} is beyond the end of the page file ({} pages)",
                page_id.0, num_pages
            )));
        }
        Ok(())
    }

    fn check_buffer(len: usize) -> Result<()> {
        if len != PAGE_SIZE {
            return Err(Error::CorruptStorage(format!(
                "page buffer must be {} bytes, got {}",
                PAGE_SIZE, len
            )));
        }
        Ok(())
    }

    fn page_offset(page_id: PageId) -> u64 {
        page_id.0 as u64 * PAGE_SIZE as u64
    }
}
