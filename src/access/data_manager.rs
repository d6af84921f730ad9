//! Data manager: variable-length data items inside pages.
//!
//! Every byte the engine changes in the data file goes through
//! [`DataManager::log_and_apply`]: the change is appended to the log first and
//! only then applied to the cached page.

use log::{debug, info};

use super::data_item::{self, Uid, MAX_PAYLOAD};
use super::page_index::PageIndex;
use crate::error::{Error, Result};
use crate::recovery::Recovery;
use crate::storage::buffer::lru::LruReplacer;
use crate::storage::page::{data_page, meta_page, PageBuf, PageId};
use crate::storage::wal::{InsertRecord, LogRecord, UpdateRecord, WalManager};
use crate::storage::{BufferPoolManager, PageManager, PageRef, PAGE_SIZE};
use crate::transaction::{TransactionTable, Xid};

/// Page selections an insert may lose to concurrent inserts before giving up.
const MAX_INSERT_ATTEMPTS: usize = 5;

pub struct DataManager {
    buffer_pool: BufferPoolManager,
    wal: WalManager,
    page_index: PageIndex,
}

impl DataManager {
    /// Initializes a new data file: writes the meta page and starts with no
    /// data pages.
    pub fn create(page_manager: PageManager, wal: WalManager, cache_pages: usize) -> Result<Self> {
        let buffer_pool = Self::buffer_pool_for(page_manager, cache_pages);
        buffer_pool.new_page(&meta_page::initial_page())?;

        Ok(Self {
            buffer_pool,
            wal,
            page_index: PageIndex::new(),
        })
    }

    /// Opens an existing data file, recovering it first if the last shutdown
    /// was not clean.
    pub fn open(
        page_manager: PageManager,
        wal: WalManager,
        cache_pages: usize,
        transactions: &TransactionTable,
    ) -> Result<Self> {
        let buffer_pool = Self::buffer_pool_for(page_manager, cache_pages);
        if buffer_pool.num_pages()? == 0 {
            return Err(Error::CorruptStorage("data file has no meta page".to_string()));
        }

        let clean = meta_page::is_clean(&buffer_pool.fetch_page(meta_page::META_PAGE_ID)?.read());
        if !clean {
            info!("Data file was not closed cleanly, running recovery");
            Recovery::new(&buffer_pool, &wal, transactions).recover()?;
        }

        {
            let meta = buffer_pool.fetch_page(meta_page::META_PAGE_ID)?;
            meta_page::mark_open(&mut meta.write());
        }
        buffer_pool.flush_page(meta_page::META_PAGE_ID)?;

        let page_index = PageIndex::new();
        for page_no in 1..buffer_pool.num_pages()? {
            let page_id = PageId(page_no);
            let page = buffer_pool.fetch_page(page_id)?;
            let free = data_page::free_space(&page.read());
            page_index.add(page_id, free);
        }

        Ok(Self {
            buffer_pool,
            wal,
            page_index,
        })
    }

    fn buffer_pool_for(page_manager: PageManager, cache_pages: usize) -> BufferPoolManager {
        BufferPoolManager::new(
            page_manager,
            Box::new(LruReplacer::new(cache_pages)),
            cache_pages,
        )
    }

    /// Stores `payload` as a new data item on behalf of `xid`.
    pub fn insert(&self, xid: Xid, payload: &[u8]) -> Result<Uid> {
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD,
            });
        }
        let raw = data_item::wrap(payload);

        for _ in 0..MAX_INSERT_ATTEMPTS {
            let Some((page_id, free)) = self.page_index.select(raw.len()) else {
                let page_id = self.buffer_pool.new_page(&data_page::initial_page())?;
                debug!("Allocated data page {}", page_id);
                self.page_index.add(page_id, data_page::MAX_FREE_SPACE);
                continue;
            };

            match self.insert_into(page_id, xid, &raw) {
                Ok((uid, free_after)) => {
                    self.page_index.add(page_id, free_after);
                    if let Some(uid) = uid {
                        return Ok(uid);
                    }
                }
                Err(e) => {
                    self.page_index.add(page_id, free);
                    return Err(e);
                }
            }
        }
        Err(Error::DatabaseBusy)
    }

    fn insert_into(&self, page_id: PageId, xid: Xid, raw: &[u8]) -> Result<(Option<Uid>, usize)> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        let mut data = page.write();
        if data_page::free_space(&data) < raw.len() {
            return Ok((None, data_page::free_space(&data)));
        }

        let offset = data_page::free_space_offset(&data) as u16;
        let record = LogRecord::Insert(InsertRecord {
            xid,
            page_id,
            offset,
            image: raw.to_vec(),
        });
        self.log_and_apply(&record, &mut data)?;
        Ok((Some(Uid::new(page_id, offset)), data_page::free_space(&data)))
    }

    /// Payload of the item, `None` once it has been freed.
    pub fn read(&self, uid: Uid) -> Result<Option<Vec<u8>>> {
        let page = self.fetch_item_page(uid)?;
        let data = page.read();
        Ok(data_item::locate(&data, uid.offset() as usize)?.map(|range| data[range].to_vec()))
    }

    /// Overwrites `bytes.len()` payload bytes starting at payload offset `at`.
    pub fn update(&self, xid: Xid, uid: Uid, at: usize, bytes: &[u8]) -> Result<()> {
        let page = self.fetch_item_page(uid)?;
        let mut data = page.write();
        let range = data_item::locate(&data, uid.offset() as usize)?
            .ok_or_else(|| Error::ResourceNotFound(format!("data item {} was freed", uid)))?;

        let start = range.start + at;
        let end = start + bytes.len();
        if end > range.end {
            return Err(Error::CorruptStorage(format!(
                "write of {} bytes at {} overruns data item {} of {} bytes",
                bytes.len(),
                at,
                uid,
                range.len()
            )));
        }

        let record = LogRecord::Update(UpdateRecord {
            xid,
            page_id: uid.page_id(),
            offset: start as u16,
            before: data[start..end].to_vec(),
            after: bytes.to_vec(),
        });
        self.log_and_apply(&record, &mut data)
    }

    /// Marks the item invalid. Its space is not reused.
    pub fn free(&self, xid: Xid, uid: Uid) -> Result<()> {
        let page = self.fetch_item_page(uid)?;
        let mut data = page.write();
        if data_item::locate(&data, uid.offset() as usize)?.is_none() {
            return Ok(());
        }

        let record = LogRecord::Update(UpdateRecord {
            xid,
            page_id: uid.page_id(),
            offset: uid.offset(),
            before: vec![data_item::VALID],
            after: vec![data_item::INVALID],
        });
        self.log_and_apply(&record, &mut data)
    }

    /// The uid stored in the meta page's root slot, `Uid::NULL` if unset.
    pub fn root(&self) -> Result<Uid> {
        let meta = self.buffer_pool.fetch_page(meta_page::META_PAGE_ID)?;
        let root = meta_page::root(&meta.read());
        Ok(Uid(root))
    }

    /// Points the root slot at `uid` on behalf of `xid`.
    pub fn set_root(&self, xid: Xid, uid: Uid) -> Result<()> {
        let meta = self.buffer_pool.fetch_page(meta_page::META_PAGE_ID)?;
        let mut data = meta.write();
        let start = meta_page::ROOT_OFFSET;
        let record = LogRecord::Update(UpdateRecord {
            xid,
            page_id: meta_page::META_PAGE_ID,
            offset: start as u16,
            before: data[start..start + meta_page::ROOT_LEN].to_vec(),
            after: uid.0.to_le_bytes().to_vec(),
        });
        self.log_and_apply(&record, &mut data)?;
        debug!("Root set to {}", uid);
        Ok(())
    }

    /// Appends `record` to the log and applies it to `data`, the locked bytes
    /// of the page it names.
    pub fn log_and_apply(&self, record: &LogRecord, data: &mut PageBuf) -> Result<()> {
        self.wal.append(record)?;
        record.redo(data)
    }

    /// Forces every cached page to disk and empties the log. Callers make sure
    /// no transaction is active.
    pub fn checkpoint(&self) -> Result<()> {
        self.buffer_pool.flush_all()?;
        self.wal.truncate()?;
        info!("Checkpoint complete");
        Ok(())
    }

    /// Checkpoints and stamps the meta page as cleanly closed.
    pub fn close(&self) -> Result<()> {
        self.checkpoint()?;
        {
            let meta = self.buffer_pool.fetch_page(meta_page::META_PAGE_ID)?;
            meta_page::mark_closed(&mut meta.write());
        }
        self.buffer_pool.flush_page(meta_page::META_PAGE_ID)
    }

    pub fn buffer_pool(&self) -> &BufferPoolManager {
        &self.buffer_pool
    }

    pub fn wal(&self) -> &WalManager {
        &self.wal
    }

    fn fetch_item_page(&self, uid: Uid) -> Result<PageRef> {
        let page_id = uid.page_id();
        let in_page = (uid.0 & 0xffff_ffff) < PAGE_SIZE as u64;
        if !in_page
            || page_id == meta_page::META_PAGE_ID
            || page_id.0 >= self.buffer_pool.num_pages()?
        {
            return Err(Error::ResourceNotFound(format!("data item {}", uid)));
        }
        self.buffer_pool.fetch_page(page_id)
    }
}
