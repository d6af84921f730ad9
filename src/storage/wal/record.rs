//! Log record types.

use serde::{Deserialize, Serialize};

use crate::access::data_item;
use crate::error::{Error, Result};
use crate::storage::page::{DataPage, PageBuf, PageId};
use crate::transaction::Xid;

/// A data item placed at `offset`. `image` is the raw item, header included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertRecord {
    pub xid: Xid,
    pub page_id: PageId,
    pub offset: u16,
    pub image: Vec<u8>,
}

/// An in-place overwrite of `before.len()` bytes starting at the absolute
/// page offset `offset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub xid: Xid,
    pub page_id: PageId,
    pub offset: u16,
    pub before: Vec<u8>,
    pub after: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogRecord {
    Insert(InsertRecord),
    Update(UpdateRecord),
}

impl LogRecord {
    pub fn xid(&self) -> Xid {
        match self {
            LogRecord::Insert(r) => r.xid,
            LogRecord::Update(r) => r.xid,
        }
    }

    pub fn page_id(&self) -> PageId {
        match self {
            LogRecord::Insert(r) => r.page_id,
            LogRecord::Update(r) => r.page_id,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }

    /// Applies the record's effect to the page. Applying it twice leaves the
    /// page as applying it once.
    pub fn redo(&self, data: &mut PageBuf) -> Result<()> {
        let mut page = DataPage::new(data);
        match self {
            LogRecord::Insert(r) => page.place(r.offset as usize, &r.image),
            LogRecord::Update(r) => page.write_at(r.offset as usize, &r.after),
        }
    }

    /// Reverts the record's effect. An inserted item gets an invalid header
    /// that keeps its size, and its region stays reserved. An update restores
    /// the before image only while the after image is still in place. Returns
    /// whether the page changed.
    pub fn undo(&self, data: &mut PageBuf) -> Result<bool> {
        let mut page = DataPage::new(data);
        match self {
            LogRecord::Insert(r) => {
                let offset = r.offset as usize;
                let mut header = r
                    .image
                    .get(..data_item::HEADER_SIZE)
                    .ok_or_else(|| {
                        Error::CorruptStorage(format!(
                            "insert record for {} offset {} has no item header",
                            r.page_id, r.offset
                        ))
                    })?
                    .to_vec();
                header[0] = data_item::INVALID;
                page.write_at(offset, &header)?;
                page.reserve(offset, r.image.len())?;
                Ok(true)
            }
            LogRecord::Update(r) => {
                let offset = r.offset as usize;
                if page.read_at(offset, r.after.len())? != r.after.as_slice() {
                    return Ok(false);
                }
                page.write_at(offset, &r.before)?;
                Ok(true)
            }
        }
    }
}
