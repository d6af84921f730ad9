//! Data page layout.
//!
//! ```text
//! +-----------+----------------------------------+-------------+
//! | FSO (u16) | data items, packed back to back  | free space  |
//! +-----------+----------------------------------+-------------+
//! ```
//!
//! The free space offset (FSO) points at the first unused byte. Items are
//! only ever appended, so an offset below the FSO is never handed out twice.

use crate::error::{Error, Result};
use crate::storage::page::PageBuf;
use crate::storage::PAGE_SIZE;
use byteorder::{ByteOrder, LittleEndian};

const FSO_OFFSET: usize = 0;
pub const FSO_SIZE: usize = 2;

/// Free space of an empty data page.
pub const MAX_FREE_SPACE: usize = PAGE_SIZE - FSO_SIZE;

/// Bytes of a freshly allocated data page.
pub fn initial_page() -> Box<PageBuf> {
    let mut data = Box::new([0u8; PAGE_SIZE]);
    DataPage::new(&mut data).set_free_space_offset(FSO_SIZE);
    data
}

pub fn free_space_offset(data: &PageBuf) -> usize {
    LittleEndian::read_u16(&data[FSO_OFFSET..FSO_OFFSET + FSO_SIZE]) as usize
}

pub fn free_space(data: &PageBuf) -> usize {
    PAGE_SIZE.saturating_sub(free_space_offset(data))
}

/// Mutable view over a data page.
pub struct DataPage<'a> {
    data: &'a mut PageBuf,
}

impl<'a> DataPage<'a> {
    pub fn new(data: &'a mut PageBuf) -> Self {
        Self { data }
    }

    pub fn free_space_offset(&self) -> usize {
        free_space_offset(self.data)
    }

    pub fn free_space(&self) -> usize {
        free_space(self.data)
    }

    pub fn set_free_space_offset(&mut self, fso: usize) {
        LittleEndian::write_u16(&mut self.data[FSO_OFFSET..FSO_OFFSET + FSO_SIZE], fso as u16);
    }

    /// Overwrites bytes at `offset`.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let end = Self::check_range(offset, bytes.len())?;
        self.data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Writes an item image at `offset` and moves the FSO past it if needed.
    pub fn place(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.write_at(offset, bytes)?;
        self.reserve(offset, bytes.len())
    }

    /// Moves the FSO past `offset + len` without touching the bytes.
    pub fn reserve(&mut self, offset: usize, len: usize) -> Result<()> {
        let end = Self::check_range(offset, len)?;
        if self.free_space_offset() < end {
            self.set_free_space_offset(end);
        }
        Ok(())
    }

    pub fn read_at(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = Self::check_range(offset, len)?;
        Ok(&self.data[offset..end])
    }

    fn check_range(offset: usize, len: usize) -> Result<usize> {
        let end = offset + len;
        if offset < FSO_SIZE || end > PAGE_SIZE {
            return Err(Error::CorruptStorage(format!(
                "range {}..{} is outside the data area of a page",
                offset, end
            )));
        }
        Ok(end)
    }
}
