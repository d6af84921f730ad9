//! Data item layout and the uid that addresses it.
//!
//! ```text
//! +-----------+-------------+-----------------+
//! | valid (1) | size (u16)  | payload (size)  |
//! +-----------+-------------+-----------------+
//! ```

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::storage::page::data_page::{self, MAX_FREE_SPACE};
use crate::storage::page::{PageBuf, PageId};
use crate::storage::PAGE_SIZE;

pub const VALID: u8 = 1;
pub const INVALID: u8 = 0;

pub const HEADER_SIZE: usize = 3;

/// Largest payload that fits in an empty data page.
pub const MAX_PAYLOAD: usize = MAX_FREE_SPACE - HEADER_SIZE;

/// Address of a data item: page id in the high 32 bits, byte offset within
/// the page in the low bits. Page 0 holds no items, so `Uid(0)` never names one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Uid(pub u64);

impl Uid {
    pub const NULL: Uid = Uid(0);

    pub fn new(page_id: PageId, offset: u16) -> Self {
        Uid(((page_id.0 as u64) << 32) | offset as u64)
    }

    pub fn page_id(&self) -> PageId {
        PageId((self.0 >> 32) as u32)
    }

    pub fn offset(&self) -> u16 {
        (self.0 & 0xffff_ffff) as u16
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Uid {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse::<u64>().map(Uid)
    }
}

/// Builds the raw image of a valid item holding `payload`.
pub fn wrap(payload: &[u8]) -> Vec<u8> {
    let mut raw = vec![0u8; HEADER_SIZE + payload.len()];
    raw[0] = VALID;
    LittleEndian::write_u16(&mut raw[1..3], payload.len() as u16);
    raw[HEADER_SIZE..].copy_from_slice(payload);
    raw
}

/// Payload range of the item at `offset`, or `None` if the item is invalid.
///
/// Items are packed back to back from the page header up to the FSO, so the
/// item starts are found by walking their size fields. Any other offset does
/// not name an item.
pub fn locate(data: &PageBuf, offset: usize) -> Result<Option<std::ops::Range<usize>>> {
    let fso = data_page::free_space_offset(data).min(PAGE_SIZE);
    let mut cursor = data_page::FSO_SIZE;
    while cursor < offset && cursor + HEADER_SIZE <= fso {
        cursor += HEADER_SIZE + item_size(data, cursor);
    }
    if cursor != offset || offset + HEADER_SIZE > fso {
        return Err(Error::ResourceNotFound(format!(
            "no data item at offset {}",
            offset
        )));
    }

    let size = item_size(data, offset);
    let start = offset + HEADER_SIZE;
    match data[offset] {
        VALID if start + size <= fso => Ok(Some(start..start + size)),
        VALID => Err(Error::CorruptStorage(format!(
            "data item at offset {} claims {} bytes past the end of the page",
            offset, size
        ))),
        INVALID => Ok(None),
        flag => Err(Error::CorruptStorage(format!(
            "data item at offset {} has flag byte {}",
            offset, flag
        ))),
    }
}

fn item_size(data: &PageBuf, offset: usize) -> usize {
    LittleEndian::read_u16(&data[offset + 1..offset + HEADER_SIZE]) as usize
}
