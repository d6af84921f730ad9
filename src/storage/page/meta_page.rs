//! Page 0: engine metadata.
//!
//! Holds the clean-shutdown marker. On open a random stamp is written at
//! `STAMP_OFFSET`; a clean close copies it right behind. If the two copies
//! differ on the next open the engine did not shut down cleanly and the log
//! has to be replayed.
//!
//! The root uid at `ROOT_OFFSET` is the one entry point a layer above can
//! find again after a restart. It is changed through the log like any other
//! byte of the data file; the stamps are not.

use byteorder::{ByteOrder, LittleEndian};

use crate::storage::page::{PageBuf, PageId};
use crate::storage::PAGE_SIZE;
use rand::Rng;

pub const META_PAGE_ID: PageId = PageId(0);

const STAMP_OFFSET: usize = 100;
const STAMP_LEN: usize = 8;

pub const ROOT_OFFSET: usize = STAMP_OFFSET + 2 * STAMP_LEN;
pub const ROOT_LEN: usize = 8;

pub fn initial_page() -> Box<PageBuf> {
    let mut data = Box::new([0u8; PAGE_SIZE]);
    mark_open(&mut data);
    data
}

pub fn mark_open(data: &mut PageBuf) {
    rand::thread_rng().fill(&mut data[STAMP_OFFSET..STAMP_OFFSET + STAMP_LEN]);
}

pub fn mark_closed(data: &mut PageBuf) {
    data.copy_within(
        STAMP_OFFSET..STAMP_OFFSET + STAMP_LEN,
        STAMP_OFFSET + STAMP_LEN,
    );
}

pub fn is_clean(data: &PageBuf) -> bool {
    data[STAMP_OFFSET..STAMP_OFFSET + STAMP_LEN]
        == data[STAMP_OFFSET + STAMP_LEN..STAMP_OFFSET + 2 * STAMP_LEN]
}

/// Raw root uid; zero while none was ever set.
pub fn root(data: &PageBuf) -> u64 {
    LittleEndian::read_u64(&data[ROOT_OFFSET..ROOT_OFFSET + ROOT_LEN])
}
