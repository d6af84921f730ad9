//! On-disk layout of rows.
//!
//! A row is a chain of versions reached through an anchor item whose uid is
//! the row's identity:
//!
//! ```text
//! anchor:  [kind=1][head: u64]
//! version: [kind=2][xmin: u64][xmax: u64][prev: u64][payload]
//! ```
//!
//! `head` names the newest version and `prev` the one it replaced. Only the
//! anchor's `head` and a version's `xmax` are ever rewritten.

use byteorder::{ByteOrder, LittleEndian};

use crate::access::data_item::MAX_PAYLOAD;
use crate::access::Uid;
use crate::error::{Error, Result};
use crate::transaction::Xid;

const ANCHOR_KIND: u8 = 1;
const VERSION_KIND: u8 = 2;

pub const ANCHOR_SIZE: usize = 9;
pub const VERSION_HEADER_SIZE: usize = 25;

/// Payload offset of an anchor's `head` field.
pub const HEAD_OFFSET: usize = 1;
/// Payload offset of a version's `xmax` field.
pub const XMAX_OFFSET: usize = 9;

/// Largest row payload a version can carry.
pub const MAX_ROW_PAYLOAD: usize = MAX_PAYLOAD - VERSION_HEADER_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    pub head: Uid,
}

impl Anchor {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; ANCHOR_SIZE];
        buf[0] = ANCHOR_KIND;
        LittleEndian::write_u64(&mut buf[HEAD_OFFSET..], self.head.0);
        buf
    }

    /// `None` if `raw` is not an anchor.
    pub fn decode(raw: &[u8]) -> Option<Self> {
        if raw.len() != ANCHOR_SIZE || raw[0] != ANCHOR_KIND {
            return None;
        }
        Some(Self {
            head: Uid(LittleEndian::read_u64(&raw[HEAD_OFFSET..])),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// Creating transaction.
    pub xmin: Xid,
    /// Deleting transaction, 0 while live.
    pub xmax: Xid,
    /// The version this one replaced, `Uid::NULL` for the first.
    pub prev: Uid,
    pub payload: Vec<u8>,
}

impl Version {
    pub fn new(xmin: Xid, prev: Uid, payload: &[u8]) -> Self {
        Self {
            xmin,
            xmax: 0,
            prev,
            payload: payload.to_vec(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; VERSION_HEADER_SIZE + self.payload.len()];
        buf[0] = VERSION_KIND;
        LittleEndian::write_u64(&mut buf[1..9], self.xmin);
        LittleEndian::write_u64(&mut buf[XMAX_OFFSET..17], self.xmax);
        LittleEndian::write_u64(&mut buf[17..VERSION_HEADER_SIZE], self.prev.0);
        buf[VERSION_HEADER_SIZE..].copy_from_slice(&self.payload);
        buf
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < VERSION_HEADER_SIZE || raw[0] != VERSION_KIND {
            return Err(Error::CorruptStorage(
                "version chain points at a data item that is not a version".to_string(),
            ));
        }
        Ok(Self {
            xmin: LittleEndian::read_u64(&raw[1..9]),
            xmax: LittleEndian::read_u64(&raw[XMAX_OFFSET..17]),
            prev: Uid(LittleEndian::read_u64(&raw[17..VERSION_HEADER_SIZE])),
            payload: raw[VERSION_HEADER_SIZE..].to_vec(),
        })
    }
}
