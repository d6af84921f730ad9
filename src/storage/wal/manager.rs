//! WAL manager implementation.
//!
//! The log lives in a single byte store. Records are appended one frame at a
//! time; a frame that is cut short or fails its checksum marks the end of the
//! log and everything after it is discarded when the log is opened.

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};
use parking_lot::Mutex;

use super::record::LogRecord;
use crate::error::Result;
use crate::storage::disk::ByteStore;

/// Frame header: payload length followed by its checksum.
const FRAME_HEADER_SIZE: usize = 8;

const CHECKSUM_SEED: u32 = 13331;

/// WAL manager configuration.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Whether every append is synced before it returns.
    pub sync_on_append: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        WalConfig {
            sync_on_append: true,
        }
    }
}

/// Append-only log of page mutations.
pub struct WalManager {
    config: WalConfig,
    store: Mutex<Box<dyn ByteStore>>,
}

impl WalManager {
    /// Starts an empty log on `store`.
    pub fn create(mut store: Box<dyn ByteStore>, config: WalConfig) -> Result<Self> {
        store.truncate(0)?;
        store.sync()?;
        Ok(WalManager {
            config,
            store: Mutex::new(store),
        })
    }

    /// Opens an existing log, cutting off a torn or corrupt tail.
    pub fn open(mut store: Box<dyn ByteStore>, config: WalConfig) -> Result<Self> {
        let bytes = read_all(store.as_mut())?;
        let mut iter = WalIterator::new(bytes);
        let count = iter.by_ref().count();
        let valid_len = iter.position() as u64;
        let size = store.size()?;

        if valid_len < size {
            warn!(
                "Log has a bad tail after {} records, truncating {} bytes",
                count,
                size - valid_len
            );
            store.truncate(valid_len)?;
            store.sync()?;
        }

        Ok(WalManager {
            config,
            store: Mutex::new(store),
        })
    }

    /// Appends one record. When `sync_on_append` is set the record is durable
    /// once this returns.
    pub fn append(&self, record: &LogRecord) -> Result<()> {
        let payload = record.serialize()?;
        let mut frame = vec![0u8; FRAME_HEADER_SIZE + payload.len()];
        LittleEndian::write_u32(&mut frame[0..4], payload.len() as u32);
        LittleEndian::write_u32(&mut frame[4..8], checksum(&payload));
        frame[FRAME_HEADER_SIZE..].copy_from_slice(&payload);

        let mut store = self.store.lock();
        store.append(&frame)?;
        if self.config.sync_on_append {
            store.sync()?;
        }
        Ok(())
    }

    /// Replays the log from the start.
    pub fn iter(&self) -> Result<WalIterator> {
        let mut store = self.store.lock();
        let bytes = read_all(store.as_mut())?;
        Ok(WalIterator::new(bytes))
    }

    pub fn records(&self) -> Result<Vec<LogRecord>> {
        Ok(self.iter()?.collect())
    }

    /// Empties the log. Only valid once every logged change is on disk.
    pub fn truncate(&self) -> Result<()> {
        let mut store = self.store.lock();
        store.truncate(0)?;
        store.sync()?;
        debug!("Log truncated");
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.store.lock().sync()
    }

    pub fn size(&self) -> Result<u64> {
        self.store.lock().size()
    }
}

/// Iterator over the records of a log image. Stops at the first frame that is
/// incomplete or fails its checksum.
pub struct WalIterator {
    bytes: Vec<u8>,
    position: usize,
}

impl WalIterator {
    fn new(bytes: Vec<u8>) -> Self {
        Self { bytes, position: 0 }
    }

    /// Byte offset just past the last record returned.
    pub fn position(&self) -> usize {
        self.position
    }
}

impl Iterator for WalIterator {
    type Item = LogRecord;

    fn next(&mut self) -> Option<LogRecord> {
        let rest = &self.bytes[self.position..];
        if rest.len() < FRAME_HEADER_SIZE {
            return None;
        }

        let len = LittleEndian::read_u32(&rest[0..4]) as usize;
        let expected = LittleEndian::read_u32(&rest[4..8]);
        let payload = rest.get(FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + len)?;
        if checksum(payload) != expected {
            return None;
        }

        let record = LogRecord::deserialize(payload).ok()?;
        self.position += FRAME_HEADER_SIZE + len;
        Some(record)
    }
}

fn checksum(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| {
        acc.wrapping_mul(CHECKSUM_SEED).wrapping_add(b as u32)
    })
}

fn read_all(store: &mut dyn ByteStore) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; store.size()? as usize];
    store.read_at(0, &mut bytes)?;
    Ok(bytes)
}
