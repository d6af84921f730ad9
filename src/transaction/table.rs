//! Persistent transaction status table.
//!
//! ```text
//! +----------------+------+------+-----+------+
//! | counter (u64)  | xid1 | xid2 | ... | xidN |
//! +----------------+------+------+-----+------+
//! ```
//!
//! Statuses are cached in memory and written through; every change is synced
//! before the call returns.

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};

use super::state::TransactionState;
use super::{Xid, SUPER_XID};
use crate::error::{Error, Result};
use crate::storage::disk::ByteStore;

const HEADER_SIZE: u64 = 8;

pub struct TransactionTable {
    /// Serializes xid allocation and status writes.
    store: Mutex<Box<dyn ByteStore>>,
    /// Status of xid `i + 1` at index `i`.
    statuses: RwLock<Vec<TransactionState>>,
}

impl TransactionTable {
    pub fn create(mut store: Box<dyn ByteStore>) -> Result<Self> {
        store.truncate(0)?;
        store.write_at(0, &[0u8; HEADER_SIZE as usize])?;
        store.sync()?;
        Ok(Self {
            store: Mutex::new(store),
            statuses: RwLock::new(Vec::new()),
        })
    }

    pub fn open(mut store: Box<dyn ByteStore>) -> Result<Self> {
        let size = store.size()?;
        if size < HEADER_SIZE {
            return Err(Error::CorruptStorage(format!(
                "transaction table is {} bytes, shorter than its header",
                size
            )));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        store.read_at(0, &mut header)?;
        let counter = LittleEndian::read_u64(&header);
        let expected = HEADER_SIZE + counter;

        if size < expected {
            return Err(Error::CorruptStorage(format!(
                "transaction table holds {} bytes but its counter needs {}",
                size, expected
            )));
        }
        if size > expected {
            // A begin that wrote its status byte but never bumped the counter.
            warn!(
                "Transaction table has {} stray bytes, truncating",
                size - expected
            );
            store.truncate(expected)?;
            store.sync()?;
        }

        let mut bytes = vec![0u8; counter as usize];
        store.read_at(HEADER_SIZE, &mut bytes)?;
        let statuses = bytes
            .into_iter()
            .map(TransactionState::from_byte)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            store: Mutex::new(store),
            statuses: RwLock::new(statuses),
        })
    }

    /// Allocates the next xid and durably records it as active.
    pub fn begin(&self) -> Result<Xid> {
        let mut store = self.store.lock();
        let xid = self.statuses.read().len() as Xid + 1;

        store.write_at(Self::status_offset(xid), &[TransactionState::Active.to_byte()])?;
        store.sync()?;
        let mut header = [0u8; HEADER_SIZE as usize];
        LittleEndian::write_u64(&mut header, xid);
        store.write_at(0, &header)?;
        store.sync()?;

        self.statuses.write().push(TransactionState::Active);
        debug!("Transaction {} began", xid);
        Ok(xid)
    }

    pub fn commit(&self, xid: Xid) -> Result<()> {
        self.set_state(xid, TransactionState::Committed)
    }

    pub fn abort(&self, xid: Xid) -> Result<()> {
        self.set_state(xid, TransactionState::Aborted)
    }

    pub fn state(&self, xid: Xid) -> Result<TransactionState> {
        if xid == SUPER_XID {
            return Ok(TransactionState::Committed);
        }
        self.statuses
            .read()
            .get(xid as usize - 1)
            .copied()
            .ok_or_else(|| Error::ResourceNotFound(format!("transaction {}", xid)))
    }

    pub fn is_active(&self, xid: Xid) -> Result<bool> {
        Ok(self.state(xid)?.is_active())
    }

    pub fn is_committed(&self, xid: Xid) -> Result<bool> {
        Ok(self.state(xid)?.is_committed())
    }

    pub fn is_aborted(&self, xid: Xid) -> Result<bool> {
        Ok(self.state(xid)?.is_aborted())
    }

    /// Xids still marked active, in ascending order.
    pub fn active_xids(&self) -> Vec<Xid> {
        self.statuses
            .read()
            .iter()
            .enumerate()
            .filter(|(_, state)| state.is_active())
            .map(|(i, _)| i as Xid + 1)
            .collect()
    }

    /// Number of xids handed out so far.
    pub fn len(&self) -> u64 {
        self.statuses.read().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn set_state(&self, xid: Xid, new_state: TransactionState) -> Result<()> {
        let mut store = self.store.lock();
        let current = self.state(xid)?;
        if current == new_state {
            return Ok(());
        }
        if current.is_finished() {
            return Err(Error::TransactionNotActive(xid));
        }

        store.write_at(Self::status_offset(xid), &[new_state.to_byte()])?;
        store.sync()?;
        self.statuses.write()[xid as usize - 1] = new_state;
        debug!("Transaction {} is now {}", xid, new_state);
        Ok(())
    }

    fn status_offset(xid: Xid) -> u64 {
        HEADER_SIZE + xid - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::{FileStore, MemoryStore};
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn test_begin_commit_abort() -> Result<()> {
        let table = TransactionTable::create(Box::new(MemoryStore::new()))?;

        let t1 = table.begin()?;
        let t2 = table.begin()?;
        assert_eq!((t1, t2), (1, 2));
        assert!(table.is_active(t1)?);

        table.commit(t1)?;
        table.abort(t2)?;
        assert!(table.is_committed(t1)?);
        assert!(table.is_aborted(t2)?);
        assert!(table.active_xids().is_empty());
        Ok(())
    }

    #[test]
    fn test_super_xid_is_committed() -> Result<()> {
        let table = TransactionTable::create(Box::new(MemoryStore::new()))?;
        assert!(table.is_committed(SUPER_XID)?);
        assert!(!table.is_active(SUPER_XID)?);
        assert!(table.abort(SUPER_XID).is_err());
        Ok(())
    }

    #[test]
    fn test_final_states_do_not_change() -> Result<()> {
        let table = TransactionTable::create(Box::new(MemoryStore::new()))?;
        let xid = table.begin()?;
        table.commit(xid)?;

        // Same final state again is a no-op.
        table.commit(xid)?;
        assert!(matches!(
            table.abort(xid),
            Err(Error::TransactionNotActive(x)) if x == xid
        ));
        assert!(table.is_committed(xid)?);
        Ok(())
    }

    #[test]
    fn test_unknown_xid() -> Result<()> {
        let table = TransactionTable::create(Box::new(MemoryStore::new()))?;
        table.begin()?;
        assert!(matches!(table.state(5), Err(Error::ResourceNotFound(_))));
        assert!(table.commit(5).is_err());
        Ok(())
    }

    #[test]
    fn test_reopen_preserves_statuses() -> Result<()> {
        let store = MemoryStore::new();
        {
            let table = TransactionTable::create(Box::new(store.clone()))?;
            let t1 = table.begin()?;
            let t2 = table.begin()?;
            table.begin()?;
            table.commit(t1)?;
            table.abort(t2)?;
        }

        let table = TransactionTable::open(Box::new(store))?;
        assert_eq!(table.len(), 3);
        assert_eq!(table.state(1)?, TransactionState::Committed);
        assert_eq!(table.state(2)?, TransactionState::Aborted);
        assert_eq!(table.active_xids(), vec![3]);
        assert_eq!(table.begin()?, 4);
        Ok(())
    }

    #[test]
    fn test_open_repairs_and_rejects() -> Result<()> {
        // Counter says 1 but a second status byte made it to disk.
        let mut bytes = vec![0u8; 8];
        LittleEndian::write_u64(&mut bytes, 1);
        bytes.extend_from_slice(&[1, 0]);
        let store = MemoryStore::from_bytes(bytes);
        let table = TransactionTable::open(Box::new(store.clone()))?;
        assert_eq!(table.len(), 1);
        assert_eq!(store.len(), 9);

        // Counter says 5 but only 2 bytes follow.
        let mut bytes = vec![0u8; 8];
        LittleEndian::write_u64(&mut bytes, 5);
        bytes.extend_from_slice(&[1, 1]);
        assert!(matches!(
            TransactionTable::open(Box::new(MemoryStore::from_bytes(bytes))),
            Err(Error::CorruptStorage(_))
        ));

        assert!(TransactionTable::open(Box::new(MemoryStore::from_bytes(vec![0; 3]))).is_err());
        Ok(())
    }

    #[test]
    fn test_concurrent_begin_allocates_unique_xids() -> Result<()> {
        let table = Arc::new(TransactionTable::create(Box::new(MemoryStore::new()))?);
        let mut handles = vec![];

        for _ in 0..4 {
            let table = Arc::clone(&table);
            handles.push(thread::spawn(move || -> Result<Vec<Xid>> {
                (0..25).map(|_| table.begin()).collect()
            }));
        }

        let mut all = vec![];
        for handle in handles {
            all.extend(handle.join().expect("thread panicked")?);
        }
        all.sort();
        assert_eq!(all, (1..=100).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn test_file_persistence() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.xid");
        {
            let table = TransactionTable::create(Box::new(FileStore::create(&path)?))?;
            let xid = table.begin()?;
            table.commit(xid)?;
        }
        let table = TransactionTable::open(Box::new(FileStore::open(&path)?))?;
        assert!(table.is_committed(1)?);
        Ok(())
    }
}
