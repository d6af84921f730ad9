//! Multi-Version Concurrency Control (MVCC) implementation.
//!
//! The version manager turns data items into rows with version chains and
//! coordinates the transaction table, the lock table and the data manager.
//! Readers never block; writers take the row lock of the row they change
//! and keep it until commit or abort.

use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

use super::lock::LockTable;
use super::version::{Anchor, Version, HEAD_OFFSET, MAX_ROW_PAYLOAD, XMAX_OFFSET};
use super::visibility::Snapshot;
use crate::access::{DataManager, Uid};
use crate::error::{Error, Result};
use crate::transaction::{TransactionTable, Xid, SUPER_XID};

/// Isolation levels supported by the MVCC system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read Committed: every read sees what is committed at that moment.
    #[default]
    ReadCommitted,
    /// Repeatable Read: all reads see the state as of transaction begin.
    RepeatableRead,
}

impl IsolationLevel {
    /// Whether one snapshot serves the whole transaction.
    pub fn uses_snapshot(&self) -> bool {
        matches!(self, IsolationLevel::RepeatableRead)
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IsolationLevel::ReadCommitted => write!(f, "read committed"),
            IsolationLevel::RepeatableRead => write!(f, "repeatable read"),
        }
    }
}

/// Why a transaction was aborted by the engine.
#[derive(Debug, Clone, Copy)]
enum Conflict {
    Deadlock,
    Visibility(Uid),
}

impl Conflict {
    fn of(error: &Error) -> Option<Self> {
        match error {
            Error::DeadlockDetected { .. } => Some(Conflict::Deadlock),
            Error::VisibilityConflict { uid, .. } => Some(Conflict::Visibility(*uid)),
            _ => None,
        }
    }

    fn to_error(self, xid: Xid) -> Error {
        match self {
            Conflict::Deadlock => Error::DeadlockDetected { xid },
            Conflict::Visibility(uid) => Error::VisibilityConflict { xid, uid },
        }
    }
}

/// A transaction known to the version manager.
#[derive(Debug)]
struct ActiveTransaction {
    xid: Xid,
    level: IsolationLevel,
    /// Taken at begin under Repeatable Read.
    snapshot: Option<Arc<Snapshot>>,
    /// Set once the engine aborted the transaction on a conflict.
    conflict: Mutex<Option<Conflict>>,
}

pub struct VersionManager {
    data_manager: DataManager,
    transactions: TransactionTable,
    locks: LockTable,
    active: DashMap<Xid, Arc<ActiveTransaction>>,
    /// Held while an xid is allocated, while a snapshot is taken and while
    /// checkpointing.
    begin_lock: Mutex<()>,
}

impl VersionManager {
    pub fn new(data_manager: DataManager, transactions: TransactionTable) -> Self {
        Self {
            data_manager,
            transactions,
            locks: LockTable::new(),
            active: DashMap::new(),
            begin_lock: Mutex::new(()),
        }
    }

    pub fn begin(&self, level: IsolationLevel) -> Result<Xid> {
        let _guard = self.begin_lock.lock();
        let xid = self.transactions.begin()?;

        let snapshot = if level.uses_snapshot() {
            Some(Arc::new(self.snapshot_locked(xid, level)?))
        } else {
            None
        };

        self.active.insert(
            xid,
            Arc::new(ActiveTransaction {
                xid,
                level,
                snapshot,
                conflict: Mutex::new(None),
            }),
        );
        debug!("Transaction {} began ({})", xid, level);
        Ok(xid)
    }

    pub fn commit(&self, xid: Xid) -> Result<()> {
        self.live_transaction(xid)?;
        self.transactions.commit(xid)?;
        self.locks.release_all(xid);
        self.active.remove(&xid);
        debug!("Transaction {} committed", xid);
        Ok(())
    }

    /// Aborts `xid`. Succeeds for a transaction the engine already aborted on
    /// a conflict.
    pub fn abort(&self, xid: Xid) -> Result<()> {
        let txn = self.transaction(xid)?;
        if txn.conflict.lock().is_none() {
            self.transactions.abort(xid)?;
            self.locks.release_all(xid);
        }
        self.active.remove(&xid);
        debug!("Transaction {} aborted", xid);
        Ok(())
    }

    /// Creates a row and returns its uid. The row stays locked by `xid`.
    pub fn insert(&self, xid: Xid, payload: &[u8]) -> Result<Uid> {
        let txn = self.live_transaction(xid)?;
        Self::check_payload(payload)?;

        let head = self
            .data_manager
            .insert(txn.xid, &Version::new(xid, Uid::NULL, payload).encode())?;
        let uid = self
            .data_manager
            .insert(txn.xid, &Anchor { head }.encode())?;
        self.locks.acquire(xid, uid)?;
        Ok(uid)
    }

    /// Payload of the newest version of the row visible to `xid`.
    pub fn read(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>> {
        let txn = self.live_transaction(xid)?;
        let snapshot = self.read_snapshot(&txn)?;
        let Some(anchor) = self.read_anchor(uid)? else {
            return Ok(None);
        };
        Ok(self
            .visible_version(&snapshot, anchor.head)?
            .map(|(_, version)| version.payload))
    }

    /// Replaces the row's payload. The row keeps its uid.
    pub fn update(&self, xid: Xid, uid: Uid, payload: &[u8]) -> Result<()> {
        let txn = self.live_transaction(xid)?;
        Self::check_payload(payload)?;

        let result = self.write_target(&txn, uid).and_then(|target| {
            let new_head = self
                .data_manager
                .insert(xid, &Version::new(xid, target, payload).encode())?;
            self.data_manager
                .update(xid, uid, HEAD_OFFSET, &new_head.0.to_le_bytes())?;
            self.data_manager
                .update(xid, target, XMAX_OFFSET, &xid.to_le_bytes())
        });
        self.abort_on_conflict(&txn, result)
    }

    pub fn delete(&self, xid: Xid, uid: Uid) -> Result<()> {
        let txn = self.live_transaction(xid)?;
        let result = self.write_target(&txn, uid).and_then(|target| {
            self.data_manager
                .update(xid, target, XMAX_OFFSET, &xid.to_le_bytes())
        });
        self.abort_on_conflict(&txn, result)
    }

    /// The row registered as the database's entry point, if any.
    pub fn root(&self) -> Result<Option<Uid>> {
        let root = self.data_manager.root()?;
        Ok((!root.is_null()).then_some(root))
    }

    /// Registers `uid` as the entry point. The change is durable on its own,
    /// outside any transaction, so the row should already be committed.
    pub fn set_root(&self, uid: Uid) -> Result<()> {
        if self.read_anchor(uid)?.is_none() {
            return Err(Error::ResourceNotFound(format!("row {} was freed", uid)));
        }
        // A checkpoint must not truncate the record before the page holds it.
        let _guard = self.begin_lock.lock();
        self.data_manager.set_root(SUPER_XID, uid)?;
        info!("Root row is now {}", uid);
        Ok(())
    }

    /// Flushes all pages and empties the log if no transaction is running.
    /// Returns whether the checkpoint was taken.
    pub fn checkpoint(&self) -> Result<bool> {
        let _guard = self.begin_lock.lock();
        if !self.running_xids().is_empty() {
            debug!("Checkpoint skipped: transactions are running");
            return Ok(false);
        }
        self.data_manager.checkpoint()?;
        Ok(true)
    }

    /// Aborts whatever is still running and closes the data file cleanly.
    pub fn close(&self) -> Result<()> {
        let xids: Vec<Xid> = self.active.iter().map(|entry| *entry.key()).collect();
        for xid in xids {
            warn!("Aborting transaction {} left open at close", xid);
            self.abort(xid)?;
        }
        let _guard = self.begin_lock.lock();
        self.data_manager.close()
    }

    /// Transactions that are neither finished nor aborted by the engine.
    pub fn running_xids(&self) -> Vec<Xid> {
        let mut xids: Vec<Xid> = self
            .active
            .iter()
            .filter(|entry| entry.value().conflict.lock().is_none())
            .map(|entry| *entry.key())
            .collect();
        xids.sort_unstable();
        xids
    }

    pub fn data_manager(&self) -> &DataManager {
        &self.data_manager
    }

    pub fn transactions(&self) -> &TransactionTable {
        &self.transactions
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    fn transaction(&self, xid: Xid) -> Result<Arc<ActiveTransaction>> {
        self.active
            .get(&xid)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(Error::TransactionNotActive(xid))
    }

    /// Like `transaction`, but a transaction aborted on a conflict reports
    /// that conflict again.
    fn live_transaction(&self, xid: Xid) -> Result<Arc<ActiveTransaction>> {
        let txn = self.transaction(xid)?;
        let conflict = *txn.conflict.lock();
        match conflict {
            Some(conflict) => Err(conflict.to_error(xid)),
            None => Ok(txn),
        }
    }

    /// The snapshot an operation of `txn` reads through: the one taken at
    /// begin under Repeatable Read, a fresh one under Read Committed.
    fn read_snapshot(&self, txn: &ActiveTransaction) -> Result<Arc<Snapshot>> {
        match &txn.snapshot {
            Some(snapshot) => Ok(Arc::clone(snapshot)),
            None => {
                let _guard = self.begin_lock.lock();
                Ok(Arc::new(self.snapshot_locked(txn.xid, txn.level)?))
            }
        }
    }

    /// Records which transactions are running right now. Callers hold
    /// `begin_lock`, so no xid is allocated without being registered.
    fn snapshot_locked(&self, xid: Xid, level: IsolationLevel) -> Result<Snapshot> {
        let horizon = self.transactions.len();
        let candidates: Vec<Xid> = self.active.iter().map(|entry| *entry.key()).collect();
        let mut running = HashSet::new();
        for other in candidates {
            if other != xid && self.transactions.is_active(other)? {
                running.insert(other);
            }
        }
        Ok(Snapshot::new(xid, level, horizon, running))
    }

    fn check_payload(payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_ROW_PAYLOAD {
            return Err(Error::PayloadTooLarge {
                size: payload.len(),
                max: MAX_ROW_PAYLOAD,
            });
        }
        Ok(())
    }

    fn abort_on_conflict<T>(&self, txn: &ActiveTransaction, result: Result<T>) -> Result<T> {
        if let Err(error) = &result {
            if let Some(conflict) = Conflict::of(error) {
                let xid = txn.xid;
                warn!("Aborting transaction {}: {}", xid, error);
                *txn.conflict.lock() = Some(conflict);
                self.transactions.abort(xid)?;
                self.locks.release_all(xid);
            }
        }
        result
    }

    fn read_anchor(&self, uid: Uid) -> Result<Option<Anchor>> {
        match self.data_manager.read(uid)? {
            None => Ok(None),
            Some(raw) => Anchor::decode(&raw)
                .map(Some)
                .ok_or_else(|| Error::ResourceNotFound(format!("{} is not a row", uid))),
        }
    }

    /// Walks the chain from `head` to the first version visible to `snapshot`.
    fn visible_version(&self, snapshot: &Snapshot, head: Uid) -> Result<Option<(Uid, Version)>> {
        self.find_version(head, |version| snapshot.is_visible(version, &self.transactions))
    }

    /// Newest version whose creator did not abort.
    fn latest_version(&self, head: Uid) -> Result<Option<(Uid, Version)>> {
        self.find_version(head, |version| {
            Ok(!self.transactions.is_aborted(version.xmin)?)
        })
    }

    fn find_version<F>(&self, head: Uid, mut accept: F) -> Result<Option<(Uid, Version)>>
    where
        F: FnMut(&Version) -> Result<bool>,
    {
        let mut cursor = head;
        while !cursor.is_null() {
            let Some(raw) = self.data_manager.read(cursor)? else {
                return Ok(None);
            };
            let version = Version::decode(&raw)?;
            if accept(&version)? {
                return Ok(Some((cursor, version)));
            }
            cursor = version.prev;
        }
        Ok(None)
    }

    /// Locks the row and returns the version a write by `txn` replaces.
    fn write_target(&self, txn: &ActiveTransaction, uid: Uid) -> Result<Uid> {
        let xid = txn.xid;
        self.locks.acquire(xid, uid)?;
        // Taken after the lock so a Read Committed writer sees the commit of
        // the transaction it waited for.
        let snapshot = self.read_snapshot(txn)?;

        let anchor = self
            .read_anchor(uid)?
            .ok_or_else(|| Error::ResourceNotFound(format!("row {}", uid)))?;
        let (visible_uid, visible) = self
            .visible_version(&snapshot, anchor.head)?
            .ok_or_else(|| Error::ResourceNotFound(format!("row {}", uid)))?;

        let newer_exists = self
            .latest_version(anchor.head)?
            .is_some_and(|(latest_uid, _)| latest_uid != visible_uid);
        let deleted_unseen = visible.xmax != 0
            && visible.xmax != xid
            && self.transactions.is_committed(visible.xmax)?;
        if newer_exists || deleted_unseen {
            return Err(Error::VisibilityConflict { xid, uid });
        }
        Ok(visible_uid)
    }
}
