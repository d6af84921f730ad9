//! Version visibility under Read Committed and Repeatable Read.

use std::collections::HashSet;

use super::mvcc::IsolationLevel;
use super::version::Version;
use crate::error::Result;
use crate::transaction::{TransactionTable, Xid};

/// What a read may see: its own transaction, every transaction that finished
/// before the snapshot was taken, and nothing else. Under Repeatable Read one
/// snapshot is taken at begin; under Read Committed each read and write takes
/// a fresh one, so a single chain walk never mixes two views of the table.
#[derive(Debug, Clone)]
pub struct Snapshot {
    xid: Xid,
    level: IsolationLevel,
    /// Newest xid begun when the snapshot was taken.
    horizon: Xid,
    /// Transactions running when the snapshot was taken.
    active: HashSet<Xid>,
}

impl Snapshot {
    pub fn new(xid: Xid, level: IsolationLevel, horizon: Xid, active: HashSet<Xid>) -> Self {
        Self {
            xid,
            level,
            horizon,
            active,
        }
    }

    pub fn xid(&self) -> Xid {
        self.xid
    }

    pub fn level(&self) -> IsolationLevel {
        self.level
    }

    /// Whether `other` must be treated as uncommitted regardless of its
    /// status: it was running when the snapshot was taken, or began later.
    pub fn is_in_flight(&self, other: Xid) -> bool {
        other != self.xid && (other > self.horizon || self.active.contains(&other))
    }

    fn is_committed_for_me(&self, xid: Xid, transactions: &TransactionTable) -> Result<bool> {
        if self.is_in_flight(xid) {
            return Ok(false);
        }
        transactions.is_committed(xid)
    }

    pub fn is_visible(&self, version: &Version, transactions: &TransactionTable) -> Result<bool> {
        let created = version.xmin == self.xid
            || self.is_committed_for_me(version.xmin, transactions)?;
        if !created {
            return Ok(false);
        }

        let deleted = version.xmax != 0
            && (version.xmax == self.xid
                || self.is_committed_for_me(version.xmax, transactions)?);
        Ok(!deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Uid;
    use crate::storage::disk::MemoryStore;
    use crate::transaction::SUPER_XID;

    fn version(xmin: Xid, xmax: Xid) -> Version {
        let mut v = Version::new(xmin, Uid::NULL, b"v");
        v.xmax = xmax;
        v
    }

    #[test]
    fn test_read_committed() -> Result<()> {
        let table = TransactionTable::create(Box::new(MemoryStore::new()))?;
        let committed = table.begin()?;
        let me = table.begin()?;
        let running = table.begin()?;
        let aborted = table.begin()?;
        table.commit(committed)?;
        table.abort(aborted)?;

        let active = [running].into_iter().collect();
        let snapshot = Snapshot::new(me, IsolationLevel::ReadCommitted, aborted, active);

        assert!(snapshot.is_visible(&version(SUPER_XID, 0), &table)?);
        assert!(snapshot.is_visible(&version(committed, 0), &table)?);
        assert!(snapshot.is_visible(&version(me, 0), &table)?);
        assert!(!snapshot.is_visible(&version(running, 0), &table)?);
        assert!(!snapshot.is_visible(&version(aborted, 0), &table)?);

        assert!(!snapshot.is_visible(&version(committed, me), &table)?);
        assert!(!snapshot.is_visible(&version(committed, committed), &table)?);
        assert!(snapshot.is_visible(&version(committed, running), &table)?);
        assert!(snapshot.is_visible(&version(committed, aborted), &table)?);

        // Committing mid-read changes nothing for this snapshot; the next
        // read takes a new one and sees it.
        table.commit(running)?;
        assert!(!snapshot.is_visible(&version(running, 0), &table)?);
        assert!(snapshot.is_visible(&version(committed, running), &table)?);

        let next = Snapshot::new(me, IsolationLevel::ReadCommitted, aborted, HashSet::new());
        assert!(next.is_visible(&version(running, 0), &table)?);
        assert!(!next.is_visible(&version(committed, running), &table)?);
        Ok(())
    }

    #[test]
    fn test_repeatable_read_ignores_in_flight() -> Result<()> {
        let table = TransactionTable::create(Box::new(MemoryStore::new()))?;
        let before = table.begin()?;
        let concurrent = table.begin()?;
        table.commit(before)?;
        let me = table.begin()?;
        let later = table.begin()?;

        let active = [concurrent].into_iter().collect();
        let snapshot = Snapshot::new(me, IsolationLevel::RepeatableRead, me, active);

        table.commit(concurrent)?;
        table.commit(later)?;

        assert!(snapshot.is_visible(&version(before, 0), &table)?);
        assert!(!snapshot.is_visible(&version(concurrent, 0), &table)?);
        assert!(!snapshot.is_visible(&version(later, 0), &table)?);

        // Deletions by in-flight transactions are ignored.
        assert!(snapshot.is_visible(&version(before, concurrent), &table)?);
        assert!(snapshot.is_visible(&version(before, later), &table)?);
        assert!(!snapshot.is_visible(&version(before, me), &table)?);

        assert!(snapshot.is_in_flight(later));
        assert!(!snapshot.is_in_flight(before));
        Ok(())
    }
}
