use log::info;

use crate::error::{Error, Result};
use crate::storage::wal::{LogRecord, WalManager};
use crate::storage::BufferPoolManager;
use crate::transaction::{TransactionTable, Xid};

/// Recovery statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Number of records read from the log.
    pub records_analyzed: usize,
    /// Number of records redone.
    pub records_redone: usize,
    /// Number of records undone (skipped undos are not counted).
    pub records_undone: usize,
    /// Transactions found active and marked aborted.
    pub transactions_aborted: usize,
}

pub struct Recovery<'a> {
    buffer_pool: &'a BufferPoolManager,
    wal: &'a WalManager,
    transactions: &'a TransactionTable,
}

impl<'a> Recovery<'a> {
    pub fn new(
        buffer_pool: &'a BufferPoolManager,
        wal: &'a WalManager,
        transactions: &'a TransactionTable,
    ) -> Self {
        Self {
            buffer_pool,
            wal,
            transactions,
        }
    }

    pub fn recover(&self) -> Result<RecoveryStats> {
        let mut stats = RecoveryStats::default();
        let records = self.wal.records()?;
        stats.records_analyzed = records.len();

        self.redo_phase(&records, &mut stats)?;
        self.undo_phase(&records, &mut stats)?;

        for xid in self.transactions.active_xids() {
            self.transactions.abort(xid)?;
            stats.transactions_aborted += 1;
        }

        self.buffer_pool.flush_all()?;
        self.wal.truncate()?;

        info!(
            "Recovery finished: {} records, {} redone, {} undone, {} transactions aborted",
            stats.records_analyzed,
            stats.records_redone,
            stats.records_undone,
            stats.transactions_aborted
        );
        Ok(stats)
    }

    fn redo_phase(&self, records: &[LogRecord], stats: &mut RecoveryStats) -> Result<()> {
        for record in records {
            if self.is_committed(record.xid())? {
                let page = self.buffer_pool.fetch_page(record.page_id())?;
                record.redo(&mut page.write())?;
                stats.records_redone += 1;
            }
        }
        Ok(())
    }

    fn undo_phase(&self, records: &[LogRecord], stats: &mut RecoveryStats) -> Result<()> {
        for record in records.iter().rev() {
            if !self.is_committed(record.xid())? {
                let page = self.buffer_pool.fetch_page(record.page_id())?;
                if record.undo(&mut page.write())? {
                    stats.records_undone += 1;
                }
            }
        }
        Ok(())
    }

    /// An xid the table never recorded cannot have committed.
    fn is_committed(&self, xid: Xid) -> Result<bool> {
        match self.transactions.is_committed(xid) {
            Ok(committed) => Ok(committed),
            Err(Error::ResourceNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
