//! Database facade over the three files of a data directory.

use log::{info, warn};
use std::path::Path;

use crate::access::{DataManager, Uid};
use crate::concurrency::{IsolationLevel, VersionManager};
use crate::error::{Error, Result};
use crate::storage::disk::{ByteStore, FileStore};
use crate::storage::wal::{WalConfig, WalManager};
use crate::storage::PageManager;
use crate::transaction::{TransactionTable, Xid};

pub const DATA_FILE: &str = "tinydb.db";
pub const XID_FILE: &str = "tinydb.xid";
pub const LOG_FILE: &str = "tinydb.log";

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Capacity of the page cache, in pages.
    pub cache_pages: usize,
    pub wal: WalConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            cache_pages: 64,
            wal: WalConfig::default(),
        }
    }
}

/// The stores backing one database.
pub struct Stores {
    pub pages: Box<dyn ByteStore>,
    pub xids: Box<dyn ByteStore>,
    pub log: Box<dyn ByteStore>,
}

/// High-level database interface that integrates all layers
pub struct Database {
    version_manager: VersionManager,
    closed: bool,
}

impl Database {
    /// Create a new database in `dir`
    pub fn create(dir: &Path, config: DatabaseConfig) -> Result<Self> {
        if dir.join(DATA_FILE).exists() {
            return Err(Error::DuplicateDefinition(format!(
                "database already exists in {}",
                dir.display()
            )));
        }
        std::fs::create_dir_all(dir)?;

        Self::create_with_stores(
            Stores {
                pages: Box::new(FileStore::create(&dir.join(DATA_FILE))?),
                xids: Box::new(FileStore::create(&dir.join(XID_FILE))?),
                log: Box::new(FileStore::create(&dir.join(LOG_FILE))?),
            },
            config,
        )
    }

    /// Open the database in `dir`, recovering it if it was not closed cleanly
    pub fn open(dir: &Path, config: DatabaseConfig) -> Result<Self> {
        for file in [DATA_FILE, XID_FILE, LOG_FILE] {
            if !dir.join(file).exists() {
                return Err(Error::ResourceNotFound(format!(
                    "{} in {}",
                    file,
                    dir.display()
                )));
            }
        }

        Self::open_with_stores(
            Stores {
                pages: Box::new(FileStore::open(&dir.join(DATA_FILE))?),
                xids: Box::new(FileStore::open(&dir.join(XID_FILE))?),
                log: Box::new(FileStore::open(&dir.join(LOG_FILE))?),
            },
            config,
        )
    }

    pub fn open_or_create(dir: &Path, config: DatabaseConfig) -> Result<Self> {
        if dir.join(DATA_FILE).exists() {
            Self::open(dir, config)
        } else {
            Self::create(dir, config)
        }
    }

    pub fn create_with_stores(stores: Stores, config: DatabaseConfig) -> Result<Self> {
        let data_manager = DataManager::create(
            PageManager::create(stores.pages)?,
            WalManager::create(stores.log, config.wal)?,
            config.cache_pages,
        )?;
        let transactions = TransactionTable::create(stores.xids)?;
        info!("Created database");

        Ok(Self {
            version_manager: VersionManager::new(data_manager, transactions),
            closed: false,
        })
    }

    pub fn open_with_stores(stores: Stores, config: DatabaseConfig) -> Result<Self> {
        let transactions = TransactionTable::open(stores.xids)?;
        let data_manager = DataManager::open(
            PageManager::open(stores.pages)?,
            WalManager::open(stores.log, config.wal)?,
            config.cache_pages,
            &transactions,
        )?;
        info!(
            "Opened database ({} transactions on record)",
            transactions.len()
        );

        Ok(Self {
            version_manager: VersionManager::new(data_manager, transactions),
            closed: false,
        })
    }

    pub fn begin(&self, level: IsolationLevel) -> Result<Xid> {
        self.version_manager.begin(level)
    }

    pub fn commit(&self, xid: Xid) -> Result<()> {
        self.version_manager.commit(xid)
    }

    pub fn abort(&self, xid: Xid) -> Result<()> {
        self.version_manager.abort(xid)
    }

    pub fn insert(&self, xid: Xid, payload: &[u8]) -> Result<Uid> {
        self.version_manager.insert(xid, payload)
    }

    pub fn read(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>> {
        self.version_manager.read(xid, uid)
    }

    pub fn update(&self, xid: Xid, uid: Uid, payload: &[u8]) -> Result<()> {
        self.version_manager.update(xid, uid, payload)
    }

    pub fn delete(&self, xid: Xid, uid: Uid) -> Result<()> {
        self.version_manager.delete(xid, uid)
    }

    /// The row registered as the entry point of this database, if any.
    pub fn root(&self) -> Result<Option<Uid>> {
        self.version_manager.root()
    }

    /// Registers a committed row as the entry point. Survives restarts.
    pub fn set_root(&self, uid: Uid) -> Result<()> {
        self.version_manager.set_root(uid)
    }

    /// Begins a transaction that aborts when dropped unless committed.
    pub fn transaction(&self, level: IsolationLevel) -> Result<Transaction<'_>> {
        Ok(Transaction {
            database: self,
            xid: self.begin(level)?,
            finished: false,
        })
    }

    /// Flushes every page and empties the log. Skipped (returns false) while
    /// transactions are running.
    pub fn checkpoint(&self) -> Result<bool> {
        self.version_manager.checkpoint()
    }

    /// Aborts running transactions and closes the files cleanly.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.version_manager.close()?;
        info!("Database closed");
        Ok(())
    }

    pub fn version_manager(&self) -> &VersionManager {
        &self.version_manager
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if !self.closed {
            // Best effort close on drop
            if let Err(e) = self.version_manager.close() {
                warn!("Failed to close database: {}", e);
            }
        }
    }
}

/// A transaction handle. Aborts the transaction when dropped unless it was
/// committed or aborted explicitly.
pub struct Transaction<'a> {
    database: &'a Database,
    xid: Xid,
    finished: bool,
}

impl Transaction<'_> {
    pub fn xid(&self) -> Xid {
        self.xid
    }

    pub fn insert(&self, payload: &[u8]) -> Result<Uid> {
        self.database.insert(self.xid, payload)
    }

    pub fn read(&self, uid: Uid) -> Result<Option<Vec<u8>>> {
        self.database.read(self.xid, uid)
    }

    pub fn update(&self, uid: Uid, payload: &[u8]) -> Result<()> {
        self.database.update(self.xid, uid, payload)
    }

    pub fn delete(&self, uid: Uid) -> Result<()> {
        self.database.delete(self.xid, uid)
    }

    pub fn commit(mut self) -> Result<()> {
        self.database.commit(self.xid)?;
        self.finished = true;
        Ok(())
    }

    pub fn abort(mut self) -> Result<()> {
        self.finished = true;
        self.database.abort(self.xid)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.database.abort(self.xid) {
                warn!("Failed to abort transaction {} on drop: {}", self.xid, e);
            }
        }
    }
}
