use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;
use tinydb::access::Uid;
use tinydb::database::{Database, DatabaseConfig, Stores};
use tinydb::storage::disk::MemoryStore;
use tinydb::storage::wal::WalConfig;
use tinydb::{Error, IsolationLevel};

/// The three stores of one database, shared with the database under test so
/// their bytes can be copied at any instant to simulate a crash.
#[derive(Clone)]
struct MemoryDisk {
    pages: MemoryStore,
    xids: MemoryStore,
    log: MemoryStore,
}

impl MemoryDisk {
    fn new() -> Self {
        Self {
            pages: MemoryStore::new(),
            xids: MemoryStore::new(),
            log: MemoryStore::new(),
        }
    }

    fn stores(&self) -> Stores {
        Stores {
            pages: Box::new(self.pages.clone()),
            xids: Box::new(self.xids.clone()),
            log: Box::new(self.log.clone()),
        }
    }

    /// Independent copy of the current bytes, as a crash would leave them.
    fn crash_image(&self) -> Self {
        Self {
            pages: MemoryStore::from_bytes(self.pages.to_bytes()),
            xids: MemoryStore::from_bytes(self.xids.to_bytes()),
            log: MemoryStore::from_bytes(self.log.to_bytes()),
        }
    }
}

fn config(cache_pages: usize) -> DatabaseConfig {
    DatabaseConfig {
        cache_pages,
        wal: WalConfig {
            sync_on_append: false,
        },
    }
}

fn memory_database() -> Result<Database> {
    Ok(Database::create_with_stores(
        MemoryDisk::new().stores(),
        config(16),
    )?)
}

fn seed(db: &Database, payload: &[u8]) -> Result<Uid> {
    let txn = db.transaction(IsolationLevel::ReadCommitted)?;
    let uid = txn.insert(payload)?;
    txn.commit()?;
    Ok(uid)
}

fn read_committed(db: &Database, uid: Uid) -> Result<Option<Vec<u8>>> {
    let txn = db.transaction(IsolationLevel::ReadCommitted)?;
    let value = txn.read(uid)?;
    txn.commit()?;
    Ok(value)
}

#[test]
fn test_commit_visibility_and_repeatable_read_snapshot() -> Result<()> {
    let db = memory_database()?;

    let rr = db.begin(IsolationLevel::RepeatableRead)?;
    let writer = db.begin(IsolationLevel::ReadCommitted)?;
    let uid = db.insert(writer, b"fresh")?;
    db.commit(writer)?;

    // Committed after rr began: still invisible to rr.
    assert_eq!(db.read(rr, uid)?, None);
    assert_eq!(read_committed(&db, uid)?, Some(b"fresh".to_vec()));

    let late_rr = db.begin(IsolationLevel::RepeatableRead)?;
    assert_eq!(db.read(late_rr, uid)?, Some(b"fresh".to_vec()));
    db.commit(rr)?;
    db.commit(late_rr)?;
    Ok(())
}

#[test]
fn test_aborted_writes_are_never_observed() -> Result<()> {
    let db = memory_database()?;
    let existing = seed(&db, b"before")?;

    let txn = db.begin(IsolationLevel::ReadCommitted)?;
    let inserted = db.insert(txn, b"ghost")?;
    db.update(txn, existing, b"ghost")?;
    db.abort(txn)?;

    for level in [IsolationLevel::ReadCommitted, IsolationLevel::RepeatableRead] {
        let reader = db.begin(level)?;
        assert_eq!(db.read(reader, inserted)?, None);
        assert_eq!(db.read(reader, existing)?, Some(b"before".to_vec()));
        db.commit(reader)?;
    }
    Ok(())
}

#[test]
fn test_round_trip_across_restart() -> Result<()> {
    let dir = tempdir()?;
    let mut rows = Vec::new();

    {
        let db = Database::create(dir.path(), DatabaseConfig::default())?;
        for i in 0..50 {
            let payload = format!("row-{}", i).into_bytes();
            rows.push((seed(&db, &payload)?, payload));
        }
        let txn = db.transaction(IsolationLevel::ReadCommitted)?;
        txn.update(rows[0].0, b"row-0-updated")?;
        txn.delete(rows[1].0)?;
        txn.commit()?;
        db.close()?;
    }

    let db = Database::open(dir.path(), DatabaseConfig::default())?;
    assert_eq!(read_committed(&db, rows[0].0)?, Some(b"row-0-updated".to_vec()));
    assert_eq!(read_committed(&db, rows[1].0)?, None);
    for (uid, payload) in &rows[2..] {
        assert_eq!(read_committed(&db, *uid)?.as_ref(), Some(payload));
    }
    Ok(())
}

#[test]
fn test_concurrent_updates_of_one_row() -> Result<()> {
    const THREADS: usize = 4;
    const INCREMENTS: usize = 10;

    let db = memory_database()?;
    let counter = seed(&db, b"0")?;

    thread::scope(|s| -> Result<()> {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| -> Result<usize> {
                    let mut retries = 0;
                    for _ in 0..INCREMENTS {
                        loop {
                            let xid = db.begin(IsolationLevel::RepeatableRead)?;
                            let current: u64 = String::from_utf8(
                                db.read(xid, counter)?.expect("counter row exists"),
                            )?
                            .parse()?;
                            match db.update(xid, counter, (current + 1).to_string().as_bytes()) {
                                Ok(()) => {
                                    db.commit(xid)?;
                                    break;
                                }
                                Err(e) if e.is_retryable() => {
                                    db.abort(xid)?;
                                    retries += 1;
                                }
                                Err(e) => return Err(e.into()),
                            }
                        }
                    }
                    Ok(retries)
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("worker panicked")?;
        }
        Ok(())
    })?;

    let expected = (THREADS * INCREMENTS).to_string().into_bytes();
    assert_eq!(read_committed(&db, counter)?, Some(expected));
    Ok(())
}

#[test]
fn test_read_committed_reader_never_loses_row_during_commits() -> Result<()> {
    const UPDATES: usize = 500;

    let db = memory_database()?;
    let uid = seed(&db, b"0")?;
    let done = AtomicBool::new(false);

    thread::scope(|s| -> Result<()> {
        let writer = s.spawn(|| -> Result<()> {
            let result = (1..=UPDATES).try_for_each(|i| -> Result<()> {
                let xid = db.begin(IsolationLevel::ReadCommitted)?;
                db.update(xid, uid, i.to_string().as_bytes())?;
                db.commit(xid)?;
                Ok(())
            });
            done.store(true, Ordering::SeqCst);
            result
        });

        let reader = db.begin(IsolationLevel::ReadCommitted)?;
        let mut reads = 0;
        let mut last = 0;
        while !done.load(Ordering::SeqCst) || reads == 0 {
            let value = db
                .read(reader, uid)?
                .unwrap_or_else(|| panic!("row vanished after {} reads", reads));
            let value: usize = String::from_utf8(value)?.parse()?;
            // Commits are observed in order, never undone.
            assert!(value >= last, "read {} after {}", value, last);
            last = value;
            reads += 1;
        }
        db.commit(reader)?;

        writer.join().expect("writer panicked")?;
        Ok(())
    })?;

    assert_eq!(
        read_committed(&db, uid)?,
        Some(UPDATES.to_string().into_bytes())
    );
    Ok(())
}

#[test]
fn test_deadlock_aborts_one_side() -> Result<()> {
    let db = memory_database()?;
    let a = seed(&db, b"a")?;
    let b = seed(&db, b"b")?;

    let t1 = db.begin(IsolationLevel::ReadCommitted)?;
    let t2 = db.begin(IsolationLevel::ReadCommitted)?;
    db.update(t1, a, b"t1")?;
    db.update(t2, b, b"t2")?;

    thread::scope(|s| -> Result<()> {
        let waiter = s.spawn(|| db.update(t2, a, b"t2"));
        while !db.version_manager().locks().is_waiting(t2) {
            thread::sleep(Duration::from_millis(2));
        }

        let err = db.update(t1, b, b"t1").expect_err("cycle must be detected");
        assert!(matches!(err, Error::DeadlockDetected { xid } if xid == t1));

        // t1 was aborted and released a, so t2 gets through.
        waiter.join().expect("waiter panicked")?;
        Ok(())
    })?;

    assert!(matches!(
        db.commit(t1),
        Err(Error::DeadlockDetected { .. })
    ));
    db.abort(t1)?;
    db.commit(t2)?;

    assert_eq!(read_committed(&db, a)?, Some(b"t2".to_vec()));
    assert_eq!(read_committed(&db, b)?, Some(b"t2".to_vec()));
    Ok(())
}

#[test]
fn test_read_committed_versus_repeatable_read() -> Result<()> {
    let db = memory_database()?;
    let uid = seed(&db, b"v1")?;

    let rc = db.begin(IsolationLevel::ReadCommitted)?;
    let rr = db.begin(IsolationLevel::RepeatableRead)?;
    assert_eq!(db.read(rc, uid)?, Some(b"v1".to_vec()));
    assert_eq!(db.read(rr, uid)?, Some(b"v1".to_vec()));

    let writer = db.begin(IsolationLevel::ReadCommitted)?;
    db.update(writer, uid, b"v2")?;

    // Uncommitted: neither sees it.
    assert_eq!(db.read(rc, uid)?, Some(b"v1".to_vec()));
    assert_eq!(db.read(rr, uid)?, Some(b"v1".to_vec()));

    db.commit(writer)?;
    assert_eq!(db.read(rc, uid)?, Some(b"v2".to_vec()));
    assert_eq!(db.read(rr, uid)?, Some(b"v1".to_vec()));

    // rr may not overwrite a version it cannot see; rc may.
    assert!(matches!(
        db.update(rr, uid, b"rr"),
        Err(Error::VisibilityConflict { .. })
    ));
    db.update(rc, uid, b"rc")?;
    db.commit(rc)?;
    db.abort(rr)?;

    assert_eq!(read_committed(&db, uid)?, Some(b"rc".to_vec()));
    Ok(())
}

/// Expected committed state plus every uid handed out so far.
#[derive(Clone, Default)]
struct Model {
    committed: HashMap<Uid, Option<Vec<u8>>>,
    known: Vec<Uid>,
}

#[test]
fn test_crash_at_every_step_recovers_committed_state() -> Result<()> {
    let disk = MemoryDisk::new();
    // A tiny cache forces uncommitted pages out to the page file.
    let db = Database::create_with_stores(disk.stores(), config(3))?;

    let mut model = Model::default();
    let mut crashes = vec![(disk.crash_image(), model.clone())];

    for round in 0..9u8 {
        let xid = db.begin(IsolationLevel::ReadCommitted)?;
        let mut pending = HashMap::new();

        let uid = db.insert(xid, &vec![round; 2000])?;
        model.known.push(uid);
        pending.insert(uid, Some(vec![round; 2000]));
        crashes.push((disk.crash_image(), model.clone()));

        if let Some(&target) = model.known.first() {
            if target != uid {
                db.update(xid, target, &vec![round + 100; 1500])?;
                pending.insert(target, Some(vec![round + 100; 1500]));
                crashes.push((disk.crash_image(), model.clone()));
            }
        }

        if round % 4 == 3 {
            let victim = model.known[1];
            if model.committed.get(&victim).is_some_and(Option::is_some) {
                db.delete(xid, victim)?;
                pending.insert(victim, None);
                crashes.push((disk.crash_image(), model.clone()));
            }
        }

        if round % 3 == 2 {
            db.abort(xid)?;
        } else {
            db.commit(xid)?;
            model.committed.extend(pending);
        }
        crashes.push((disk.crash_image(), model.clone()));
    }

    for (step, (image, expected)) in crashes.iter().enumerate() {
        let recovered = Database::open_with_stores(image.stores(), config(3))?;
        for uid in &expected.known {
            let want = expected.committed.get(uid).cloned().flatten();
            assert_eq!(
                read_committed(&recovered, *uid)?,
                want,
                "crash image {} row {}",
                step,
                uid
            );
        }
    }
    Ok(())
}

#[test]
fn test_torn_log_tail_is_discarded() -> Result<()> {
    let disk = MemoryDisk::new();
    let db = Database::create_with_stores(disk.stores(), config(16))?;

    let kept = seed(&db, b"committed")?;
    let xid = db.begin(IsolationLevel::ReadCommitted)?;
    let torn = db.insert(xid, b"in flight")?;
    db.update(xid, kept, b"in flight")?;

    // The last frame of the update is cut short.
    let image = disk.crash_image();
    let log = image.log.to_bytes();
    let image = MemoryDisk {
        log: MemoryStore::from_bytes(log[..log.len() - 5].to_vec()),
        ..image
    };

    let recovered = Database::open_with_stores(image.stores(), config(16))?;
    assert_eq!(read_committed(&recovered, kept)?, Some(b"committed".to_vec()));
    assert_eq!(read_committed(&recovered, torn)?, None);
    assert!(recovered.version_manager().transactions().is_aborted(xid)?);
    drop(recovered);

    // Recovery checkpointed: the repaired log is empty.
    assert!(image.log.is_empty());
    Ok(())
}

/// Byte offsets at which each complete log frame ends.
fn frame_ends(log: &[u8]) -> Vec<usize> {
    let mut ends = Vec::new();
    let mut at = 0;
    while at + 8 <= log.len() {
        let len = u32::from_le_bytes([log[at], log[at + 1], log[at + 2], log[at + 3]]) as usize;
        at += 8 + len;
        ends.push(at);
    }
    ends
}

fn assert_recovers_to(image: MemoryDisk, uid: Uid, expected: &[u8], xid: u64) -> Result<()> {
    let recovered = Database::open_with_stores(image.stores(), config(16))?;
    assert_eq!(read_committed(&recovered, uid)?, Some(expected.to_vec()));
    assert!(recovered.version_manager().transactions().is_aborted(xid)?);

    // The chain is still writable after the repair.
    let txn = recovered.transaction(IsolationLevel::ReadCommitted)?;
    txn.update(uid, b"after recovery")?;
    txn.commit()?;
    assert_eq!(read_committed(&recovered, uid)?, Some(b"after recovery".to_vec()));
    Ok(())
}

#[test]
fn test_crash_inside_a_single_update() -> Result<()> {
    let disk = MemoryDisk::new();
    let db = Database::create_with_stores(disk.stores(), config(16))?;
    let uid = seed(&db, b"seed")?;
    assert!(db.checkpoint()?);

    let xid = db.begin(IsolationLevel::ReadCommitted)?;
    db.update(xid, uid, b"half done")?;
    let image = disk.crash_image();
    let log = image.log.to_bytes();

    // New version, anchor swap, old version's xmax.
    let ends = frame_ends(&log);
    assert_eq!(ends.len(), 3);
    assert_eq!(ends.last(), Some(&log.len()));

    // Only the log reached the disk, cut after each record in turn.
    for cut in [0].into_iter().chain(ends.iter().copied()) {
        let prefix = MemoryDisk {
            log: MemoryStore::from_bytes(log[..cut].to_vec()),
            ..image.crash_image()
        };
        assert_recovers_to(prefix, uid, b"seed", xid)?;
    }

    // Every change of the update also reached the data file.
    db.version_manager().data_manager().buffer_pool().flush_all()?;
    assert_recovers_to(disk.crash_image(), uid, b"seed", xid)?;
    Ok(())
}

#[test]
fn test_clean_shutdown_leaves_empty_log() -> Result<()> {
    let disk = MemoryDisk::new();
    let uid = {
        let db = Database::create_with_stores(disk.stores(), config(16))?;
        let uid = seed(&db, b"stays")?;
        assert!(!disk.log.is_empty());
        db.close()?;
        uid
    };
    assert!(disk.log.is_empty());

    let db = Database::open_with_stores(disk.stores(), config(16))?;
    assert_eq!(read_committed(&db, uid)?, Some(b"stays".to_vec()));
    Ok(())
}

#[test]
fn test_transaction_ids_survive_restart() -> Result<()> {
    let disk = MemoryDisk::new();
    let last = {
        let db = Database::create_with_stores(disk.stores(), config(16))?;
        let mut last = 0;
        for _ in 0..5 {
            last = db.begin(IsolationLevel::ReadCommitted)?;
            db.commit(last)?;
        }
        db.close()?;
        last
    };

    let db = Database::open_with_stores(disk.stores(), config(16))?;
    let next = db.begin(IsolationLevel::ReadCommitted)?;
    assert_eq!(next, last + 1);
    assert!(db.version_manager().transactions().is_committed(last)?);
    db.commit(next)?;
    Ok(())
}
