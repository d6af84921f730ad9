//! Row lock table with deadlock detection.
//!
//! Each uid has at most one holder. A transaction waits on at most one uid at
//! a time, so the wait-for graph is a set of chains `xid -> uid -> holder`;
//! a request that would make such a chain lead back to the requester fails
//! immediately instead of blocking.

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::access::Uid;
use crate::error::{Error, Result};
use crate::transaction::Xid;

#[derive(Debug, Default)]
struct LockState {
    /// Uids held by each transaction, in acquisition order.
    held: HashMap<Xid, Vec<Uid>>,
    holder: HashMap<Uid, Xid>,
    /// Transactions waiting for each uid, in arrival order.
    queue: HashMap<Uid, VecDeque<Xid>>,
    waiting_on: HashMap<Xid, Uid>,
}

impl LockState {
    fn grant(&mut self, xid: Xid, uid: Uid) {
        self.holder.insert(uid, xid);
        self.held.entry(xid).or_default().push(uid);
    }

    /// Follows `xid -> awaited uid -> holder -> ...` and reports whether it
    /// comes back to `xid`.
    fn has_cycle(&self, xid: Xid) -> bool {
        let mut visited = HashSet::new();
        let mut current = xid;
        while visited.insert(current) {
            let Some(uid) = self.waiting_on.get(&current) else {
                return false;
            };
            let Some(&holder) = self.holder.get(uid) else {
                return false;
            };
            if holder == xid {
                return true;
            }
            current = holder;
        }
        false
    }

    fn dequeue(&mut self, xid: Xid, uid: Uid) {
        if let Some(queue) = self.queue.get_mut(&uid) {
            queue.retain(|&waiter| waiter != xid);
            if queue.is_empty() {
                self.queue.remove(&uid);
            }
        }
    }
}

/// Exclusive row locks held until commit or abort.
#[derive(Debug, Default)]
pub struct LockTable {
    state: Mutex<LockState>,
    granted: Condvar,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires `uid` for `xid`, blocking while another transaction holds it.
    /// Fails with `DeadlockDetected` if waiting would close a cycle.
    pub fn acquire(&self, xid: Xid, uid: Uid) -> Result<()> {
        let mut state = self.state.lock();
        let holder = match state.holder.get(&uid) {
            None => {
                state.grant(xid, uid);
                return Ok(());
            }
            Some(&holder) if holder == xid => return Ok(()),
            Some(&holder) => holder,
        };

        state.waiting_on.insert(xid, uid);
        state.queue.entry(uid).or_default().push_back(xid);
        if state.has_cycle(xid) {
            state.waiting_on.remove(&xid);
            state.dequeue(xid, uid);
            warn!(
                "Deadlock: transaction {} waiting for {} held by {}",
                xid, uid, holder
            );
            return Err(Error::DeadlockDetected { xid });
        }

        debug!(
            "Transaction {} waits for {} held by {}",
            xid, uid, holder
        );
        while state.waiting_on.get(&xid) == Some(&uid) {
            self.granted.wait(&mut state);
        }

        // Woken without the grant: the transaction was released while waiting.
        if state.holder.get(&uid) != Some(&xid) {
            return Err(Error::TransactionNotActive(xid));
        }
        Ok(())
    }

    /// Drops every lock of `xid`, handing each uid to its first waiter.
    pub fn release_all(&self, xid: Xid) {
        let mut state = self.state.lock();
        if let Some(uid) = state.waiting_on.remove(&xid) {
            state.dequeue(xid, uid);
        }

        for uid in state.held.remove(&xid).unwrap_or_default() {
            state.holder.remove(&uid);
            while let Some(next) = state.queue.get_mut(&uid).and_then(VecDeque::pop_front) {
                if state.waiting_on.get(&next) == Some(&uid) {
                    state.waiting_on.remove(&next);
                    state.grant(next, uid);
                    debug!("Lock on {} passed from {} to {}", uid, xid, next);
                    break;
                }
            }
            if state.queue.get(&uid).is_some_and(VecDeque::is_empty) {
                state.queue.remove(&uid);
            }
        }
        drop(state);
        self.granted.notify_all();
    }

    pub fn holder(&self, uid: Uid) -> Option<Xid> {
        self.state.lock().holder.get(&uid).copied()
    }

    pub fn held_by(&self, xid: Xid) -> Vec<Uid> {
        self.state.lock().held.get(&xid).cloned().unwrap_or_default()
    }

    pub fn is_waiting(&self, xid: Xid) -> bool {
        self.state.lock().waiting_on.contains_key(&xid)
    }
}
