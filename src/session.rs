//! Line-oriented command interpreter over a database.
//!
//! ```text
//! begin [rc|rr]          start a transaction (read committed by default)
//! commit | abort         finish it
//! insert <text>          create a row, prints its uid
//! read <uid>             print the row as seen by the transaction
//! update <uid> <text>    replace the row's payload
//! delete <uid>           delete the row
//! checkpoint             flush pages and empty the log when idle
//! root <uid>             register a committed row as the entry point
//! show                   print the entry point and running transactions
//! ```
//!
//! Outside `begin`/`commit` every command runs in its own read committed
//! transaction.

use anyhow::{anyhow, bail, Result};
use log::{debug, warn};

use crate::access::Uid;
use crate::concurrency::IsolationLevel;
use crate::database::Database;
use crate::transaction::Xid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Begin(IsolationLevel),
    Commit,
    Abort,
    Insert(String),
    Read(Uid),
    Update(Uid, String),
    Delete(Uid),
    Checkpoint,
    SetRoot(Uid),
    Show,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "begin" => match rest.to_ascii_lowercase().as_str() {
                "" | "rc" => Command::Begin(IsolationLevel::ReadCommitted),
                "rr" => Command::Begin(IsolationLevel::RepeatableRead),
                other => bail!("unknown isolation level '{}', expected rc or rr", other),
            },
            "commit" => Command::Commit,
            "abort" => Command::Abort,
            "checkpoint" => Command::Checkpoint,
            "show" => Command::Show,
            "root" => Command::SetRoot(parse_uid(rest)?),
            "insert" => Command::Insert(rest.to_string()),
            "read" => Command::Read(parse_uid(rest)?),
            "delete" => Command::Delete(parse_uid(rest)?),
            "update" => {
                let (uid, text) = rest
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| anyhow!("usage: update <uid> <text>"))?;
                Command::Update(parse_uid(uid)?, text.trim().to_string())
            }
            "" => bail!("empty command"),
            other => bail!("unknown command '{}'", other),
        };
        Ok(command)
    }
}

fn parse_uid(s: &str) -> Result<Uid> {
    s.trim()
        .parse()
        .map_err(|_| anyhow!("invalid uid '{}'", s.trim()))
}

/// One client's conversation with the database.
pub struct Session<'a> {
    database: &'a Database,
    current: Option<Xid>,
}

impl<'a> Session<'a> {
    pub fn new(database: &'a Database) -> Self {
        Self {
            database,
            current: None,
        }
    }

    /// The explicit transaction in progress, if any.
    pub fn current_transaction(&self) -> Option<Xid> {
        self.current
    }

    /// Runs one command line and renders the outcome, errors included.
    pub fn execute(&mut self, line: &str) -> String {
        match self.execute_command(line) {
            Ok(output) => output,
            Err(e) => format!("error: {}", e),
        }
    }

    pub fn execute_command(&mut self, line: &str) -> Result<String> {
        let command = Command::parse(line)?;
        debug!("Executing {:?}", command);

        match command {
            Command::Begin(level) => {
                if let Some(xid) = self.current {
                    bail!("transaction {} is already in progress", xid);
                }
                let xid = self.database.begin(level)?;
                self.current = Some(xid);
                Ok(format!("begin {} ({})", xid, level))
            }
            Command::Commit => {
                let xid = self.take_current()?;
                self.commit_or_abort(xid)?;
                Ok(format!("commit {}", xid))
            }
            Command::Abort => {
                let xid = self.take_current()?;
                self.database.abort(xid)?;
                Ok(format!("abort {}", xid))
            }
            Command::Checkpoint => {
                if self.database.checkpoint()? {
                    Ok("checkpoint done".to_string())
                } else {
                    Ok("checkpoint skipped: transactions are running".to_string())
                }
            }
            Command::SetRoot(uid) => {
                self.database.set_root(uid)?;
                Ok(format!("root {}", uid))
            }
            Command::Show => self.show(),
            other => self.run_in_transaction(other),
        }
    }

    fn show(&self) -> Result<String> {
        let root = match self.database.root()? {
            Some(uid) => uid.to_string(),
            None => "(none)".to_string(),
        };
        let running = self.database.version_manager().running_xids();
        let running = if running.is_empty() {
            "(none)".to_string()
        } else {
            running
                .iter()
                .map(|xid| match self.current {
                    Some(current) if current == *xid => format!("{}*", xid),
                    _ => xid.to_string(),
                })
                .collect::<Vec<_>>()
                .join(" ")
        };
        Ok(format!("root: {}\nrunning: {}", root, running))
    }

    /// A commit that fails leaves the transaction active in the engine, so it
    /// is aborted before the error is reported.
    fn commit_or_abort(&self, xid: Xid) -> Result<()> {
        let Err(e) = self.database.commit(xid) else {
            return Ok(());
        };
        if let Err(abort_error) = self.database.abort(xid) {
            warn!(
                "Failed to abort transaction {} after its commit failed: {}",
                xid, abort_error
            );
        }
        Err(anyhow::Error::from(e).context(format!("transaction {} aborted", xid)))
    }

    fn take_current(&mut self) -> Result<Xid> {
        self.current
            .take()
            .ok_or_else(|| anyhow!("no transaction in progress"))
    }

    fn run_in_transaction(&mut self, command: Command) -> Result<String> {
        let Some(xid) = self.current else {
            let xid = self.database.begin(IsolationLevel::ReadCommitted)?;
            return match self.apply(xid, command) {
                Ok(output) => {
                    self.commit_or_abort(xid)?;
                    Ok(output)
                }
                Err(e) => {
                    self.database.abort(xid)?;
                    Err(e)
                }
            };
        };

        match self.apply(xid, command) {
            Err(e) if e.downcast_ref::<crate::Error>().is_some_and(|e| e.is_retryable()) => {
                // The engine already aborted it; forget it here too.
                self.current = None;
                self.database.abort(xid)?;
                Err(e.context(format!("transaction {} aborted", xid)))
            }
            result => result,
        }
    }

    fn apply(&self, xid: Xid, command: Command) -> Result<String> {
        let output = match command {
            Command::Insert(text) => self.database.insert(xid, text.as_bytes())?.to_string(),
            Command::Read(uid) => match self.database.read(xid, uid)? {
                Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                None => "(none)".to_string(),
            },
            Command::Update(uid, text) => {
                self.database.update(xid, uid, text.as_bytes())?;
                format!("updated {}", uid)
            }
            Command::Delete(uid) => {
                self.database.delete(xid, uid)?;
                format!("deleted {}", uid)
            }
            other => bail!("{:?} cannot run inside a transaction", other),
        };
        Ok(output)
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if let Some(xid) = self.current.take() {
            if let Err(e) = self.database.abort(xid) {
                warn!("Failed to abort transaction {} on drop: {}", xid, e);
            }
        }
    }
}
