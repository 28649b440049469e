//! Durable run history using redb.
//!
//! # Table design
//!
//! ```text
//! runs      run id                  -> JSON ChainRun
//! active    chain name              -> run id   (Pending or Running)
//! finished  [outcome | ended | id]  -> run id   (terminal runs)
//! ```
//!
//! `active` holds at most one row per chain, so inserting into it inside the
//! same write transaction that first records a run is the single-flight
//! check. `finished` keys are 25 bytes: an outcome byte (succeeded or not),
//! the end timestamp in big-endian milliseconds, then the UUID. Byte order
//! equals time order within an outcome, so "last N" is a reverse range scan.
//!
//! The database file is opened per operation and released afterwards, so
//! several `chain` processes can share one ledger. redb refuses a second
//! concurrent open; that case is retried with a short backoff.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use redb::{Database, DatabaseError, ReadableTable, TableDefinition};
use uuid::Uuid;

use crate::error::{ChainError, Result};
use crate::run::{ChainRun, RunState};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const RUNS: TableDefinition<&str, &[u8]> = TableDefinition::new("runs");
const ACTIVE: TableDefinition<&str, &str> = TableDefinition::new("active");
const FINISHED: TableDefinition<&[u8], &str> = TableDefinition::new("finished");

const OUTCOME_SUCCEEDED: u8 = 1;
const OUTCOME_UNSUCCESSFUL: u8 = 2;

const OPEN_RETRY_DELAY: Duration = Duration::from_millis(20);
const OPEN_RETRY_LIMIT: u32 = 500;

fn db_err(e: impl Display) -> ChainError {
    ChainError::Ledger(e.to_string())
}

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn outcome_of(state: RunState) -> u8 {
    if state == RunState::Succeeded {
        OUTCOME_SUCCEEDED
    } else {
        OUTCOME_UNSUCCESSFUL
    }
}

fn finished_key(run: &ChainRun) -> Result<[u8; 25]> {
    let id = Uuid::parse_str(&run.id).map_err(db_err)?;
    let mut key = [0u8; 25];
    key[0] = outcome_of(run.state);
    let ms = run.finished_at().timestamp_millis().max(0) as u64;
    key[1..9].copy_from_slice(&ms.to_be_bytes());
    key[9..].copy_from_slice(id.as_bytes());
    Ok(key)
}

fn outcome_bounds(outcome: u8) -> ([u8; 25], [u8; 25]) {
    let mut lower = [0u8; 25];
    lower[0] = outcome;
    let mut upper = [0xffu8; 25];
    upper[0] = outcome;
    (lower, upper)
}

fn ended_at(key: &[u8]) -> Option<DateTime<Utc>> {
    let ms: [u8; 8] = key.get(1..9)?.try_into().ok()?;
    DateTime::from_timestamp_millis(u64::from_be_bytes(ms) as i64)
}

fn decode(bytes: &[u8]) -> Result<ChainRun> {
    serde_json::from_slice(bytes).map_err(db_err)
}

// ---------------------------------------------------------------------------
// RunLedger
// ---------------------------------------------------------------------------

/// Persistent store of `ChainRun` records.
#[derive(Debug, Clone)]
pub struct RunLedger {
    path: PathBuf,
}

impl RunLedger {
    /// Open or create the ledger at `path`, creating all tables.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let ledger = Self {
            path: path.to_path_buf(),
        };
        let db = ledger.connect()?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(RUNS).map_err(db_err)?;
        wt.open_table(ACTIVE).map_err(db_err)?;
        wt.open_table(FINISHED).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(ledger)
    }

    fn connect(&self) -> Result<Database> {
        let mut attempts = 0;
        loop {
            match Database::create(&self.path) {
                Ok(db) => return Ok(db),
                Err(DatabaseError::DatabaseAlreadyOpen) if attempts < OPEN_RETRY_LIMIT => {
                    attempts += 1;
                    std::thread::sleep(OPEN_RETRY_DELAY);
                }
                Err(e) => return Err(db_err(e)),
            }
        }
    }

    /// Record a new run and take its chain's active slot.
    ///
    /// Fails with `Concurrency` (and writes nothing) if another run of the
    /// same chain is pending or running.
    pub fn claim(&self, run: &ChainRun) -> Result<()> {
        let value = serde_json::to_vec(run).map_err(db_err)?;
        let db = self.connect()?;
        let wt = db.begin_write().map_err(db_err)?;
        {
            let mut active = wt.open_table(ACTIVE).map_err(db_err)?;
            let holder = active
                .get(run.chain_name.as_str())
                .map_err(db_err)?
                .map(|g| g.value().to_string());
            if let Some(run_id) = holder {
                // Dropping the uncommitted transaction discards it.
                return Err(ChainError::Concurrency {
                    chain: run.chain_name.clone(),
                    run_id,
                });
            }
            active
                .insert(run.chain_name.as_str(), run.id.as_str())
                .map_err(db_err)?;
            let mut runs = wt.open_table(RUNS).map_err(db_err)?;
            runs.insert(run.id.as_str(), value.as_slice()).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        tracing::debug!(chain = %run.chain_name, run = %run.id, "claimed active slot");
        Ok(())
    }

    /// Persist the current state of `run` (a checkpoint).
    ///
    /// Terminal runs release the chain's active slot and enter the recency
    /// index. A run that is already terminal in the ledger cannot be
    /// rewritten.
    pub fn append(&self, run: &ChainRun) -> Result<()> {
        let value = serde_json::to_vec(run).map_err(db_err)?;
        let finished = if run.is_terminal() {
            Some(finished_key(run)?)
        } else {
            None
        };

        let db = self.connect()?;
        let wt = db.begin_write().map_err(db_err)?;
        {
            let mut runs = wt.open_table(RUNS).map_err(db_err)?;
            let previous = runs
                .get(run.id.as_str())
                .map_err(db_err)?
                .map(|g| decode(g.value()))
                .transpose()?;
            if let Some(prev) = &previous {
                if prev.is_terminal() {
                    return Err(ChainError::Ledger(format!(
                        "run {} is already {} and cannot be updated",
                        run.id, prev.state
                    )));
                }
            }
            runs.insert(run.id.as_str(), value.as_slice()).map_err(db_err)?;

            let mut active = wt.open_table(ACTIVE).map_err(db_err)?;
            let holder = active
                .get(run.chain_name.as_str())
                .map_err(db_err)?
                .map(|g| g.value().to_string());
            match (finished, holder) {
                (Some(key), holder) => {
                    if holder.as_deref() == Some(run.id.as_str()) {
                        active.remove(run.chain_name.as_str()).map_err(db_err)?;
                    }
                    let mut index = wt.open_table(FINISHED).map_err(db_err)?;
                    index.insert(key.as_slice(), run.id.as_str()).map_err(db_err)?;
                }
                (None, Some(other)) if other != run.id => {
                    return Err(ChainError::Concurrency {
                        chain: run.chain_name.clone(),
                        run_id: other,
                    });
                }
                (None, Some(_)) => {}
                (None, None) => {
                    active
                        .insert(run.chain_name.as_str(), run.id.as_str())
                        .map_err(db_err)?;
                }
            }
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    pub fn find(&self, id: &str) -> Result<Option<ChainRun>> {
        let db = self.connect()?;
        let rt = db.begin_read().map_err(db_err)?;
        let runs = rt.open_table(RUNS).map_err(db_err)?;
        let found = runs.get(id).map_err(db_err)?;
        found.map(|g| decode(g.value())).transpose()
    }

    /// The active (pending or running) run of `chain`, if any.
    pub fn active_for(&self, chain: &str) -> Result<Option<ChainRun>> {
        let db = self.connect()?;
        let rt = db.begin_read().map_err(db_err)?;
        let active = rt.open_table(ACTIVE).map_err(db_err)?;
        let Some(id) = active.get(chain).map_err(db_err)?.map(|g| g.value().to_string()) else {
            return Ok(None);
        };
        let runs = rt.open_table(RUNS).map_err(db_err)?;
        let found = runs.get(id.as_str()).map_err(db_err)?;
        found.map(|g| decode(g.value())).transpose()
    }

    /// All active runs, oldest first.
    pub fn list_running(&self) -> Result<Vec<ChainRun>> {
        let db = self.connect()?;
        let rt = db.begin_read().map_err(db_err)?;
        let active = rt.open_table(ACTIVE).map_err(db_err)?;
        let runs = rt.open_table(RUNS).map_err(db_err)?;

        let mut result = Vec::new();
        for entry in active.iter().map_err(db_err)? {
            let (_, id) = entry.map_err(db_err)?;
            if let Some(g) = runs.get(id.value()).map_err(db_err)? {
                result.push(decode(g.value())?);
            }
        }
        result.sort_by_key(|r| r.started_at.unwrap_or(r.created_at));
        Ok(result)
    }

    /// Most recent succeeded runs, newest first.
    pub fn list_completed(&self, limit: usize) -> Result<Vec<ChainRun>> {
        self.list_finished(OUTCOME_SUCCEEDED, limit)
    }

    /// Most recent failed or aborted runs, newest first.
    pub fn list_failed(&self, limit: usize) -> Result<Vec<ChainRun>> {
        self.list_finished(OUTCOME_UNSUCCESSFUL, limit)
    }

    fn list_finished(&self, outcome: u8, limit: usize) -> Result<Vec<ChainRun>> {
        let (lower, upper) = outcome_bounds(outcome);
        let db = self.connect()?;
        let rt = db.begin_read().map_err(db_err)?;
        let index = rt.open_table(FINISHED).map_err(db_err)?;
        let runs = rt.open_table(RUNS).map_err(db_err)?;

        let mut result = Vec::new();
        for entry in index
            .range(lower.as_slice()..=upper.as_slice())
            .map_err(db_err)?
            .rev()
        {
            if result.len() >= limit {
                break;
            }
            let (_, id) = entry.map_err(db_err)?;
            if let Some(g) = runs.get(id.value()).map_err(db_err)? {
                result.push(decode(g.value())?);
            }
        }
        Ok(result)
    }

    /// Time of the latest chain activity: the newest end time in the
    /// recency index, or the creation time of an active run if later.
    pub fn last_activity(&self) -> Result<Option<DateTime<Utc>>> {
        let db = self.connect()?;
        let rt = db.begin_read().map_err(db_err)?;
        let index = rt.open_table(FINISHED).map_err(db_err)?;
        let active = rt.open_table(ACTIVE).map_err(db_err)?;
        let runs = rt.open_table(RUNS).map_err(db_err)?;

        let mut latest: Option<DateTime<Utc>> = None;
        for outcome in [OUTCOME_SUCCEEDED, OUTCOME_UNSUCCESSFUL] {
            let (lower, upper) = outcome_bounds(outcome);
            let newest = index
                .range(lower.as_slice()..=upper.as_slice())
                .map_err(db_err)?
                .next_back()
                .transpose()
                .map_err(db_err)?;
            if let Some((key, _)) = newest {
                latest = latest.max(ended_at(key.value()));
            }
        }
        for entry in active.iter().map_err(db_err)? {
            let (_, id) = entry.map_err(db_err)?;
            if let Some(g) = runs.get(id.value()).map_err(db_err)? {
                latest = latest.max(Some(decode(g.value())?.created_at));
            }
        }
        Ok(latest)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
