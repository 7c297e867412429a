//! Migration status store and problem log
//!
//! [`MigrationStore`] keeps one [`MigrationStatus`] per message id and
//! only ever moves its flags from `false` to `true`. [`ProblemLog`] is
//! an append-only sink for messages that could not be identified.
//!
//! [`MemoryLedger`] implements both behind a single mutex, which makes
//! every per-key operation atomic.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Where a message has been seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationFlag {
    InLocalFile,
    InRemoteMailbox,
}

impl fmt::Display for MigrationFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InLocalFile => "in_local_file",
            Self::InRemoteMailbox => "in_remote_mailbox",
        })
    }
}

/// Persistent reconciliation state for one message id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub message_id: String,
    pub message_date: Option<DateTime<Utc>>,
    pub in_local_file: bool,
    pub in_remote_mailbox: bool,
}

impl MigrationStatus {
    fn new(message_id: &str, message_date: Option<DateTime<Utc>>) -> Self {
        Self {
            message_id: message_id.to_string(),
            message_date,
            in_local_file: false,
            in_remote_mailbox: false,
        }
    }

    #[must_use]
    pub const fn flag(&self, flag: MigrationFlag) -> bool {
        match flag {
            MigrationFlag::InLocalFile => self.in_local_file,
            MigrationFlag::InRemoteMailbox => self.in_remote_mailbox,
        }
    }

    /// Raise `flag`. Returns whether anything changed.
    fn raise(&mut self, flag: MigrationFlag) -> bool {
        let slot = match flag {
            MigrationFlag::InLocalFile => &mut self.in_local_file,
            MigrationFlag::InRemoteMailbox => &mut self.in_remote_mailbox,
        };
        let changed = !*slot;
        *slot = true;
        changed
    }
}

/// Outcome of [`MigrationStore::set_flag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagUpdate {
    Set,
    AlreadySet,
}

/// Aggregate counts over all statuses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationStatistics {
    pub total: usize,
    /// Seen both locally and remotely.
    pub in_both: usize,
    /// In the local archive but not (yet) in the remote mailbox.
    pub missing_in_remote: usize,
    /// In the remote mailbox but not in the local archive.
    pub missing_in_files: usize,
}

/// Keyed, monotone migration state.
///
/// Implementations must make each call atomic per message id.
#[allow(clippy::missing_errors_doc)]
pub trait MigrationStore {
    fn find_by_message_id(&self, message_id: &str) -> Result<Option<MigrationStatus>>;

    /// Insert a row with `flag` raised. If the id already exists, raise
    /// `flag` on it instead; its date is left as is.
    fn create_sighting(
        &self,
        message_id: &str,
        message_date: Option<DateTime<Utc>>,
        flag: MigrationFlag,
    ) -> Result<MigrationStatus>;

    /// Conditionally raise `flag`. Never lowers a flag. Fails if the id
    /// is unknown.
    fn set_flag(&self, message_id: &str, flag: MigrationFlag) -> Result<FlagUpdate>;

    fn statistics(&self) -> Result<MigrationStatistics>;

    /// Statuses seen locally but not remotely, ordered by message id.
    fn missing_in_remote(&self) -> Result<Vec<MigrationStatus>>;

    fn create_remote_sighting(
        &self,
        message_id: &str,
        message_date: Option<DateTime<Utc>>,
    ) -> Result<MigrationStatus> {
        self.create_sighting(message_id, message_date, MigrationFlag::InRemoteMailbox)
    }

    fn create_local_sighting(
        &self,
        message_id: &str,
        message_date: Option<DateTime<Utc>>,
    ) -> Result<MigrationStatus> {
        self.create_sighting(message_id, message_date, MigrationFlag::InLocalFile)
    }

    fn set_remote_flag(&self, message_id: &str) -> Result<FlagUpdate> {
        self.set_flag(message_id, MigrationFlag::InRemoteMailbox)
    }

    fn set_local_flag(&self, message_id: &str) -> Result<FlagUpdate> {
        self.set_flag(message_id, MigrationFlag::InLocalFile)
    }
}

/// A diagnostic entry for a message that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemRecord {
    pub occurred_at: Option<DateTime<Utc>>,
    /// File label for file-sourced problems.
    pub source_description: Option<String>,
    pub is_file_source: bool,
    pub is_remote_source: bool,
    pub from_address: Option<String>,
    pub diagnostics: String,
}

impl ProblemRecord {
    #[must_use]
    pub fn remote(occurred_at: Option<DateTime<Utc>>, from: Option<&str>, diagnostics: &str) -> Self {
        Self {
            occurred_at,
            source_description: None,
            is_file_source: false,
            is_remote_source: true,
            from_address: non_blank(from),
            diagnostics: diagnostics.to_string(),
        }
    }

    #[must_use]
    pub fn file(
        file_label: &str,
        occurred_at: Option<DateTime<Utc>>,
        from: Option<&str>,
        diagnostics: &str,
    ) -> Self {
        Self {
            occurred_at,
            source_description: non_blank(Some(file_label)),
            is_file_source: true,
            is_remote_source: false,
            from_address: non_blank(from),
            diagnostics: diagnostics.to_string(),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

/// Append-only problem sink.
#[allow(clippy::missing_errors_doc)]
pub trait ProblemLog {
    fn append(&self, record: ProblemRecord) -> Result<()>;

    fn append_remote_problem(
        &self,
        occurred_at: Option<DateTime<Utc>>,
        from: Option<&str>,
        diagnostics: &str,
    ) -> Result<()> {
        self.append(ProblemRecord::remote(occurred_at, from, diagnostics))
    }

    fn append_file_problem(
        &self,
        file_label: &str,
        occurred_at: Option<DateTime<Utc>>,
        from: Option<&str>,
        diagnostics: &str,
    ) -> Result<()> {
        self.append(ProblemRecord::file(file_label, occurred_at, from, diagnostics))
    }
}

/// Serializable snapshot of a ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub migrations: Vec<MigrationStatus>,
    pub problems: Vec<ProblemRecord>,
}

#[derive(Debug, Default)]
struct LedgerState {
    statuses: BTreeMap<String, MigrationStatus>,
    problems: Vec<ProblemRecord>,
}

/// In-memory [`MigrationStore`] and [`ProblemLog`].
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from a snapshot. Later duplicates of a message id
    /// are merged into the first one.
    #[must_use]
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        let mut statuses: BTreeMap<String, MigrationStatus> = BTreeMap::new();
        for status in snapshot.migrations {
            match statuses.get_mut(&status.message_id) {
                Some(existing) => {
                    existing.in_local_file |= status.in_local_file;
                    existing.in_remote_mailbox |= status.in_remote_mailbox;
                }
                None => {
                    statuses.insert(status.message_id.clone(), status);
                }
            }
        }
        Self {
            state: Mutex::new(LedgerState {
                statuses,
                problems: snapshot.problems,
            }),
        }
    }

    /// Copy of the current state, migrations ordered by message id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the ledger lock is poisoned.
    pub fn snapshot(&self) -> Result<LedgerSnapshot> {
        let state = self.lock()?;
        Ok(LedgerSnapshot {
            migrations: state.statuses.values().cloned().collect(),
            problems: state.problems.clone(),
        })
    }

    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the ledger lock is poisoned.
    pub fn problems(&self) -> Result<Vec<ProblemRecord>> {
        Ok(self.lock()?.problems.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerState>> {
        self.state
            .lock()
            .map_err(|_| Error::Persistence("ledger lock poisoned".to_string()))
    }
}

impl MigrationStore for MemoryLedger {
    fn find_by_message_id(&self, message_id: &str) -> Result<Option<MigrationStatus>> {
        Ok(self.lock()?.statuses.get(message_id).cloned())
    }

    fn create_sighting(
        &self,
        message_id: &str,
        message_date: Option<DateTime<Utc>>,
        flag: MigrationFlag,
    ) -> Result<MigrationStatus> {
        let mut state = self.lock()?;
        let status = state
            .statuses
            .entry(message_id.to_string())
            .or_insert_with(|| {
                debug!("Created migration entry for messageId={}", message_id);
                MigrationStatus::new(message_id, message_date)
            });
        status.raise(flag);
        Ok(status.clone())
    }

    fn set_flag(&self, message_id: &str, flag: MigrationFlag) -> Result<FlagUpdate> {
        let mut state = self.lock()?;
        let status = state.statuses.get_mut(message_id).ok_or_else(|| {
            Error::Persistence(format!("Migration entry not found for messageId={message_id}"))
        })?;
        if status.raise(flag) {
            debug!("Set {} for messageId={}", flag, message_id);
            Ok(FlagUpdate::Set)
        } else {
            Ok(FlagUpdate::AlreadySet)
        }
    }

    fn statistics(&self) -> Result<MigrationStatistics> {
        let state = self.lock()?;
        let mut stats = MigrationStatistics {
            total: state.statuses.len(),
            ..MigrationStatistics::default()
        };
        for status in state.statuses.values() {
            match (status.in_local_file, status.in_remote_mailbox) {
                (true, true) => stats.in_both += 1,
                (true, false) => stats.missing_in_remote += 1,
                (false, true) => stats.missing_in_files += 1,
                (false, false) => {}
            }
        }
        Ok(stats)
    }

    fn missing_in_remote(&self) -> Result<Vec<MigrationStatus>> {
        Ok(self
            .lock()?
            .statuses
            .values()
            .filter(|s| s.in_local_file && !s.in_remote_mailbox)
            .cloned()
            .collect())
    }
}

impl ProblemLog for MemoryLedger {
    fn append(&self, record: ProblemRecord) -> Result<()> {
        let mut state = self.lock()?;
        debug!(
            "Stored problem entry (remote={}, file={}): {}",
            record.is_remote_source, record.is_file_source, record.diagnostics
        );
        state.problems.push(record);
        Ok(())
    }
}
