//! Durable ledger backed by a JSON file
//!
//! The whole ledger is held in memory and written back on
//! [`JsonLedger::flush`]. Writes go to a sibling temp file first and are
//! then renamed over the target, so a crash never leaves a torn file.

use crate::error::Result;
use crate::ledger::{
    FlagUpdate, LedgerSnapshot, MemoryLedger, MigrationFlag, MigrationStatistics, MigrationStatus,
    MigrationStore, ProblemLog, ProblemRecord,
};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// [`MigrationStore`] and [`ProblemLog`] persisted to a JSON document.
#[derive(Debug)]
pub struct JsonLedger {
    path: PathBuf,
    inner: MemoryLedger,
}

impl JsonLedger {
    /// Open the ledger at `path`. A missing file starts an empty ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or is not
    /// a valid ledger document.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                LedgerSnapshot::default()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            LedgerSnapshot::default()
        };

        info!(
            "Opened ledger {} ({} migrations, {} problems)",
            path.display(),
            snapshot.migrations.len(),
            snapshot.problems.len()
        );

        Ok(Self {
            path,
            inner: MemoryLedger::from_snapshot(snapshot),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current state to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any file operation fails.
    pub fn flush(&self) -> Result<()> {
        let snapshot = self.inner.snapshot()?;
        let json = serde_json::to_string_pretty(&snapshot)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;

        debug!("Flushed ledger to {}", self.path.display());
        Ok(())
    }

    /// Every recorded problem, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory state is unavailable.
    pub fn problems(&self) -> Result<Vec<ProblemRecord>> {
        self.inner.problems()
    }
}

impl MigrationStore for JsonLedger {
    fn find_by_message_id(&self, message_id: &str) -> Result<Option<MigrationStatus>> {
        self.inner.find_by_message_id(message_id)
    }

    fn create_sighting(
        &self,
        message_id: &str,
        message_date: Option<DateTime<Utc>>,
        flag: MigrationFlag,
    ) -> Result<MigrationStatus> {
        self.inner.create_sighting(message_id, message_date, flag)
    }

    fn set_flag(&self, message_id: &str, flag: MigrationFlag) -> Result<FlagUpdate> {
        self.inner.set_flag(message_id, flag)
    }

    fn statistics(&self) -> Result<MigrationStatistics> {
        self.inner.statistics()
    }

    fn missing_in_remote(&self) -> Result<Vec<MigrationStatus>> {
        self.inner.missing_in_remote()
    }
}

impl ProblemLog for JsonLedger {
    fn append(&self, record: ProblemRecord) -> Result<()> {
        self.inner.append(record)
    }
}
