//! Header reconciliation
//!
//! Merges normalized headers into the migration store. Each header is
//! handled on its own: a failure on one message is logged and the batch
//! carries on.

use crate::error::Result;
use crate::header::NormalizedHeader;
use crate::ledger::{FlagUpdate, MigrationFlag, MigrationStore, ProblemLog};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::ops::AddAssign;
use tracing::{debug, warn};

/// Per-batch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    /// New rows created for previously unseen ids.
    pub created: usize,
    /// Existing rows whose flag was raised.
    pub promoted: usize,
    /// Rows that already carried the flag.
    pub unchanged: usize,
    /// Messages routed to the problem log.
    pub problems: usize,
    /// Messages skipped because the store or problem log failed.
    pub failures: usize,
}

impl ReconcileStats {
    #[must_use]
    pub const fn processed(&self) -> usize {
        self.created + self.promoted + self.unchanged + self.problems + self.failures
    }
}

impl AddAssign for ReconcileStats {
    fn add_assign(&mut self, rhs: Self) {
        self.created += rhs.created;
        self.promoted += rhs.promoted;
        self.unchanged += rhs.unchanged;
        self.problems += rhs.problems;
        self.failures += rhs.failures;
    }
}

/// What happened to one message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sighting {
    Created,
    Promoted,
    Unchanged,
}

/// Reconciles sightings against a store and a problem log.
pub struct Reconciler<'a, M: ?Sized, P: ?Sized> {
    store: &'a M,
    problems: &'a P,
}

impl<'a, M, P> Reconciler<'a, M, P>
where
    M: MigrationStore + ?Sized,
    P: ProblemLog + ?Sized,
{
    pub const fn new(store: &'a M, problems: &'a P) -> Self {
        Self { store, problems }
    }

    /// Merge a batch of remote headers.
    pub fn reconcile(&self, headers: &[NormalizedHeader]) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        for header in headers {
            self.reconcile_one(header, &mut stats);
        }
        stats
    }

    fn reconcile_one(&self, header: &NormalizedHeader, stats: &mut ReconcileStats) {
        let message_date = header.sent_at;

        let Some(message_id) = header.usable_message_id() else {
            let from = Some(header.from.as_str());
            let diagnostics = format!(
                "Missing Message-ID header for message number {}",
                header.sequence_number
            );
            match self
                .problems
                .append_remote_problem(message_date, from, &diagnostics)
            {
                Ok(()) => {
                    debug!("{}", diagnostics);
                    stats.problems += 1;
                }
                Err(e) => {
                    warn!(
                        "Failed to record problem for message number {}: {}",
                        header.sequence_number, e
                    );
                    stats.failures += 1;
                }
            }
            return;
        };

        match self.record(message_id, message_date, MigrationFlag::InRemoteMailbox) {
            Ok(Sighting::Created) => stats.created += 1,
            Ok(Sighting::Promoted) => stats.promoted += 1,
            Ok(Sighting::Unchanged) => stats.unchanged += 1,
            Err(e) => {
                warn!(
                    "Failed to reconcile messageId={} (message number {}): {}",
                    message_id, header.sequence_number, e
                );
                stats.failures += 1;
            }
        }
    }

    /// Record that a message id was found in the local archive.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lookup or update fails.
    pub fn record_local_sighting(
        &self,
        message_id: &str,
        message_date: Option<DateTime<Utc>>,
    ) -> Result<Sighting> {
        self.record(message_id, message_date, MigrationFlag::InLocalFile)
    }

    /// Record a local file that carries no Message-ID header.
    ///
    /// # Errors
    ///
    /// Returns an error if the problem log rejects the record.
    pub fn record_local_problem(
        &self,
        file_label: &str,
        occurred_at: Option<DateTime<Utc>>,
        from: Option<&str>,
    ) -> Result<()> {
        let diagnostics = format!("Missing Message-ID header in file {file_label}");
        self.problems
            .append_file_problem(file_label, occurred_at, from, &diagnostics)
    }

    fn record(
        &self,
        message_id: &str,
        message_date: Option<DateTime<Utc>>,
        flag: MigrationFlag,
    ) -> Result<Sighting> {
        match self.store.find_by_message_id(message_id)? {
            None => {
                self.store.create_sighting(message_id, message_date, flag)?;
                debug!("Recorded new messageId={} ({})", message_id, flag);
                Ok(Sighting::Created)
            }
            Some(status) if status.flag(flag) => Ok(Sighting::Unchanged),
            Some(_) => match self.store.set_flag(message_id, flag)? {
                FlagUpdate::Set => Ok(Sighting::Promoted),
                FlagUpdate::AlreadySet => Ok(Sighting::Unchanged),
            },
        }
    }
}
