//! Mailbox synchronization entry points

use crate::config::ImapConfig;
use crate::connection::{ImapSession, connect};
use crate::error::{Error, Result};
use crate::explorer::{self, FolderDescriptor};
use crate::fetcher::{FolderReport, sync_folder};
use crate::header::message_sent_date;
use crate::ledger::{MigrationStore, ProblemLog};
use crate::reconcile::{ReconcileStats, Reconciler};
use crate::session::{AppendMode, MailSession, append_message, logout_quietly};
use serde::Serialize;
use tracing::{error, info, warn};

/// Outcome of [`MailboxSynchronizer::synchronize_all_folders`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub folders_discovered: usize,
    pub folders_synced: usize,
    pub folders_failed: usize,
    pub headers_processed: usize,
    pub stats: ReconcileStats,
    pub folders: Vec<FolderReport>,
}

/// Reconciles a remote IMAP mailbox against a migration ledger.
///
/// None of the entry points return errors: every failure is logged and
/// results in an empty or partial outcome.
pub struct MailboxSynchronizer {
    config: ImapConfig,
}

impl MailboxSynchronizer {
    #[must_use]
    pub const fn new(config: ImapConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &ImapConfig {
        &self.config
    }

    /// Names of every remote folder that can hold messages.
    pub async fn discover_message_folders(&self) -> Vec<String> {
        let Some(mut session) = self.open_session().await else {
            return Vec::new();
        };

        let folders = match explorer::discover_message_folders(&mut session).await {
            Ok(folders) => folders,
            Err(e) => {
                warn!("Failed to discover mailbox folders: {}", e);
                Vec::new()
            }
        };

        logout_quietly(&mut session).await;
        folders
    }

    /// Log the remote folder tree and return what was logged.
    pub async fn log_folder_topology(&self) -> Vec<FolderDescriptor> {
        let Some(mut session) = self.open_session().await else {
            return Vec::new();
        };

        let descriptors = explorer::log_folder_topology(&mut session).await;

        logout_quietly(&mut session).await;
        descriptors
    }

    /// Read every message folder and merge its headers into `store`,
    /// routing unidentifiable messages to `problems`.
    pub async fn synchronize_all_folders<M, P>(&self, store: &M, problems: &P) -> SyncSummary
    where
        M: MigrationStore + ?Sized,
        P: ProblemLog + ?Sized,
    {
        if self.config.window_size <= 0 {
            info!(
                "Window size is {}, skipping mailbox synchronization",
                self.config.window_size
            );
            return SyncSummary::default();
        }

        let Some(mut session) = self.open_session().await else {
            return SyncSummary::default();
        };

        let reconciler = Reconciler::new(store, problems);
        let summary = synchronize_session(&mut session, self.config.window_size, &reconciler).await;

        logout_quietly(&mut session).await;
        summary
    }

    /// Upload one raw RFC 5322 message to `folder`.
    ///
    /// The message is flagged `\Seen` and keeps its `Date` header as
    /// internal date when the session supports it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when credentials are missing, a
    /// connection error when the server cannot be reached, or the
    /// server's rejection of the APPEND.
    pub async fn append_message(&self, folder: &str, raw: &[u8]) -> Result<AppendMode> {
        if !self.config.has_credentials() {
            return Err(Error::Config(
                "IMAP credentials are not configured".to_string(),
            ));
        }

        let mut session = connect(&self.config).await?;
        let sent_at = message_sent_date(raw);
        let result = append_message(&mut session, folder, raw, sent_at).await;
        logout_quietly(&mut session).await;

        match &result {
            Ok(mode) => info!("Appended {} bytes to '{}' ({:?})", raw.len(), folder, mode),
            Err(e) => warn!("Failed to append to '{}': {}", folder, e),
        }
        result
    }

    async fn open_session(&self) -> Option<ImapSession> {
        if !self.config.has_credentials() {
            warn!("IMAP credentials are not configured, remote mailbox is unavailable");
            return None;
        }

        match connect(&self.config).await {
            Ok(session) => Some(session),
            Err(e) => {
                error!(
                    "Failed to connect to {}:{}: {}",
                    self.config.host, self.config.port, e
                );
                None
            }
        }
    }
}

/// Topology, discovery and per-folder sync on an open session.
///
/// The session is left open; the caller logs out.
pub async fn synchronize_session<S, M, P>(
    session: &mut S,
    window_size: i64,
    reconciler: &Reconciler<'_, M, P>,
) -> SyncSummary
where
    S: MailSession,
    M: MigrationStore + ?Sized,
    P: ProblemLog + ?Sized,
{
    let mut summary = SyncSummary::default();

    explorer::log_folder_topology(session).await;

    let folders = match explorer::discover_message_folders(session).await {
        Ok(folders) => folders,
        Err(e) => {
            warn!("Failed to discover mailbox folders: {}", e);
            return summary;
        }
    };
    summary.folders_discovered = folders.len();
    info!("Synchronizing {} folders", folders.len());

    for folder in &folders {
        match sync_one(session, folder, window_size, reconciler).await {
            Ok(report) => {
                summary.folders_synced += 1;
                summary.headers_processed += report.headers;
                summary.stats += report.stats;
                summary.folders.push(report);
            }
            Err(e) => {
                warn!("Skipping folder '{}': {}", folder, e);
                summary.folders_failed += 1;
            }
        }
    }

    info!(
        "Synchronization finished: {} folders synced, {} failed, {} headers ({} new, {} promoted, {} unchanged, {} problems, {} failures)",
        summary.folders_synced,
        summary.folders_failed,
        summary.headers_processed,
        summary.stats.created,
        summary.stats.promoted,
        summary.stats.unchanged,
        summary.stats.problems,
        summary.stats.failures
    );
    summary
}

async fn sync_one<S, M, P>(
    session: &mut S,
    folder: &str,
    window_size: i64,
    reconciler: &Reconciler<'_, M, P>,
) -> Result<FolderReport>
where
    S: MailSession,
    M: MigrationStore + ?Sized,
    P: ProblemLog + ?Sized,
{
    info!("Synchronizing folder '{}'", folder);
    sync_folder(session, folder, window_size, reconciler).await
}
