//! Windowed envelope retrieval
//!
//! A folder is read back to front in fixed-size windows so the newest
//! messages are reconciled first and only one window is held in memory.

use crate::error::Result;
use crate::header::{NormalizedHeader, map_message};
use crate::ledger::{MigrationStore, ProblemLog};
use crate::reconcile::{ReconcileStats, Reconciler};
use crate::session::{FolderMode, MailSession, MessageWindow, OpenFolder, close_folder_quietly};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Outcome of reading one folder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FolderReport {
    pub folder: String,
    pub message_count: u32,
    pub windows: usize,
    pub windows_failed: usize,
    /// Headers successfully mapped and handed to the reconciler.
    pub headers: usize,
    pub stats: ReconcileStats,
}

/// Partition `1..=count` into windows of at most `window_size`, newest
/// first.
///
/// `count = 250, window_size = 100` gives `151-250`, `51-150`, `1-50`.
#[must_use]
pub fn message_windows(count: u32, window_size: i64) -> Vec<MessageWindow> {
    if window_size <= 0 || count == 0 {
        return Vec::new();
    }
    let size = u32::try_from(window_size).unwrap_or(u32::MAX);

    let mut windows = Vec::with_capacity(count.div_ceil(size) as usize);
    let mut end = count;
    while end >= 1 {
        let start = end.saturating_sub(size - 1).max(1);
        windows.push(MessageWindow { start, end });
        end = start - 1;
    }
    windows
}

/// Read every message of `folder` and reconcile it.
///
/// The folder is opened read-only and closed again on every path.
///
/// # Errors
///
/// Returns an error only if the folder cannot be opened.
pub async fn sync_folder<S, M, P>(
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
    let opened = session.open_folder(folder, FolderMode::ReadOnly).await?;
    let report = read_windows(session, &opened, window_size, reconciler).await;
    close_folder_quietly(session, folder).await;

    info!(
        "Folder '{}': {} headers in {} windows ({} failed), {} new, {} promoted, {} problems",
        report.folder,
        report.headers,
        report.windows,
        report.windows_failed,
        report.stats.created,
        report.stats.promoted,
        report.stats.problems
    );
    Ok(report)
}

async fn read_windows<S, M, P>(
    session: &mut S,
    folder: &OpenFolder,
    window_size: i64,
    reconciler: &Reconciler<'_, M, P>,
) -> FolderReport
where
    S: MailSession,
    M: MigrationStore + ?Sized,
    P: ProblemLog + ?Sized,
{
    let mut report = FolderReport {
        folder: folder.name.clone(),
        message_count: folder.message_count,
        ..FolderReport::default()
    };

    let windows = message_windows(folder.message_count, window_size);
    if windows.is_empty() {
        info!(
            "Skipping folder '{}' ({} messages, window size {})",
            folder.name, folder.message_count, window_size
        );
        return report;
    }

    for window in windows {
        report.windows += 1;
        info!("Getting messages {} - {}", window.start, window.end);

        let headers = match fetch_window(session, window).await {
            Ok(headers) => headers,
            Err(e) => {
                warn!(
                    "Failed to fetch messages {} in '{}': {}",
                    window, folder.name, e
                );
                report.windows_failed += 1;
                continue;
            }
        };

        for header in &headers {
            debug!("{}", header.log_line());
        }
        report.headers += headers.len();
        report.stats += reconciler.reconcile(&headers);
    }

    report
}

/// Fetch and map one window, newest first.
async fn fetch_window<S: MailSession>(
    session: &mut S,
    window: MessageWindow,
) -> Result<Vec<NormalizedHeader>> {
    let messages = session.fetch_envelopes(window).await?;
    let mut headers: Vec<NormalizedHeader> = messages.iter().filter_map(map_message).collect();
    headers.sort_by(|a, b| b.sequence_number.cmp(&a.sequence_number));
    Ok(headers)
}
