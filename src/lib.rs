//! Mail migration synchronization library
//!
//! Reconciles a local mail export with a remote IMAP mailbox. Every
//! message is identified by its `Message-ID` header; a ledger records,
//! per identity, whether it has been seen in the local files, in the
//! remote mailbox or both. Messages without a usable identity are
//! written to a problem log instead.
//!
//! The remote side is read-only: folders are opened with EXAMINE and
//! only envelopes are fetched, newest first, in bounded windows.

mod client;
mod config;
mod connection;
mod error;
mod explorer;
mod fetcher;
mod header;
mod json_ledger;
mod ledger;
mod reconcile;
mod session;

#[cfg(test)]
mod testing;

pub use client::{MailboxSynchronizer, SyncSummary, synchronize_session};
pub use config::{Credentials, DEFAULT_WINDOW_SIZE, ImapConfig, TlsMode};
pub use connection::{EnvelopeMessage, ImapSession, SessionStream, connect};
pub use error::{Error, Result};
pub use explorer::{
    FolderDescriptor, FolderNode, MessageCount, describe_folders, discover_message_folders,
    log_folder_topology, walk_folders,
};
pub use fetcher::{FolderReport, message_windows, sync_folder};
pub use header::{
    MESSAGE_ID_HEADER, NormalizedHeader, map_message, message_sent_date, parse_sent_date,
};
pub use json_ledger::JsonLedger;
pub use ledger::{
    FlagUpdate, LedgerSnapshot, MemoryLedger, MigrationFlag, MigrationStatistics, MigrationStatus,
    MigrationStore, ProblemLog, ProblemRecord,
};
pub use reconcile::{ReconcileStats, Reconciler, Sighting};
pub use session::{
    AppendMode, AppendOptions, FolderKind, FolderMode, FolderRef, MailSession, MessageWindow,
    OpenFolder, ROOT_DISPLAY_NAME, RawMessage, append_message, close_folder_quietly,
    logout_quietly,
};
