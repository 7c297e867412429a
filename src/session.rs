//! Mail protocol seam
//!
//! The synchronization engine talks to the remote mailbox only through
//! [`MailSession`] and [`RawMessage`]. [`crate::ImapSession`] is the
//! production implementation; unit tests use an in-memory fake.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::warn;

/// Display name used for the synthetic root of the folder tree.
pub const ROOT_DISPLAY_NAME: &str = "(root)";

/// What a folder is able to contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FolderKind {
    pub holds_messages: bool,
    pub holds_folders: bool,
}

impl FolderKind {
    /// Assumed when the real capabilities cannot be determined.
    pub const ANY: Self = Self {
        holds_messages: true,
        holds_folders: true,
    };

    /// The synthetic root: a container that holds no messages itself.
    pub const CONTAINER: Self = Self {
        holds_messages: false,
        holds_folders: true,
    };

    /// A leaf folder holding only messages.
    pub const MESSAGES: Self = Self {
        holds_messages: true,
        holds_folders: false,
    };
}

/// A reference to a folder in the remote hierarchy.
///
/// `full_name` is the qualified path (e.g. `Work/Projects`), `name` the
/// last path segment. Both are empty for the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRef {
    pub full_name: String,
    pub name: String,
    pub delimiter: Option<String>,
    pub kind: Option<FolderKind>,
}

impl FolderRef {
    /// The default folder every traversal starts from.
    #[must_use]
    pub const fn root() -> Self {
        Self {
            full_name: String::new(),
            name: String::new(),
            delimiter: None,
            kind: Some(FolderKind::CONTAINER),
        }
    }

    /// Qualified name, else short name, else `"(root)"`.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if !self.full_name.trim().is_empty() {
            &self.full_name
        } else if !self.name.trim().is_empty() {
            &self.name
        } else {
            ROOT_DISPLAY_NAME
        }
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.display_name() == ROOT_DISPLAY_NAME
    }
}

/// Access mode used when opening a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderMode {
    ReadOnly,
    ReadWrite,
}

/// A folder that has been opened on the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenFolder {
    pub name: String,
    pub mode: FolderMode,
    pub message_count: u32,
}

/// An inclusive, 1-based range of folder-local sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageWindow {
    pub start: u32,
    pub end: u32,
}

impl MessageWindow {
    /// Number of messages covered by the window.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.end - self.start + 1
    }

    /// The IMAP sequence set for this window (`start:end`).
    #[must_use]
    pub fn sequence_set(&self) -> String {
        format!("{}:{}", self.start, self.end)
    }
}

impl fmt::Display for MessageWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Options for appending a message to a folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOptions {
    /// Store the message with the `\Seen` flag.
    pub seen: bool,
    /// Internal (received) date to record on the server.
    pub internal_date: Option<DateTime<Utc>>,
}

/// Which append flavour was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppendMode {
    /// Plain append; the server stamps its own received date.
    Baseline,
    /// Append with `\Seen` and the original sent date as internal date.
    PreserveInternalDate,
}

/// Envelope-level view of one fetched message.
#[allow(clippy::missing_errors_doc)]
pub trait RawMessage {
    /// Folder-local, 1-based sequence number.
    fn sequence_number(&self) -> u32;

    /// All values of the named header (case-insensitive name).
    fn header(&self, name: &str) -> Result<Vec<String>>;

    fn sent_date(&self) -> Result<Option<DateTime<Utc>>>;

    /// Human-readable sender addresses.
    fn from_addresses(&self) -> Result<Vec<String>>;
}

/// A connected session against a folder-based mail store.
///
/// Only one folder can be open at a time.
#[allow(async_fn_in_trait, clippy::missing_errors_doc)]
pub trait MailSession {
    type Message: RawMessage;

    /// Whether [`MailSession::append_message`] honours
    /// [`AppendOptions::internal_date`].
    const APPEND_PRESERVES_INTERNAL_DATE: bool;

    /// The root of the folder tree, if the store exposes one.
    async fn default_folder(&mut self) -> Result<Option<FolderRef>>;

    /// Direct children of `folder`.
    ///
    /// The outer error means the listing could not be issued at all; an
    /// inner error means that entry (and everything after it) could not
    /// be read.
    async fn list_children(&mut self, folder: &FolderRef) -> Result<Vec<Result<FolderRef>>>;

    async fn folder_kind(&mut self, folder: &FolderRef) -> Result<FolderKind>;

    /// Message count of a folder without opening it.
    async fn message_count(&mut self, folder: &FolderRef) -> Result<u32>;

    async fn open_folder(&mut self, name: &str, mode: FolderMode) -> Result<OpenFolder>;

    /// Envelope-only fetch of the messages in `window` of the open folder.
    async fn fetch_envelopes(&mut self, window: MessageWindow) -> Result<Vec<Self::Message>>;

    async fn close_folder(&mut self) -> Result<()>;

    async fn append_message(
        &mut self,
        folder: &str,
        raw: &[u8],
        options: &AppendOptions,
    ) -> Result<()>;

    async fn logout(&mut self) -> Result<()>;
}

/// Append a message, preserving its sent date as internal date when the
/// session supports it.
///
/// # Errors
///
/// Returns the session's error if the append is rejected.
pub async fn append_message<S: MailSession>(
    session: &mut S,
    folder: &str,
    raw: &[u8],
    sent_at: Option<DateTime<Utc>>,
) -> Result<AppendMode> {
    if S::APPEND_PRESERVES_INTERNAL_DATE {
        let options = AppendOptions {
            seen: true,
            internal_date: sent_at,
        };
        session.append_message(folder, raw, &options).await?;
        Ok(AppendMode::PreserveInternalDate)
    } else {
        session
            .append_message(folder, raw, &AppendOptions::default())
            .await?;
        Ok(AppendMode::Baseline)
    }
}

/// Close the open folder, logging instead of propagating failures.
pub async fn close_folder_quietly<S: MailSession>(session: &mut S, folder: &str) {
    if let Err(e) = session.close_folder().await {
        warn!("Failed to close folder '{}' cleanly: {}", folder, e);
    }
}

/// Log out, logging instead of propagating failures.
pub async fn logout_quietly<S: MailSession>(session: &mut S) {
    if let Err(e) = session.logout().await {
        warn!("Failed to close mailbox session cleanly: {}", e);
    }
}
