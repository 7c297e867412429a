//! In-memory [`MailSession`] used by unit tests.
//!
//! Folders are addressed by `/`-separated full names; a folder's parent
//! is everything before the last `/`. Each failure knob targets exactly
//! one operation on one folder so tests can check isolation.

use crate::error::{Error, Result};
use crate::session::{
    AppendOptions, FolderKind, FolderMode, FolderRef, MailSession, MessageWindow, OpenFolder,
    RawMessage,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

const DELIMITER: &str = "/";

#[derive(Debug, Clone)]
pub struct FakeMessage {
    pub sequence_number: u32,
    pub message_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub from: Vec<String>,
    pub broken: bool,
}

impl FakeMessage {
    pub const fn new(sequence_number: u32) -> Self {
        Self {
            sequence_number,
            message_id: None,
            sent_at: None,
            from: Vec::new(),
            broken: false,
        }
    }

    pub fn message_id(mut self, id: &str) -> Self {
        self.message_id = Some(id.to_string());
        self
    }

    pub const fn sent_at(mut self, at: DateTime<Utc>) -> Self {
        self.sent_at = Some(at);
        self
    }

    pub fn sender(mut self, address: &str) -> Self {
        self.from.push(address.to_string());
        self
    }

    /// Every header read on this message fails.
    pub const fn broken(mut self) -> Self {
        self.broken = true;
        self
    }
}

impl RawMessage for FakeMessage {
    fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    fn header(&self, name: &str) -> Result<Vec<String>> {
        if self.broken {
            return Err(Error::Extraction(format!("message {} is broken", self.sequence_number)));
        }
        if name.eq_ignore_ascii_case("Message-ID") {
            Ok(self.message_id.iter().cloned().collect())
        } else {
            Ok(Vec::new())
        }
    }

    fn sent_date(&self) -> Result<Option<DateTime<Utc>>> {
        if self.broken {
            return Err(Error::Extraction(format!("message {} is broken", self.sequence_number)));
        }
        Ok(self.sent_at)
    }

    fn from_addresses(&self) -> Result<Vec<String>> {
        if self.broken {
            return Err(Error::Extraction(format!("message {} is broken", self.sequence_number)));
        }
        Ok(self.from.clone())
    }
}

#[derive(Debug, Clone)]
struct FakeFolder {
    full_name: String,
    kind: FolderKind,
    messages: Vec<FakeMessage>,
}

#[derive(Debug, Clone)]
pub struct AppendedMessage {
    pub folder: String,
    pub raw: Vec<u8>,
    pub options: AppendOptions,
}

#[derive(Default)]
pub struct FakeSessionBuilder {
    folders: Vec<FakeFolder>,
    no_root: bool,
    unknown_kind: HashSet<String>,
    failing_list: HashSet<String>,
    failing_child: HashMap<String, usize>,
    failing_count: HashSet<String>,
    failing_open: HashSet<String>,
    failing_windows: HashSet<(String, u32)>,
    fail_close: bool,
}

impl FakeSessionBuilder {
    /// A folder that can hold messages and sub-folders.
    pub fn folder(mut self, full_name: &str, messages: Vec<FakeMessage>) -> Self {
        self.folders.push(FakeFolder {
            full_name: full_name.to_string(),
            kind: FolderKind::ANY,
            messages,
        });
        self
    }

    /// A folder that only holds sub-folders.
    pub fn container(mut self, full_name: &str) -> Self {
        self.folders.push(FakeFolder {
            full_name: full_name.to_string(),
            kind: FolderKind::CONTAINER,
            messages: Vec::new(),
        });
        self
    }

    pub const fn no_root(mut self) -> Self {
        self.no_root = true;
        self
    }

    pub fn unknown_kind(mut self, full_name: &str) -> Self {
        self.unknown_kind.insert(full_name.to_string());
        self
    }

    /// Listing the children of `parent` fails outright. Use `""` for
    /// the root.
    pub fn failing_list(mut self, parent: &str) -> Self {
        self.failing_list.insert(parent.to_string());
        self
    }

    /// Listing `parent` yields an error in place of the child at
    /// `index` and stops there.
    pub fn failing_child(mut self, parent: &str, index: usize) -> Self {
        self.failing_child.insert(parent.to_string(), index);
        self
    }

    pub fn failing_count(mut self, full_name: &str) -> Self {
        self.failing_count.insert(full_name.to_string());
        self
    }

    pub fn failing_open(mut self, full_name: &str) -> Self {
        self.failing_open.insert(full_name.to_string());
        self
    }

    /// Fetching the window that starts at `start` in `full_name` fails.
    pub fn failing_window(mut self, full_name: &str, start: u32) -> Self {
        self.failing_windows.insert((full_name.to_string(), start));
        self
    }

    pub const fn fail_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn build(self) -> FakeSession {
        self.into_session()
    }

    /// A session without internal-date support on append.
    pub fn build_baseline(self) -> FakeSession<false> {
        self.into_session()
    }

    fn into_session<const PRESERVES_DATE: bool>(self) -> FakeSession<PRESERVES_DATE> {
        FakeSession {
            config: self,
            open: None,
            opened: Vec::new(),
            fetched: Vec::new(),
            closed: 0,
            logouts: 0,
            appended: Vec::new(),
        }
    }
}

pub struct FakeSession<const PRESERVES_DATE: bool = true> {
    config: FakeSessionBuilder,
    open: Option<String>,
    opened: Vec<(String, FolderMode)>,
    fetched: Vec<(String, MessageWindow)>,
    closed: usize,
    logouts: usize,
    appended: Vec<AppendedMessage>,
}

impl FakeSession {
    pub fn builder() -> FakeSessionBuilder {
        FakeSessionBuilder::default()
    }
}

impl<const PRESERVES_DATE: bool> FakeSession<PRESERVES_DATE> {
    pub fn opened(&self) -> &[(String, FolderMode)] {
        &self.opened
    }

    pub fn fetched(&self) -> &[(String, MessageWindow)] {
        &self.fetched
    }

    pub const fn closed(&self) -> usize {
        self.closed
    }

    pub const fn logouts(&self) -> usize {
        self.logouts
    }

    pub fn appended(&self) -> &[AppendedMessage] {
        &self.appended
    }

    pub const fn is_open(&self) -> bool {
        self.open.is_some()
    }

    fn find(&self, full_name: &str) -> Option<&FakeFolder> {
        self.config.folders.iter().find(|f| f.full_name == full_name)
    }

    fn folder_ref(folder: &FakeFolder) -> FolderRef {
        let name = folder
            .full_name
            .rsplit(DELIMITER)
            .next()
            .unwrap_or_default()
            .to_string();
        FolderRef {
            full_name: folder.full_name.clone(),
            name,
            delimiter: Some(DELIMITER.to_string()),
            kind: Some(folder.kind),
        }
    }
}

fn parent_of(full_name: &str) -> &str {
    full_name.rsplit_once(DELIMITER).map_or("", |(parent, _)| parent)
}

impl<const PRESERVES_DATE: bool> MailSession for FakeSession<PRESERVES_DATE> {
    type Message = FakeMessage;

    const APPEND_PRESERVES_INTERNAL_DATE: bool = PRESERVES_DATE;

    async fn default_folder(&mut self) -> Result<Option<FolderRef>> {
        if self.config.no_root {
            Ok(None)
        } else {
            Ok(Some(FolderRef::root()))
        }
    }

    async fn list_children(&mut self, folder: &FolderRef) -> Result<Vec<Result<FolderRef>>> {
        let parent = folder.full_name.as_str();
        if self.config.failing_list.contains(parent) {
            return Err(Error::Imap(format!("LIST failed for '{parent}'")));
        }

        let fail_at = self.config.failing_child.get(parent).copied();
        let mut children = Vec::new();
        for (index, child) in self
            .config
            .folders
            .iter()
            .filter(|f| parent_of(&f.full_name) == parent)
            .enumerate()
        {
            if fail_at == Some(index) {
                children.push(Err(Error::Imap(format!(
                    "unreadable LIST entry {index} under '{parent}'"
                ))));
                break;
            }
            children.push(Ok(Self::folder_ref(child)));
        }
        Ok(children)
    }

    async fn folder_kind(&mut self, folder: &FolderRef) -> Result<FolderKind> {
        if self.config.unknown_kind.contains(&folder.full_name) {
            return Err(Error::Imap(format!("no attributes for '{}'", folder.full_name)));
        }
        folder
            .kind
            .ok_or_else(|| Error::Imap(format!("no attributes for '{}'", folder.full_name)))
    }

    async fn message_count(&mut self, folder: &FolderRef) -> Result<u32> {
        if self.config.failing_count.contains(&folder.full_name) {
            return Err(Error::Imap(format!("STATUS failed for '{}'", folder.full_name)));
        }
        let found = self
            .find(&folder.full_name)
            .ok_or_else(|| Error::FolderNotFound(folder.full_name.clone()))?;
        Ok(u32::try_from(found.messages.len()).unwrap_or(u32::MAX))
    }

    async fn open_folder(&mut self, name: &str, mode: FolderMode) -> Result<OpenFolder> {
        if self.config.failing_open.contains(name) {
            return Err(Error::FolderAccess(format!("cannot open '{name}'")));
        }
        let count = self
            .find(name)
            .ok_or_else(|| Error::FolderNotFound(name.to_string()))?
            .messages
            .len();
        self.open = Some(name.to_string());
        self.opened.push((name.to_string(), mode));
        Ok(OpenFolder {
            name: name.to_string(),
            mode,
            message_count: u32::try_from(count).unwrap_or(u32::MAX),
        })
    }

    async fn fetch_envelopes(&mut self, window: MessageWindow) -> Result<Vec<FakeMessage>> {
        let name = self
            .open
            .clone()
            .ok_or_else(|| Error::Imap("no folder open".to_string()))?;
        self.fetched.push((name.clone(), window));
        if self.config.failing_windows.contains(&(name.clone(), window.start)) {
            return Err(Error::Imap(format!("FETCH {window} failed in '{name}'")));
        }
        let folder = self
            .find(&name)
            .ok_or_else(|| Error::FolderNotFound(name.clone()))?;
        Ok(folder
            .messages
            .iter()
            .filter(|m| (window.start..=window.end).contains(&m.sequence_number))
            .cloned()
            .collect())
    }

    async fn close_folder(&mut self) -> Result<()> {
        self.open = None;
        self.closed += 1;
        if self.config.fail_close {
            return Err(Error::Imap("CLOSE failed".to_string()));
        }
        Ok(())
    }

    async fn append_message(
        &mut self,
        folder: &str,
        raw: &[u8],
        options: &AppendOptions,
    ) -> Result<()> {
        self.find(folder)
            .ok_or_else(|| Error::FolderNotFound(folder.to_string()))?;
        self.appended.push(AppendedMessage {
            folder: folder.to_string(),
            raw: raw.to_vec(),
            options: options.clone(),
        });
        Ok(())
    }

    async fn logout(&mut self) -> Result<()> {
        self.logouts += 1;
        if self.config.fail_close {
            return Err(Error::Imap("LOGOUT failed".to_string()));
        }
        Ok(())
    }
}
