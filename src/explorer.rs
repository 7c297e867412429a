//! Folder discovery
//!
//! Walks the folder tree depth-first from the default folder. The walk
//! is best-effort: a folder whose kind cannot be read is assumed to
//! hold both messages and sub-folders, and a listing failure only prunes
//! the branch it happened in.

use crate::error::Result;
use crate::session::{FolderKind, FolderRef, MailSession};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

/// A folder reached during the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderNode {
    pub folder: FolderRef,
    pub kind: FolderKind,
    /// Zero for the default folder.
    pub depth: usize,
}

/// Message count column of the topology listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCount {
    Known(u32),
    Error,
    NotApplicable,
}

impl fmt::Display for MessageCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(count) => write!(f, "{count}"),
            Self::Error => f.write_str("error"),
            Self::NotApplicable => f.write_str("n/a"),
        }
    }
}

/// One line of the folder topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderDescriptor {
    pub display_name: String,
    pub depth: usize,
    pub holds_messages: bool,
    pub holds_subfolders: bool,
    pub message_count: MessageCount,
}

impl fmt::Display for FolderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}- {} (messages: {})",
            "  ".repeat(self.depth),
            self.display_name,
            self.message_count
        )
    }
}

/// Visit every reachable folder in depth-first pre-order.
///
/// # Errors
///
/// Returns an error only if the default folder cannot be requested.
pub async fn walk_folders<S: MailSession>(session: &mut S) -> Result<Vec<FolderNode>> {
    let Some(root) = session.default_folder().await? else {
        warn!("No default folder available; nothing to explore");
        return Ok(Vec::new());
    };

    let mut nodes = Vec::new();
    let mut pending = vec![(root, 0usize)];

    while let Some((folder, depth)) = pending.pop() {
        let kind = match session.folder_kind(&folder).await {
            Ok(kind) => kind,
            Err(e) => {
                warn!(
                    "Cannot determine type of folder '{}', assuming it holds messages and folders: {}",
                    folder.display_name(),
                    e
                );
                FolderKind::ANY
            }
        };

        if kind.holds_folders {
            let children = list_readable_children(session, &folder).await;
            // Reversed so the first child is visited next.
            pending.extend(children.into_iter().rev().map(|child| (child, depth + 1)));
        }

        nodes.push(FolderNode {
            folder,
            kind,
            depth,
        });
    }

    Ok(nodes)
}

async fn list_readable_children<S: MailSession>(
    session: &mut S,
    folder: &FolderRef,
) -> Vec<FolderRef> {
    let entries = match session.list_children(folder).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(
                "Failed to list sub-folders of '{}': {}",
                folder.display_name(),
                e
            );
            return Vec::new();
        }
    };

    let mut children = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry {
            Ok(child) => children.push(child),
            Err(e) => {
                warn!(
                    "Failed to list sub-folders of '{}' after {} entries: {}",
                    folder.display_name(),
                    children.len(),
                    e
                );
                break;
            }
        }
    }
    children
}

/// Names of every folder that can hold messages, in traversal order.
///
/// The synthetic root is never included.
///
/// # Errors
///
/// Returns an error only if the default folder cannot be requested.
pub async fn discover_message_folders<S: MailSession>(session: &mut S) -> Result<Vec<String>> {
    let names: Vec<String> = walk_folders(session)
        .await?
        .into_iter()
        .filter(|node| node.kind.holds_messages && !node.folder.is_root())
        .map(|node| node.folder.display_name().to_string())
        .collect();

    debug!("Discovered {} message folders", names.len());
    Ok(names)
}

/// Describe every reachable folder, resolving message counts for
/// folders that hold messages.
///
/// # Errors
///
/// Returns an error only if the default folder cannot be requested.
pub async fn describe_folders<S: MailSession>(session: &mut S) -> Result<Vec<FolderDescriptor>> {
    let nodes = walk_folders(session).await?;
    let mut descriptors = Vec::with_capacity(nodes.len());

    for node in nodes {
        let message_count = if node.kind.holds_messages {
            match session.message_count(&node.folder).await {
                Ok(count) => MessageCount::Known(count),
                Err(e) => {
                    warn!(
                        "Failed to count messages in '{}': {}",
                        node.folder.display_name(),
                        e
                    );
                    MessageCount::Error
                }
            }
        } else {
            MessageCount::NotApplicable
        };

        descriptors.push(FolderDescriptor {
            display_name: node.folder.display_name().to_string(),
            depth: node.depth,
            holds_messages: node.kind.holds_messages,
            holds_subfolders: node.kind.holds_folders,
            message_count,
        });
    }

    Ok(descriptors)
}

/// Log the folder tree at info level. Never fails.
pub async fn log_folder_topology<S: MailSession>(session: &mut S) -> Vec<FolderDescriptor> {
    match describe_folders(session).await {
        Ok(descriptors) => {
            info!("Mailbox folder topology:");
            for descriptor in &descriptors {
                info!("{}", descriptor);
            }
            descriptors
        }
        Err(e) => {
            warn!("Failed to inspect mailbox folder topology: {}", e);
            Vec::new()
        }
    }
}
