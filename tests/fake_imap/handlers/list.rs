//! LIST command handler.
//!
//! Supports the `%` and `*` wildcards of RFC 3501 Section 6.3.8:
//! `%` matches anything except the hierarchy delimiter, `*` matches
//! anything. One `* LIST` line is sent per matching folder:
//!
//! ```text
//! * LIST (\Noselect \HasChildren) "/" "Labels"
//! * LIST (\HasNoChildren) "/" "Labels/Work"
//! A0002 OK LIST completed
//! ```
//!
//! If the pattern asks for the children of an `unlistable` folder the
//! server answers NO instead.

use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::{DELIMITER, Mailbox};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Extract the mailbox pattern (the last quoted argument) from a raw
/// LIST command line.
pub fn list_pattern(line: &str) -> Option<String> {
    let line = line.trim_end();
    let body = line.strip_suffix('"')?;

    let mut pattern = Vec::new();
    let mut chars = body.chars().rev().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            // An escaped quote is preceded by a backslash.
            if chars.peek() == Some(&'\\') {
                chars.next();
                pattern.push('"');
                continue;
            }
            let text: String = pattern.into_iter().rev().collect();
            return Some(text.replace("\\\\", "\\"));
        }
        pattern.push(c);
    }
    None
}

/// Whether `name` matches an IMAP LIST `pattern`.
pub fn matches(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();
    matches_from(&pattern, &name)
}

fn matches_from(pattern: &[char], name: &[char]) -> bool {
    match pattern.split_first() {
        None => name.is_empty(),
        Some(('*', rest)) => (0..=name.len()).any(|i| matches_from(rest, &name[i..])),
        Some(('%', rest)) => (0..=name.len())
            .take_while(|&i| i == 0 || name[i - 1] != DELIMITER)
            .any(|i| matches_from(rest, &name[i..])),
        Some((c, rest)) => name.first() == Some(c) && matches_from(rest, &name[1..]),
    }
}

/// Handle the LIST command for `pattern`.
pub async fn handle_list<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    pattern: &str,
    mailbox: &Mailbox,
    stream: &mut BufReader<S>,
) {
    let blocked = mailbox
        .folders
        .iter()
        .any(|f| f.unlistable && pattern.starts_with(&format!("{}{DELIMITER}", f.name)));
    if blocked {
        let resp = format!("{tag} NO LIST failed\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }

    for folder in mailbox.folders.iter().filter(|f| matches(pattern, &f.name)) {
        let mut attributes = Vec::new();
        if !folder.selectable {
            attributes.push("\\Noselect");
        }
        attributes.push(if mailbox.has_children(&folder.name) {
            "\\HasChildren"
        } else {
            "\\HasNoChildren"
        });

        let line = format!(
            "* LIST ({}) \"{DELIMITER}\" \"{}\"\r\n",
            attributes.join(" "),
            folder.name
        );
        if write_line(stream, &line).await.is_err() {
            return;
        }
    }
    let resp = format!("{tag} OK LIST completed\r\n");
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use tokio::io::BufReader;

    async fn run(tag: &str, pattern: &str, mailbox: &Mailbox) -> String {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);

        handle_list(tag, pattern, mailbox, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn tree() -> Mailbox {
        MailboxBuilder::new()
            .folder("INBOX")
            .container("Labels")
            .folder("Labels/Work")
            .folder("Labels/Work/Old")
            .build()
    }

    #[test]
    fn percent_stops_at_delimiter() {
        assert!(matches("%", "INBOX"));
        assert!(!matches("%", "Labels/Work"));
        assert!(matches("Labels/%", "Labels/Work"));
        assert!(!matches("Labels/%", "Labels/Work/Old"));
        assert!(!matches("Labels/%", "Labels"));
    }

    #[test]
    fn star_matches_everything() {
        assert!(matches("*", "Labels/Work/Old"));
        assert!(matches("Labels/*", "Labels/Work/Old"));
    }

    #[test]
    fn extracts_quoted_pattern() {
        assert_eq!(
            list_pattern("A1 LIST \"\" \"Labels/%\"\r\n").as_deref(),
            Some("Labels/%")
        );
        assert_eq!(
            list_pattern("A1 LIST \"\" \"Q\\\"1/%\"\r\n").as_deref(),
            Some("Q\"1/%")
        );
        assert_eq!(list_pattern("A1 LIST \"\" %\r\n"), None);
    }

    #[tokio::test]
    async fn lists_top_level_only() {
        let output = run("A1", "%", &tree()).await;

        assert!(output.contains("\"INBOX\""));
        assert!(output.contains("(\\Noselect \\HasChildren) \"/\" \"Labels\""));
        assert!(!output.contains("Labels/Work"));
        assert!(output.ends_with("A1 OK LIST completed\r\n"));
    }

    #[tokio::test]
    async fn lists_direct_children() {
        let output = run("A2", "Labels/%", &tree()).await;

        assert!(output.contains("(\\HasChildren) \"/\" \"Labels/Work\""));
        assert!(!output.contains("Labels/Work/Old"));
    }

    #[tokio::test]
    async fn unlistable_folder_answers_no() {
        let mailbox = MailboxBuilder::new()
            .folder("A")
            .unlistable()
            .folder("A/B")
            .build();

        let output = run("A3", "A/%", &mailbox).await;
        assert_eq!(output, "A3 NO LIST failed\r\n");
    }

    #[tokio::test]
    async fn empty_mailbox_returns_only_ok() {
        let output = run("T2", "%", &MailboxBuilder::new().build()).await;
        assert_eq!(output, "T2 OK LIST completed\r\n");
    }
}
