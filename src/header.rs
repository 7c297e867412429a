//! Normalized message headers
//!
//! Projects an envelope-level [`RawMessage`] onto the handful of
//! fields reconciliation needs.

use crate::error::Result;
use crate::session::RawMessage;
use chrono::{DateTime, Datelike, Utc};
use mailparse::MailHeaderMap;
use serde::Serialize;
use tracing::warn;

pub const MESSAGE_ID_HEADER: &str = "Message-ID";
const DATE_HEADER: &str = "Date";

/// Per-message projection produced by a fetch. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedHeader {
    /// Folder-local, 1-based. Not stable across sessions.
    pub sequence_number: u32,
    pub message_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    /// Sender addresses joined with `", "`; empty when there are none.
    pub from: String,
}

impl NormalizedHeader {
    /// The message id, unless it is absent or blank.
    #[must_use]
    pub fn usable_message_id(&self) -> Option<&str> {
        self.message_id.as_deref().filter(|id| !id.trim().is_empty())
    }

    /// One-line rendering used in debug logs:
    /// `seq;;message-id;date;from`, with `N/A` for missing values.
    #[must_use]
    pub fn log_line(&self) -> String {
        let message_id = self.usable_message_id().unwrap_or("N/A");
        let date = self
            .sent_at
            .map_or_else(|| "N/A".to_string(), |at| at.to_rfc2822());
        let from = if self.from.trim().is_empty() {
            "N/A"
        } else {
            &self.from
        };
        format!("{};;{};{};{}", self.sequence_number, message_id, date, from)
    }
}

/// Map one raw message, or `None` if its headers cannot be read.
pub fn map_message<M: RawMessage>(message: &M) -> Option<NormalizedHeader> {
    let sequence_number = message.sequence_number();

    match extract(message, sequence_number) {
        Ok(header) => Some(header),
        Err(e) => {
            warn!(
                "Failed to extract headers for message {}: {}",
                sequence_number, e
            );
            None
        }
    }
}

fn extract<M: RawMessage>(message: &M, sequence_number: u32) -> Result<NormalizedHeader> {
    let message_id = message
        .header(MESSAGE_ID_HEADER)?
        .into_iter()
        .next()
        .filter(|id| !id.trim().is_empty());
    let sent_at = message.sent_date()?;
    let from = join_addresses(&message.from_addresses()?);

    Ok(NormalizedHeader {
        sequence_number,
        message_id,
        sent_at,
        from,
    })
}

fn join_addresses(addresses: &[String]) -> String {
    addresses
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a `Date` header value, strict RFC 2822 first.
///
/// `mailparse::dateparse` maps garbage to the epoch, so its result is
/// only trusted when the year it found is written in `raw`.
#[must_use]
pub fn parse_sent_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(date) = DateTime::parse_from_rfc2822(raw) {
        return Some(date.with_timezone(&Utc));
    }

    let date = mailparse::dateparse(raw)
        .ok()
        .and_then(|timestamp| DateTime::from_timestamp(timestamp, 0))?;
    let year = date.year();
    let short_year = format!(" {:02} ", year.rem_euclid(100));
    let names_year = raw.contains(&year.to_string()) || format!(" {raw} ").contains(&short_year);
    names_year.then_some(date)
}

/// Sent date of a complete RFC 5322 message, read from its `Date` header.
#[must_use]
pub fn message_sent_date(raw: &[u8]) -> Option<DateTime<Utc>> {
    let (headers, _) = mailparse::parse_headers(raw).ok()?;
    headers
        .get_first_value(DATE_HEADER)
        .as_deref()
        .and_then(parse_sent_date)
}
