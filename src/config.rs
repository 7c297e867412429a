//! IMAP connection configuration

use crate::error::{Error, Result};
use std::env;
use std::fmt;
use std::str::FromStr;

/// Default number of messages fetched per window.
pub const DEFAULT_WINDOW_SIZE: i64 = 50;

/// How the connection to the IMAP server is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// TLS from the first byte (imaps, usually port 993).
    #[default]
    Implicit,
    /// Plain greeting, then upgraded with STARTTLS (Proton Bridge).
    StartTls,
    /// No encryption at all.
    Plain,
}

impl TlsMode {
    /// The conventional port for this mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Implicit => 993,
            Self::StartTls | Self::Plain => 143,
        }
    }
}

impl FromStr for TlsMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "implicit" | "tls" | "ssl" | "true" => Ok(Self::Implicit),
            "starttls" => Ok(Self::StartTls),
            "plain" | "none" | "false" => Ok(Self::Plain),
            other => Err(Error::Config(format!("Invalid IMAP_TLS: {other}"))),
        }
    }
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Implicit => "implicit",
            Self::StartTls => "starttls",
            Self::Plain => "plain",
        })
    }
}

/// Username and password for the remote mailbox.
#[derive(Clone)]
pub struct Credentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// IMAP connection configuration for the remote mailbox
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub tls: TlsMode,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Messages per fetch window. Zero or negative disables fetching.
    pub window_size: i64,
    /// Skip certificate verification (self-signed bridges).
    pub accept_invalid_certs: bool,
}

impl ImapConfig {
    /// Load IMAP configuration from environment variables
    ///
    /// Reads from `.env` file if present. All variables are optional:
    /// - `IMAP_HOST` (default: `127.0.0.1`)
    /// - `IMAP_TLS` (`implicit`, `starttls` or `plain`; default: `implicit`)
    /// - `IMAP_PORT` (default: 993 for implicit TLS, 143 otherwise)
    /// - `IMAP_USERNAME`, `IMAP_PASSWORD` (remote access is disabled
    ///   when either is missing)
    /// - `IMAP_WINDOW_SIZE` (default: 50)
    /// - `IMAP_ACCEPT_INVALID_CERTS` (default: `false`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let tls = match env::var("IMAP_TLS") {
            Ok(value) => value.parse()?,
            Err(_) => TlsMode::default(),
        };

        let port = match env::var("IMAP_PORT") {
            Ok(value) => value
                .parse()
                .map_err(|e| Error::Config(format!("Invalid IMAP_PORT: {e}")))?,
            Err(_) => tls.default_port(),
        };

        let window_size = match env::var("IMAP_WINDOW_SIZE") {
            Ok(value) => value
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("Invalid IMAP_WINDOW_SIZE: {e}")))?,
            Err(_) => DEFAULT_WINDOW_SIZE,
        };

        let accept_invalid_certs = match env::var("IMAP_ACCEPT_INVALID_CERTS") {
            Ok(value) => parse_bool(&value).ok_or_else(|| {
                Error::Config(format!("Invalid IMAP_ACCEPT_INVALID_CERTS: {value}"))
            })?,
            Err(_) => false,
        };

        Ok(Self {
            host: env::var("IMAP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port,
            tls,
            username: env::var("IMAP_USERNAME").ok(),
            password: env::var("IMAP_PASSWORD").ok(),
            window_size,
            accept_invalid_certs,
        })
    }

    /// The configured credentials, or `None` when either part is blank.
    #[must_use]
    pub fn credentials(&self) -> Option<Credentials<'_>> {
        let username = self.username.as_deref().filter(|u| !u.trim().is_empty())?;
        let password = self.password.as_deref().filter(|p| !p.trim().is_empty())?;
        Some(Credentials { username, password })
    }

    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.credentials().is_some()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
