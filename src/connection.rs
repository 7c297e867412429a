//! IMAP connection and session gateway
//!
//! [`connect`] opens a logged-in session over implicit TLS, STARTTLS or
//! plain TCP. [`ImapSession`] implements [`MailSession`] on top of
//! `async-imap`; every read goes through EXAMINE and envelope-only FETCH
//! so nothing is ever marked as seen.

use crate::config::{ImapConfig, TlsMode};
use crate::error::{Error, Result};
use crate::header::{MESSAGE_ID_HEADER, parse_sent_date};
use crate::session::{
    AppendOptions, FolderKind, FolderMode, FolderRef, MailSession, MessageWindow, OpenFolder,
    RawMessage,
};
use async_imap::Session;
use async_imap::types::{Fetch, Name, NameAttribute};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use rustls::pki_types::ServerName;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info};

/// Byte stream an IMAP session runs over: TCP, or TLS over TCP.
pub trait SessionStream: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug> SessionStream for T {}

type RawSession = Session<Compat<Box<dyn SessionStream>>>;

/// Build a TLS connector.
///
/// Certificates are checked against the Mozilla root set unless
/// `accept_invalid_certs` is set, in which case everything is accepted
/// (Proton Bridge and other local bridges use self-signed certs).
fn tls_connector(accept_invalid_certs: bool) -> Result<TlsConnector> {
    let builder =
        rustls::ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(format!("Unsupported TLS configuration: {e}")))?;

    let config = if accept_invalid_certs {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousVerifier))
            .with_no_client_auth()
    } else {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(roots).with_no_client_auth()
    };

    Ok(TlsConnector::from(Arc::new(config)))
}

async fn tls_handshake(config: &ImapConfig, tcp: TcpStream) -> Result<Box<dyn SessionStream>> {
    let connector = tls_connector(config.accept_invalid_certs)?;
    let server_name = ServerName::try_from(config.host.clone())
        .map_err(|e| Error::Tls(format!("Invalid server name: {e}")))?;

    let tls_stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| Error::Tls(e.to_string()))?;
    Ok(Box::new(tls_stream))
}

/// Open a logged-in IMAP session.
///
/// # Errors
///
/// Returns [`Error::Config`] without touching the network when
/// credentials are missing, [`Error::Connection`] or [`Error::Tls`] when
/// the transport cannot be established and [`Error::Authentication`]
/// when the server rejects the login.
pub async fn connect(config: &ImapConfig) -> Result<ImapSession> {
    let credentials = config.credentials().ok_or_else(|| {
        Error::Config("IMAP_USERNAME and IMAP_PASSWORD must be set".to_string())
    })?;

    let addr = format!("{}:{}", config.host, config.port);
    debug!("Connecting to IMAP server at {} ({})", addr, config.tls);

    let tcp_stream = TcpStream::connect(&addr)
        .await
        .map_err(|e| Error::Connection(format!("{addr}: {e}")))?;

    let stream: Box<dyn SessionStream> = match config.tls {
        TlsMode::Implicit => tls_handshake(config, tcp_stream).await?,
        TlsMode::StartTls => {
            let mut client = async_imap::Client::new(tcp_stream.compat());
            client
                .run_command_and_check_ok("STARTTLS", None)
                .await
                .map_err(|e| Error::Tls(format!("STARTTLS failed: {e}")))?;
            let inner = client.into_inner().into_inner();
            tls_handshake(config, inner).await?
        }
        TlsMode::Plain => Box::new(tcp_stream),
    };

    let client = async_imap::Client::new(stream.compat());
    let session = client
        .login(credentials.username, credentials.password)
        .await
        .map_err(|(e, _)| match e {
            async_imap::error::Error::No(_) | async_imap::error::Error::Bad(_) => {
                Error::Authentication(e.to_string())
            }
            other => Error::Connection(format!("Login failed: {other}")),
        })?;

    info!("Connected to IMAP server");
    Ok(ImapSession {
        inner: session,
        selected: None,
    })
}

/// A logged-in IMAP session.
pub struct ImapSession {
    inner: RawSession,
    selected: Option<String>,
}

impl ImapSession {
    /// Name of the currently selected folder, if any.
    #[must_use]
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    fn child_ref(name: &Name) -> FolderRef {
        let full_name = name.name().to_string();
        let delimiter = name.delimiter().map(ToString::to_string);
        let short = delimiter
            .as_deref()
            .and_then(|d| full_name.rsplit(d).next())
            .unwrap_or(&full_name)
            .to_string();

        FolderRef {
            name: short,
            full_name,
            delimiter,
            kind: Some(kind_from_attributes(name.attributes())),
        }
    }
}

fn kind_from_attributes(attributes: &[NameAttribute<'_>]) -> FolderKind {
    let mut kind = FolderKind::ANY;
    for attribute in attributes {
        match attribute {
            NameAttribute::NoSelect => kind.holds_messages = false,
            NameAttribute::NoInferiors => kind.holds_folders = false,
            _ => {}
        }
    }
    kind
}

/// Quote a string for use as an IMAP astring.
fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// LIST pattern matching the direct children of `folder`.
fn child_pattern(folder: &FolderRef) -> Option<String> {
    if folder.is_root() {
        return Some(quote("%"));
    }
    let delimiter = folder.delimiter.as_deref()?;
    Some(quote(&format!("{}{}%", folder.full_name, delimiter)))
}

/// IMAP `date-time` for APPEND, e.g. `"05-Mar-2024 08:00:00 +0000"`.
fn internal_date(at: DateTime<Utc>) -> String {
    quote(&at.format("%d-%b-%Y %H:%M:%S %z").to_string())
}

impl MailSession for ImapSession {
    type Message = EnvelopeMessage;

    const APPEND_PRESERVES_INTERNAL_DATE: bool = true;

    async fn default_folder(&mut self) -> Result<Option<FolderRef>> {
        Ok(Some(FolderRef::root()))
    }

    async fn list_children(&mut self, folder: &FolderRef) -> Result<Vec<Result<FolderRef>>> {
        let Some(pattern) = child_pattern(folder) else {
            debug!(
                "Folder '{}' has no hierarchy delimiter, not listing children",
                folder.display_name()
            );
            return Ok(Vec::new());
        };

        let mut stream = self
            .inner
            .list(Some(""), Some(&pattern))
            .await
            .map_err(|e| Error::Imap(format!("List {pattern} failed: {e}")))?;

        let mut children = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(name) if name.name() == folder.full_name => {}
                Ok(name) => children.push(Ok(Self::child_ref(&name))),
                Err(e) => {
                    children.push(Err(Error::Imap(format!("List {pattern} failed: {e}"))));
                    break;
                }
            }
        }
        drop(stream);

        Ok(children)
    }

    async fn folder_kind(&mut self, folder: &FolderRef) -> Result<FolderKind> {
        folder.kind.ok_or_else(|| {
            Error::Imap(format!(
                "No LIST attributes known for '{}'",
                folder.display_name()
            ))
        })
    }

    async fn message_count(&mut self, folder: &FolderRef) -> Result<u32> {
        let mailbox = self
            .inner
            .status(&folder.full_name, "(MESSAGES)")
            .await
            .map_err(|e| Error::Imap(format!("Status of {} failed: {e}", folder.full_name)))?;
        Ok(mailbox.exists)
    }

    async fn open_folder(&mut self, name: &str, mode: FolderMode) -> Result<OpenFolder> {
        let result = match mode {
            FolderMode::ReadOnly => self.inner.examine(name).await,
            FolderMode::ReadWrite => self.inner.select(name).await,
        };

        let mailbox = result.map_err(|e| match e {
            async_imap::error::Error::No(_) => Error::FolderNotFound(name.to_string()),
            other => Error::FolderAccess(format!("Failed to open {name}: {other}")),
        })?;

        self.selected = Some(name.to_string());
        debug!("Opened '{}' ({} messages)", name, mailbox.exists);
        Ok(OpenFolder {
            name: name.to_string(),
            mode,
            message_count: mailbox.exists,
        })
    }

    async fn fetch_envelopes(&mut self, window: MessageWindow) -> Result<Vec<EnvelopeMessage>> {
        let mut stream = self
            .inner
            .fetch(window.sequence_set(), "(ENVELOPE)")
            .await
            .map_err(|e| Error::Imap(format!("Fetch {window} failed: {e}")))?;

        let mut messages = Vec::with_capacity(window.size() as usize);
        while let Some(item) = stream.next().await {
            let fetch = item.map_err(|e| Error::Imap(format!("Fetch {window} error: {e}")))?;
            messages.push(EnvelopeMessage::from_fetch(&fetch));
        }
        drop(stream);

        // A tagged NO ends the stream without an error item, so a short
        // answer is the only sign the window failed.
        let expected = window.size() as usize;
        if messages.len() != expected {
            return Err(Error::Imap(format!(
                "Fetch {window} returned {} of {expected} messages",
                messages.len()
            )));
        }

        Ok(messages)
    }

    async fn close_folder(&mut self) -> Result<()> {
        self.selected = None;
        self.inner
            .close()
            .await
            .map_err(|e| Error::Imap(format!("Close failed: {e}")))
    }

    async fn append_message(
        &mut self,
        folder: &str,
        raw: &[u8],
        options: &AppendOptions,
    ) -> Result<()> {
        let flags = options.seen.then_some("(\\Seen)");
        let date = options.internal_date.map(internal_date);

        self.inner
            .append(folder, flags, date.as_deref(), raw)
            .await
            .map_err(|e| Error::Imap(format!("Append to {folder} failed: {e}")))
    }

    async fn logout(&mut self) -> Result<()> {
        self.inner
            .logout()
            .await
            .map_err(|e| Error::Imap(format!("Logout failed: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EnvelopeAddress {
    name: Option<Vec<u8>>,
    mailbox: Option<Vec<u8>>,
    host: Option<Vec<u8>>,
}

impl EnvelopeAddress {
    /// `Name <local@host>`, `local@host` or just the name.
    fn render(&self) -> String {
        let address = match (&self.mailbox, &self.host) {
            (Some(mailbox), Some(host)) => format!(
                "{}@{}",
                String::from_utf8_lossy(mailbox),
                String::from_utf8_lossy(host)
            ),
            (Some(mailbox), None) => String::from_utf8_lossy(mailbox).into_owned(),
            _ => String::new(),
        };

        match self.name.as_deref().map(decode_words) {
            Some(name) if !name.is_empty() && !address.is_empty() => format!("{name} <{address}>"),
            Some(name) if !name.is_empty() => name,
            _ => address,
        }
    }
}

/// Decode RFC 2047 encoded words (`=?UTF-8?B?...?=`).
fn decode_words(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let line = format!("X: {}", text.trim());
    mailparse::parse_header(line.as_bytes())
        .map_or_else(|_| text.trim().to_string(), |(header, _)| header.get_value())
        .trim()
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EnvelopeFields {
    message_id: Option<String>,
    date: Option<String>,
    from: Vec<EnvelopeAddress>,
}

/// A message as returned by `FETCH (ENVELOPE)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeMessage {
    sequence_number: u32,
    envelope: Option<EnvelopeFields>,
}

impl EnvelopeMessage {
    fn from_fetch(fetch: &Fetch) -> Self {
        let lossy = |bytes: &[u8]| String::from_utf8_lossy(bytes).trim().to_string();

        let envelope = fetch.envelope().map(|env| EnvelopeFields {
            message_id: env.message_id.as_deref().map(lossy),
            date: env.date.as_deref().map(lossy),
            from: env
                .from
                .as_ref()
                .map(|addresses| {
                    addresses
                        .iter()
                        .map(|a| EnvelopeAddress {
                            name: a.name.as_deref().map(<[u8]>::to_vec),
                            mailbox: a.mailbox.as_deref().map(<[u8]>::to_vec),
                            host: a.host.as_deref().map(<[u8]>::to_vec),
                        })
                        .collect()
                })
                .unwrap_or_default(),
        });

        Self {
            sequence_number: fetch.message,
            envelope,
        }
    }

    fn fields(&self) -> Result<&EnvelopeFields> {
        self.envelope.as_ref().ok_or_else(|| {
            Error::Extraction(format!(
                "No envelope returned for message {}",
                self.sequence_number
            ))
        })
    }
}

impl RawMessage for EnvelopeMessage {
    fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    fn header(&self, name: &str) -> Result<Vec<String>> {
        let fields = self.fields()?;
        if name.eq_ignore_ascii_case(MESSAGE_ID_HEADER) {
            Ok(fields.message_id.iter().cloned().collect())
        } else {
            Ok(Vec::new())
        }
    }

    fn sent_date(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.fields()?.date.as_deref() else {
            return Ok(None);
        };
        let parsed = parse_sent_date(raw);
        if parsed.is_none() {
            debug!(
                "Unparseable date '{}' on message {}",
                raw, self.sequence_number
            );
        }
        Ok(parsed)
    }

    fn from_addresses(&self) -> Result<Vec<String>> {
        Ok(self
            .fields()?
            .from
            .iter()
            .map(EnvelopeAddress::render)
            .collect())
    }
}

/// Certificate verifier that accepts all certificates
/// (for self-signed bridge certs).
#[derive(Debug)]
struct DangerousVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
