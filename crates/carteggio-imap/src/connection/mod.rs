//! IMAP connection management.
//!
//! An [`ImapConnection`] owns exactly one socket. [`ImapConnection::open`]
//! runs the handshake: greeting and capabilities, optional STARTTLS,
//! authentication, optional DEFLATE compression and namespace discovery.
//! After that commands are strictly serialized: each one is written under a
//! fresh tag and responses are read until that tag comes back.
//!
//! A connection that failed mid-response, or whose command future was
//! dropped before the tagged completion was read, is marked unusable and
//! must not be handed out again; see [`ImapConnection::is_reusable`].

mod auth;
mod compress;
mod config;
mod framed;
mod stream;
mod tls;

use std::collections::HashSet;
use std::io;
use std::sync::{Arc, OnceLock};

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, trace, warn};

use crate::command::{Command, TagGenerator};
use crate::handler::{UntaggedHandler, ignore};
use crate::parser::{self, ImapList, ImapResponse, LiteralHandler, NoLiterals, Status};
use crate::types::ListEntry;
use crate::{Error, Result};

pub use compress::DeflateStream;
pub use config::{
    AuthType, DEFAULT_BODY_SANE_LIMIT, DEFAULT_FETCH_BATCH_SIZE, Security, ServerSettings,
    ServerSettingsBuilder,
};
pub use framed::{FixedLengthReader, PeekableReader};
pub use stream::{AsyncStream, Connector, ImapStream, TcpConnector};
pub use tls::{MemoryTrustStore, TrustStore};

/// Personal namespace: the prefix folder names live under and the
/// hierarchy delimiter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Namespace {
    /// Prefix as reported by the server or configured by the user.
    pub prefix: String,
    /// Hierarchy delimiter, `None` if the server reported none.
    pub delimiter: Option<char>,
}

impl Namespace {
    /// Parses the personal namespace out of `* NAMESPACE (("p" "d")) ...`.
    #[must_use]
    pub fn from_response(response: &ImapResponse) -> Option<Self> {
        if !response.is_untagged() || !response.atom_is(0, "NAMESPACE") {
            return None;
        }
        let personal = response.list(1)?.list(0)?;
        Some(Self {
            prefix: personal.string(0).unwrap_or_default(),
            delimiter: personal.string(1).and_then(|d| d.chars().next()),
        })
    }

    /// Prefix with the delimiter appended when it is missing.
    #[must_use]
    pub fn combined_prefix(&self) -> String {
        match self.delimiter {
            Some(d) if !self.prefix.is_empty() && !self.prefix.ends_with(d) => {
                format!("{}{d}", self.prefix)
            }
            _ => self.prefix.clone(),
        }
    }

    /// Server path for a local folder name. INBOX is never prefixed.
    #[must_use]
    pub fn remote_path(&self, name: &str) -> String {
        if name.eq_ignore_ascii_case("INBOX") {
            return "INBOX".to_string();
        }
        let prefix = self.combined_prefix();
        if name.starts_with(&prefix) {
            name.to_string()
        } else {
            format!("{prefix}{name}")
        }
    }

    /// Local folder name for a server path.
    #[must_use]
    pub fn local_name(&self, path: &str) -> String {
        if path.eq_ignore_ascii_case("INBOX") {
            return "INBOX".to_string();
        }
        let prefix = self.combined_prefix();
        path.strip_prefix(prefix.as_str()).unwrap_or(path).to_string()
    }
}

/// Namespace shared by every connection of one store, written once by
/// whichever connection discovers it first.
pub type NamespaceCache = Arc<OnceLock<Namespace>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Disconnected,
    Ready,
    Closed,
}

fn closed_error() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::NotConnected,
        "connection is closed",
    ))
}

/// One authenticated IMAP connection.
pub struct ImapConnection {
    settings: Arc<ServerSettings>,
    namespace: NamespaceCache,
    reader: Option<PeekableReader<ImapStream>>,
    tags: TagGenerator,
    capabilities: HashSet<String>,
    capability_updates: u64,
    state: State,
    /// A command was sent and its tagged completion not read yet.
    in_flight: bool,
    /// The stream can no longer be trusted to sit on a response boundary.
    poisoned: bool,
}

impl std::fmt::Debug for ImapConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapConnection")
            .field("host", &self.settings.host)
            .field("state", &self.state)
            .field("tags", &self.tags)
            .field("capabilities", &self.capabilities)
            .field("in_flight", &self.in_flight)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

impl ImapConnection {
    /// Creates a disconnected connection.
    #[must_use]
    pub fn new(settings: Arc<ServerSettings>, namespace: NamespaceCache) -> Self {
        Self {
            settings,
            namespace,
            reader: None,
            tags: TagGenerator::default(),
            capabilities: HashSet::new(),
            capability_updates: 0,
            state: State::Disconnected,
            in_flight: false,
            poisoned: false,
        }
    }

    /// Settings the connection was created with.
    #[must_use]
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Namespace, once discovered.
    #[must_use]
    pub fn namespace(&self) -> Option<&Namespace> {
        self.namespace.get()
    }

    /// Returns true once the handshake has completed and until close.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == State::Ready && self.reader.is_some()
    }

    /// Returns true if the connection may run another command.
    #[must_use]
    pub fn is_reusable(&self) -> bool {
        self.is_open() && !self.in_flight && !self.poisoned
    }

    /// Returns true if DEFLATE compression is active.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.reader
            .as_ref()
            .is_some_and(|r| r.get_ref().is_compressed())
    }

    /// Capabilities, uppercased.
    pub fn capabilities(&self) -> impl Iterator<Item = &str> {
        self.capabilities.iter().map(String::as_str)
    }

    /// Checks a capability, case-insensitively.
    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities
            .contains(&capability.to_ascii_uppercase())
    }

    /// Sets the read timeout for subsequent reads; `None` waits forever.
    pub fn set_read_timeout(&mut self, timeout: Option<std::time::Duration>) {
        if let Some(reader) = self.reader.as_mut() {
            reader.set_read_timeout(timeout);
        }
    }

    /// Connects and runs the handshake. Does nothing if already open.
    ///
    /// Any failure closes the connection for good; create a new one to
    /// retry.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`], [`Error::Tls`] or [`Error::Timeout`] for transport
    ///   failures.
    /// - [`Error::Certificate`] if the server certificate is not trusted.
    /// - [`Error::Authentication`] if login failed or no usable mechanism
    ///   is offered.
    /// - [`Error::Protocol`] if the server rejected the session.
    pub async fn open<C: Connector>(&mut self, connector: &C) -> Result<()> {
        match self.state {
            State::Ready => return Ok(()),
            State::Closed => return Err(closed_error()),
            State::Disconnected => {}
        }
        match self.handshake(connector).await {
            Ok(()) => {
                self.state = State::Ready;
                info!(
                    host = %self.settings.host,
                    compressed = self.is_compressed(),
                    "IMAP connection ready"
                );
                Ok(())
            }
            Err(err) => {
                debug!(host = %self.settings.host, %err, "handshake failed");
                self.shutdown().await;
                self.state = State::Closed;
                Err(err)
            }
        }
    }

    async fn handshake<C: Connector>(&mut self, connector: &C) -> Result<()> {
        let settings = Arc::clone(&self.settings);
        debug!(
            host = %settings.host,
            port = settings.port,
            security = ?settings.security,
            "connecting"
        );
        let stream = connector.connect(&settings).await?;
        self.install(stream);

        let greeting = self.read_response().await?;
        trace!(%greeting, "greeting");
        match greeting.status() {
            Some(Status::Ok | Status::PreAuth) => {}
            _ => return Err(Error::protocol(greeting.to_string())),
        }
        if !self.absorb_capabilities(&greeting) {
            self.refresh_capabilities().await?;
        }

        if settings.security == Security::StartTls {
            self.start_tls(connector).await?;
        }
        if greeting.status() != Some(Status::PreAuth) {
            self.authenticate().await?;
        }
        if settings.use_compression && self.has_capability("COMPRESS=DEFLATE") {
            self.enable_compression().await?;
        }
        self.discover_namespace().await
    }

    fn install(&mut self, stream: ImapStream) {
        let mut reader = PeekableReader::new(stream);
        reader.set_read_timeout(Some(self.settings.read_timeout));
        self.reader = Some(reader);
    }

    /// Takes the raw stream for rewrapping. Fails if the server already
    /// sent bytes that belong to the next layer.
    fn take_stream(&mut self) -> Result<ImapStream> {
        let reader = self.reader.take().ok_or_else(closed_error)?;
        if !reader.buffer_is_empty() {
            return Err(Error::Parse(
                "server sent data before the stream was rewrapped".into(),
            ));
        }
        Ok(reader.into_inner())
    }

    async fn start_tls<C: Connector>(&mut self, connector: &C) -> Result<()> {
        if !self.has_capability("STARTTLS") {
            return Err(Error::protocol("server does not offer STARTTLS"));
        }
        self.execute(&Command::StartTls).await?;
        let stream = self.take_stream()?;
        let stream = connector.start_tls(stream, &self.settings.host).await?;
        self.install(stream);
        debug!("TLS established via STARTTLS");
        // Capabilities seen before the upgrade must not be trusted.
        self.refresh_capabilities().await
    }

    async fn authenticate(&mut self) -> Result<()> {
        let settings = Arc::clone(&self.settings);
        let updates_before = self.capability_updates;
        let result = match settings.auth_type {
            AuthType::CramMd5 => {
                if !self.has_capability("AUTH=CRAM-MD5") {
                    return Err(Error::Authentication(
                        "server does not support CRAM-MD5".into(),
                    ));
                }
                self.sasl("CRAM-MD5", |challenge| {
                    auth::cram_md5_response(&settings.username, &settings.password, challenge)
                })
                .await
            }
            AuthType::Plain if self.has_capability("AUTH=PLAIN") => {
                self.sasl("PLAIN", |_| {
                    Ok(auth::plain_response(&settings.username, &settings.password))
                })
                .await
            }
            AuthType::Plain if self.has_capability("LOGINDISABLED") => {
                return Err(Error::Authentication(
                    "LOGIN is disabled and AUTH=PLAIN is not offered".into(),
                ));
            }
            AuthType::Plain => self
                .execute(&Command::Login {
                    username: settings.username.clone(),
                    password: settings.password.clone(),
                })
                .await
                .map(drop),
        };
        match result {
            Ok(()) => {}
            Err(Error::Protocol { response, .. }) => return Err(Error::Authentication(response)),
            Err(err) => return Err(err),
        }
        debug!(user = %settings.username, "authenticated");

        if self.capability_updates == updates_before {
            self.refresh_capabilities().await?;
        }
        Ok(())
    }

    /// Runs one SASL exchange, answering each continuation with `respond`.
    async fn sasl<F>(&mut self, mechanism: &str, mut respond: F) -> Result<()>
    where
        F: FnMut(&str) -> Result<String> + Send,
    {
        let tag = self
            .send_command(&Command::Authenticate {
                mechanism: mechanism.to_string(),
            })
            .await?;
        let mut failure = None;
        loop {
            let response = self.read_response().await?;
            if response.is_continuation() {
                let reply = if failure.is_some() {
                    "*".to_string()
                } else {
                    match respond(response.text().unwrap_or_default()) {
                        Ok(reply) => reply,
                        Err(err) => {
                            failure = Some(err);
                            "*".to_string()
                        }
                    }
                };
                trace!(mechanism, "AUTHENTICATE response [redacted]");
                self.write_raw(format!("{reply}\r\n").as_bytes()).await?;
                continue;
            }
            self.absorb_capabilities(&response);
            if response.tag() == Some(tag.as_str()) {
                return failure.map_or(Ok(()), Err);
            }
        }
    }

    async fn enable_compression(&mut self) -> Result<()> {
        match self.execute(&Command::CompressDeflate).await {
            Ok(_) => {
                let stream = self.take_stream()?;
                self.install(stream.compress());
                debug!("DEFLATE compression enabled");
                Ok(())
            }
            Err(err) if err.is_protocol() => {
                debug!(%err, "compression refused, continuing uncompressed");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn discover_namespace(&mut self) -> Result<()> {
        if self.namespace.get().is_some() {
            return Ok(());
        }
        let settings = Arc::clone(&self.settings);
        let mut namespace = Namespace {
            prefix: settings.path_prefix.clone().unwrap_or_default(),
            delimiter: settings.delimiter,
        };
        if settings.path_prefix.is_none() && self.has_capability("NAMESPACE") {
            let responses = self.execute(&Command::Namespace).await?;
            if let Some(personal) = responses.iter().find_map(Namespace::from_response) {
                namespace.prefix = personal.prefix;
                namespace.delimiter = namespace.delimiter.or(personal.delimiter);
            }
        }
        if namespace.delimiter.is_none() {
            let responses = self
                .execute(&Command::List {
                    reference: String::new(),
                    pattern: String::new(),
                })
                .await?;
            namespace.delimiter = responses
                .iter()
                .filter_map(ListEntry::from_response)
                .find_map(|entry| entry.delimiter);
        }
        debug!(prefix = %namespace.prefix, delimiter = ?namespace.delimiter, "namespace");
        // Another connection of the same store may have won the race.
        let _ = self.namespace.set(namespace);
        Ok(())
    }

    /// Replaces the capability set if the response carries one.
    fn absorb_capabilities(&mut self, response: &ImapResponse) -> bool {
        let list: &ImapList = if response.is_untagged() && response.atom_is(0, "CAPABILITY") {
            response.items()
        } else if let Some(code) = response
            .response_code()
            .filter(|code| code.atom_is(0, "CAPABILITY"))
        {
            code
        } else {
            return false;
        };
        self.capabilities = list
            .iter()
            .skip(1)
            .filter_map(|v| v.as_str())
            .map(str::to_ascii_uppercase)
            .collect();
        self.capability_updates += 1;
        trace!(capabilities = ?self.capabilities, "capabilities");
        true
    }

    async fn refresh_capabilities(&mut self) -> Result<()> {
        self.capabilities.clear();
        self.execute(&Command::Capability).await.map(drop)
    }

    /// Writes a command under the next tag and returns the tag.
    ///
    /// # Errors
    ///
    /// Fails if the connection is closed, the write fails, or the previous
    /// command was abandoned before its completion was read.
    pub async fn send_command(&mut self, command: &Command) -> Result<String> {
        if self.in_flight {
            self.poisoned = true;
            return Err(Error::Parse(
                "previous command was abandoned mid-response".into(),
            ));
        }
        let tag = self.tags.next();
        trace!(command = %command.log_line(&tag), "send");
        let bytes = command.serialize(&tag);
        self.in_flight = true;
        self.write_raw(&bytes).await?;
        Ok(tag)
    }

    /// Writes raw bytes: continuation data, literals or `DONE`.
    ///
    /// # Errors
    ///
    /// Fails if the connection is closed or the write fails.
    pub async fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        let reader = self.reader.as_mut().ok_or_else(closed_error)?;
        if let Err(err) = reader.write_all_flush(data).await {
            self.poisoned = true;
            return Err(err.into());
        }
        Ok(())
    }

    /// Reads one response with literals kept in memory.
    ///
    /// # Errors
    ///
    /// See [`ImapConnection::read_response_with`].
    pub async fn read_response(&mut self) -> Result<ImapResponse> {
        self.read_response_with(&mut NoLiterals).await
    }

    /// Reads one response, offering literals to `literals`.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if the read timeout elapsed.
    /// - Everything [`parser::read_response`] returns.
    pub async fn read_response_with<L: LiteralHandler>(
        &mut self,
        literals: &mut L,
    ) -> Result<ImapResponse> {
        let reader = self.reader.as_mut().ok_or_else(closed_error)?;
        let limit = reader.read_timeout();
        let result = parser::read_response(reader, literals).await;
        match &result {
            Ok(response) => {
                trace!(%response, "recv");
                if response.is_tagged() {
                    self.in_flight = false;
                }
            }
            Err(Error::Protocol { response, .. }) => {
                trace!(%response, "recv");
                self.in_flight = false;
            }
            Err(err) if err.poisons_connection() => {
                self.poisoned = true;
            }
            Err(_) => {}
        }
        result.map_err(|err| match err {
            Error::Io(e) if e.kind() == io::ErrorKind::TimedOut => {
                Error::Timeout(limit.unwrap_or_default())
            }
            other => other,
        })
    }

    /// Waits until the server has sent something, without consuming it.
    ///
    /// Cancel-safe, so it can race against a stop signal.
    ///
    /// # Errors
    ///
    /// Fails if the connection is closed or the stream ends.
    pub async fn wait_readable(&mut self) -> Result<()> {
        let reader = self.reader.as_mut().ok_or_else(closed_error)?;
        if let Err(err) = reader.wait_readable().await {
            self.poisoned = true;
            return Err(err.into());
        }
        Ok(())
    }

    /// Runs a command, ignoring untagged data and keeping literals in
    /// memory.
    ///
    /// # Errors
    ///
    /// See [`ImapConnection::execute_with`].
    pub async fn execute(&mut self, command: &Command) -> Result<Vec<ImapResponse>> {
        self.execute_with(command, &mut ignore, &mut NoLiterals)
            .await
    }

    /// Runs a command to completion.
    ///
    /// Every untagged response is passed to `untagged` as it is read and
    /// also returned; the tagged completion is the last element.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the command completed with NO or BAD.
    /// - A literal handler error, once the command has completed.
    /// - Transport and parse errors, which leave the connection unusable.
    pub async fn execute_with<H, L>(
        &mut self,
        command: &Command,
        untagged: &mut H,
        literals: &mut L,
    ) -> Result<Vec<ImapResponse>>
    where
        H: UntaggedHandler,
        L: LiteralHandler,
    {
        let tag = self.send_command(command).await?;
        self.read_until_tagged(&tag, untagged, literals).await
    }

    /// Reads responses until the completion for `tag`.
    ///
    /// # Errors
    ///
    /// See [`ImapConnection::execute_with`].
    pub async fn read_until_tagged<H, L>(
        &mut self,
        tag: &str,
        untagged: &mut H,
        literals: &mut L,
    ) -> Result<Vec<ImapResponse>>
    where
        H: UntaggedHandler,
        L: LiteralHandler,
    {
        let mut responses = Vec::new();
        let mut deferred = None;
        loop {
            let response = match self.read_response_with(literals).await {
                Ok(response) => response,
                // Handler failures leave the stream framed; finish the
                // command before reporting them.
                Err(err) if !err.is_protocol() && !err.poisons_connection() => {
                    deferred.get_or_insert(err);
                    continue;
                }
                Err(err) => return Err(err),
            };
            self.absorb_capabilities(&response);
            if response.is_continuation() {
                self.poisoned = true;
                return Err(Error::protocol(format!(
                    "unexpected continuation: {response}"
                )));
            }
            if let Some(got) = response.tag() {
                if got != tag {
                    self.poisoned = true;
                    return Err(Error::Parse(format!("expected tag {tag}, got {got}")));
                }
                if let Some(err) = deferred {
                    return Err(err);
                }
                responses.push(response);
                return Ok(responses);
            }
            if response.status() == Some(Status::Bye) {
                warn!(host = %self.settings.host, %response, "server is closing the connection");
            }
            untagged.on_untagged(&response);
            responses.push(response);
        }
    }

    /// Sends NOOP, delivering any pending untagged data to `untagged`.
    ///
    /// # Errors
    ///
    /// See [`ImapConnection::execute_with`].
    pub async fn noop_with<H: UntaggedHandler>(&mut self, untagged: &mut H) -> Result<()> {
        self.execute_with(&Command::Noop, untagged, &mut NoLiterals)
            .await
            .map(drop)
    }

    /// Logs out if possible and closes the socket. Closing is final.
    pub async fn close(&mut self) {
        if self.is_reusable()
            && let Err(err) = self.execute(&Command::Logout).await
        {
            debug!(%err, "LOGOUT failed");
        }
        self.shutdown().await;
        self.state = State::Closed;
    }

    async fn shutdown(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            if let Err(err) = reader.get_mut().shutdown().await {
                trace!(%err, "shutdown failed");
            }
            debug!(host = %self.settings.host, "connection closed");
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use std::time::Duration;

    use tokio_test::io::{Builder, Mock};

    use super::*;
    use crate::testing::Scripted;

    fn settings(auth_type: AuthType) -> Arc<ServerSettings> {
        Arc::new(
            ServerSettings::builder("imap.example.com")
                .security(Security::None)
                .auth_type(auth_type)
                .credentials("user", "secret")
                .use_compression(false)
                .build(),
        )
    }

    fn connection(auth_type: AuthType) -> ImapConnection {
        ImapConnection::new(settings(auth_type), NamespaceCache::default())
    }

    #[tokio::test]
    async fn test_cram_md5_without_capability_never_logs_in() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN] ready\r\n")
            .build();
        let mut conn = connection(AuthType::CramMd5);

        let err = conn.open(&Scripted::new(mock)).await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert!(err.is_permanent());
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn test_login_disabled_without_auth_plain_never_logs_in() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 LOGINDISABLED] ready\r\n")
            .build();
        let mut conn = connection(AuthType::Plain);

        let err = conn.open(&Scripted::new(mock)).await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[tokio::test]
    async fn test_handshake_with_sasl_plain_and_namespace() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0001 CAPABILITY\r\n")
            .read(b"* CAPABILITY IMAP4rev1 AUTH=PLAIN NAMESPACE\r\nA0001 OK done\r\n")
            .write(b"A0002 AUTHENTICATE PLAIN\r\n")
            .read(b"+ \r\n")
            .write(b"AHVzZXIAc2VjcmV0\r\n")
            .read(b"A0002 OK [CAPABILITY IMAP4rev1 NAMESPACE IDLE] Logged in\r\n")
            .write(b"A0003 NAMESPACE\r\n")
            .read(b"* NAMESPACE ((\"INBOX.\" \".\")) NIL NIL\r\nA0003 OK\r\n")
            .write(b"A0004 LOGOUT\r\n")
            .read(b"* BYE bye\r\nA0004 OK\r\n")
            .build();
        let mut conn = connection(AuthType::Plain);

        conn.open(&Scripted::new(mock)).await.unwrap();
        assert!(conn.is_reusable());
        assert!(conn.has_capability("idle"));
        assert!(!conn.has_capability("AUTH=PLAIN"));
        let namespace = conn.namespace().unwrap();
        assert_eq!(namespace.prefix, "INBOX.");
        assert_eq!(namespace.delimiter, Some('.'));

        conn.close().await;
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn test_cram_md5_exchange() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 AUTH=CRAM-MD5] ready\r\n")
            .write(b"A0001 AUTHENTICATE CRAM-MD5\r\n")
            .read(b"+ PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+\r\n")
            .write(b"dGltIGI5MTNhNjAyYzdlZGE3YTQ5NWI0ZTZlNzMzNGQzODkw\r\n")
            .read(b"A0001 OK [CAPABILITY IMAP4rev1] welcome\r\n")
            .write(b"A0002 LIST \"\" \"\"\r\n")
            .read(b"* LIST (\\Noselect) \"/\" \"\"\r\nA0002 OK\r\n")
            .build();
        let settings = Arc::new(
            ServerSettings::builder("imap.example.com")
                .security(Security::None)
                .auth_type(AuthType::CramMd5)
                .credentials("tim", "tanstaaftanstaaf")
                .use_compression(false)
                .build(),
        );
        let mut conn = ImapConnection::new(settings, NamespaceCache::default());

        conn.open(&Scripted::new(mock)).await.unwrap();
        assert_eq!(conn.namespace().unwrap().delimiter, Some('/'));
        assert_eq!(conn.namespace().unwrap().prefix, "");
    }

    #[tokio::test]
    async fn test_rejected_login_is_authentication_failure() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
            .write(b"A0001 LOGIN \"user\" \"secret\"\r\n")
            .read(b"A0001 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n")
            .build();
        let mut conn = connection(AuthType::Plain);

        let err = conn.open(&Scripted::new(mock)).await.unwrap_err();
        match err {
            Error::Authentication(text) => assert!(text.contains("Invalid credentials")),
            other => panic!("unexpected {other:?}"),
        }
        // Closed for good.
        assert!(conn.open(&Scripted::sequence(Vec::new())).await.is_err());
    }

    #[tokio::test]
    async fn test_starttls_required_but_not_offered() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN] hi\r\n")
            .build();
        let settings = Arc::new(
            ServerSettings::builder("imap.example.com")
                .security(Security::StartTls)
                .credentials("user", "secret")
                .build(),
        );
        let mut conn = ImapConnection::new(settings, NamespaceCache::default());

        let err = conn.open(&Scripted::new(mock)).await.unwrap_err();
        assert!(err.is_protocol());
    }

    #[tokio::test]
    async fn test_starttls_refreshes_capabilities() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 STARTTLS LOGINDISABLED] hi\r\n")
            .write(b"A0001 STARTTLS\r\n")
            .read(b"A0001 OK Begin TLS\r\n")
            .write(b"A0002 CAPABILITY\r\n")
            .read(b"* CAPABILITY IMAP4rev1 AUTH=PLAIN\r\nA0002 OK\r\n")
            .write(b"A0003 AUTHENTICATE PLAIN\r\n")
            .read(b"+\r\n")
            .write(b"AHVzZXIAc2VjcmV0\r\n")
            .read(b"A0003 OK [CAPABILITY IMAP4rev1] ok\r\n")
            .build();
        let settings = Arc::new(
            ServerSettings::builder("imap.example.com")
                .security(Security::StartTls)
                .credentials("user", "secret")
                .path_prefix("")
                .delimiter('/')
                .use_compression(false)
                .build(),
        );
        let mut conn = ImapConnection::new(settings, NamespaceCache::default());

        conn.open(&Scripted::new(mock)).await.unwrap();
        assert!(!conn.has_capability("LOGINDISABLED"));
    }

    #[tokio::test]
    async fn test_compression_refusal_is_not_fatal() {
        let mock = Builder::new()
            .read(b"* PREAUTH [CAPABILITY IMAP4rev1 COMPRESS=DEFLATE] welcome back\r\n")
            .write(b"A0001 COMPRESS DEFLATE\r\n")
            .read(b"A0001 NO not now\r\n")
            .build();
        let settings = Arc::new(
            ServerSettings::builder("imap.example.com")
                .security(Security::None)
                .path_prefix("")
                .delimiter('/')
                .build(),
        );
        let mut conn = ImapConnection::new(settings, NamespaceCache::default());

        conn.open(&Scripted::new(mock)).await.unwrap();
        assert!(!conn.is_compressed());
        assert!(conn.is_reusable());
    }

    async fn ready(mock: Mock) -> ImapConnection {
        let settings = Arc::new(
            ServerSettings::builder("imap.example.com")
                .security(Security::None)
                .path_prefix("")
                .delimiter('/')
                .build(),
        );
        let mut conn = ImapConnection::new(settings, NamespaceCache::default());
        conn.open(&Scripted::new(mock)).await.unwrap();
        conn
    }

    #[tokio::test]
    async fn test_execute_delivers_untagged_in_order() {
        let mock = Builder::new()
            .read(b"* PREAUTH [CAPABILITY IMAP4rev1] hi\r\n")
            .write(b"A0001 NOOP\r\n")
            .read(b"* 4 EXISTS\r\n* 2 EXPUNGE\r\nA0001 OK NOOP done\r\n")
            .build();
        let mut conn = ready(mock).await;

        let mut seen = Vec::new();
        let responses = conn
            .execute_with(
                &Command::Noop,
                &mut |r: &ImapResponse| seen.push(r.to_string()),
                &mut NoLiterals,
            )
            .await
            .unwrap();
        assert_eq!(seen, vec!["* 4 EXISTS", "* 2 EXPUNGE"]);
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[2].tag(), Some("A0001"));
    }

    #[tokio::test]
    async fn test_tagged_no_keeps_connection_usable() {
        let mock = Builder::new()
            .read(b"* PREAUTH [CAPABILITY IMAP4rev1] hi\r\n")
            .write(b"A0001 SELECT \"Missing\"\r\n")
            .read(b"A0001 NO [NONEXISTENT] Unknown mailbox\r\n")
            .build();
        let mut conn = ready(mock).await;

        let err = conn
            .execute(&Command::Select {
                mailbox: "Missing".into(),
            })
            .await
            .unwrap_err();
        assert!(err.is_protocol());
        assert!(conn.is_reusable());
    }

    #[tokio::test]
    async fn test_read_timeout_poisons_connection() {
        let mock = Builder::new()
            .read(b"* PREAUTH [CAPABILITY IMAP4rev1] hi\r\n")
            .write(b"A0001 NOOP\r\n")
            .wait(Duration::from_secs(5))
            .build();
        let mut conn = ready(mock).await;
        conn.set_read_timeout(Some(Duration::from_millis(20)));

        let err = conn.execute(&Command::Noop).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(!conn.is_reusable());
    }

    #[test]
    fn test_namespace_paths() {
        let namespace = Namespace {
            prefix: "INBOX".into(),
            delimiter: Some('.'),
        };
        assert_eq!(namespace.combined_prefix(), "INBOX.");
        assert_eq!(namespace.remote_path("Sent"), "INBOX.Sent");
        assert_eq!(namespace.remote_path("inbox"), "INBOX");
        assert_eq!(namespace.remote_path("INBOX.Sent"), "INBOX.Sent");
        assert_eq!(namespace.local_name("INBOX.Archive"), "Archive");

        let flat = Namespace::default();
        assert_eq!(flat.remote_path("Sent"), "Sent");
    }
}
