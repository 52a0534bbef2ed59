//! Server settings.

use std::time::Duration;

/// Connection security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// No encryption (port 143). **Not recommended for production.**
    None,
    /// Start with plaintext, upgrade with STARTTLS (port 143).
    StartTls,
    /// TLS from the start (port 993). **Recommended.**
    #[default]
    Implicit,
}

impl Security {
    /// Returns the default IMAP port for this security mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::None | Self::StartTls => 143,
            Self::Implicit => 993,
        }
    }
}

/// Authentication mechanism to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthType {
    /// `AUTHENTICATE PLAIN` when offered, `LOGIN` otherwise.
    #[default]
    Plain,
    /// `AUTHENTICATE CRAM-MD5`.
    CramMd5,
}

/// Default number of UIDs per FETCH command.
pub const DEFAULT_FETCH_BATCH_SIZE: usize = 100;

/// Default byte limit for a bounded body fetch.
pub const DEFAULT_BODY_SANE_LIMIT: u32 = 50 * 1024;

/// IMAP server settings.
///
/// Immutable once built. Prefix and delimiter discovered from the server
/// are cached by the store, not written back here.
#[derive(Clone)]
pub struct ServerSettings {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// Authentication mechanism.
    pub auth_type: AuthType,
    /// Login name.
    pub username: String,
    /// Password.
    pub password: String,
    /// Folder path prefix; discovered via NAMESPACE when `None`.
    pub path_prefix: Option<String>,
    /// Hierarchy delimiter; discovered via LIST when `None`.
    pub delimiter: Option<char>,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Read timeout outside IDLE.
    pub read_timeout: Duration,
    /// How long one IDLE command is held before it is refreshed.
    pub idle_refresh: Duration,
    /// Added to `idle_refresh` to form the read timeout while idling.
    pub idle_read_increment: Duration,
    /// Negotiate COMPRESS=DEFLATE when the server offers it.
    pub use_compression: bool,
    /// Number of UIDs per FETCH command.
    pub fetch_batch_size: usize,
    /// Byte limit of a bounded body fetch.
    pub body_sane_limit: u32,
}

impl std::fmt::Debug for ServerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("auth_type", &self.auth_type)
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .field("path_prefix", &self.path_prefix)
            .field("delimiter", &self.delimiter)
            .field("use_compression", &self.use_compression)
            .finish_non_exhaustive()
    }
}

impl ServerSettings {
    /// Creates settings for implicit TLS on port 993.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self::builder(host).build()
    }

    /// Creates a settings builder.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> ServerSettingsBuilder {
        ServerSettingsBuilder::new(host)
    }

    /// Read timeout to use while an IDLE command is outstanding.
    #[must_use]
    pub fn idle_read_timeout(&self) -> Duration {
        self.idle_refresh + self.idle_read_increment
    }
}

/// Builder for [`ServerSettings`].
#[derive(Debug, Clone)]
pub struct ServerSettingsBuilder {
    settings: ServerSettings,
    port: Option<u16>,
}

impl ServerSettingsBuilder {
    /// Creates a new builder with the given hostname.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            settings: ServerSettings {
                host: host.into(),
                port: 0,
                security: Security::Implicit,
                auth_type: AuthType::Plain,
                username: String::new(),
                password: String::new(),
                path_prefix: None,
                delimiter: None,
                connect_timeout: Duration::from_secs(30),
                read_timeout: Duration::from_secs(60),
                idle_refresh: Duration::from_secs(24 * 60),
                idle_read_increment: Duration::from_secs(5 * 60),
                use_compression: true,
                fetch_batch_size: DEFAULT_FETCH_BATCH_SIZE,
                body_sane_limit: DEFAULT_BODY_SANE_LIMIT,
            },
            port: None,
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the security mode.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.settings.security = security;
        self
    }

    /// Sets the authentication mechanism.
    #[must_use]
    pub const fn auth_type(mut self, auth_type: AuthType) -> Self {
        self.settings.auth_type = auth_type;
        self
    }

    /// Sets the credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.settings.username = username.into();
        self.settings.password = password.into();
        self
    }

    /// Sets a fixed path prefix, skipping NAMESPACE discovery.
    #[must_use]
    pub fn path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.settings.path_prefix = Some(prefix.into());
        self
    }

    /// Sets a fixed hierarchy delimiter.
    #[must_use]
    pub const fn delimiter(mut self, delimiter: char) -> Self {
        self.settings.delimiter = Some(delimiter);
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.settings.connect_timeout = timeout;
        self
    }

    /// Sets the read timeout used outside IDLE.
    #[must_use]
    pub const fn read_timeout(mut self, timeout: Duration) -> Self {
        self.settings.read_timeout = timeout;
        self
    }

    /// Sets the IDLE refresh interval and its read-timeout increment.
    #[must_use]
    pub const fn idle_refresh(mut self, refresh: Duration, increment: Duration) -> Self {
        self.settings.idle_refresh = refresh;
        self.settings.idle_read_increment = increment;
        self
    }

    /// Enables or disables DEFLATE negotiation.
    #[must_use]
    pub const fn use_compression(mut self, enabled: bool) -> Self {
        self.settings.use_compression = enabled;
        self
    }

    /// Sets the number of UIDs per FETCH command (at least 1).
    #[must_use]
    pub const fn fetch_batch_size(mut self, size: usize) -> Self {
        self.settings.fetch_batch_size = if size == 0 { 1 } else { size };
        self
    }

    /// Sets the byte limit of a bounded body fetch.
    #[must_use]
    pub const fn body_sane_limit(mut self, limit: u32) -> Self {
        self.settings.body_sane_limit = limit;
        self
    }

    /// Builds the settings.
    #[must_use]
    pub fn build(mut self) -> ServerSettings {
        self.settings.port = self
            .port
            .unwrap_or_else(|| self.settings.security.default_port());
        self.settings
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
    use super::*;

    #[test]
    fn test_default_ports() {
        assert_eq!(Security::None.default_port(), 143);
        assert_eq!(Security::StartTls.default_port(), 143);
        assert_eq!(Security::Implicit.default_port(), 993);
    }

    #[test]
    fn test_settings_new() {
        let settings = ServerSettings::new("imap.example.com");
        assert_eq!(settings.host, "imap.example.com");
        assert_eq!(settings.port, 993);
        assert_eq!(settings.security, Security::Implicit);
        assert_eq!(settings.auth_type, AuthType::Plain);
        assert!(settings.path_prefix.is_none());
    }

    #[test]
    fn test_settings_builder() {
        let settings = ServerSettings::builder("imap.example.com")
            .security(Security::StartTls)
            .auth_type(AuthType::CramMd5)
            .credentials("ada", "secret")
            .idle_refresh(Duration::from_secs(60), Duration::from_secs(10))
            .fetch_batch_size(0)
            .build();

        assert_eq!(settings.port, 143);
        assert_eq!(settings.username, "ada");
        assert_eq!(settings.idle_read_timeout(), Duration::from_secs(70));
        assert_eq!(settings.fetch_batch_size, 1);
    }

    #[test]
    fn test_debug_redacts_password() {
        let settings = ServerSettings::builder("h").credentials("u", "hunter2").build();
        let debug = format!("{settings:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[redacted]"));
    }
}
