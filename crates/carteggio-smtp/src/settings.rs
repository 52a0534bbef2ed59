//! Submission server settings.

use std::time::Duration;

/// Connection security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// No encryption (port 25).
    None,
    /// Plaintext upgraded with STARTTLS (port 587).
    #[default]
    StartTls,
    /// TLS from the start (port 465).
    Implicit,
}

impl Security {
    /// Returns the default SMTP port for this security mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::None => 25,
            Self::StartTls => 587,
            Self::Implicit => 465,
        }
    }
}

/// SASL mechanism used for AUTH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthType {
    /// Send without authenticating.
    None,
    /// `AUTH PLAIN` with an initial response.
    #[default]
    Plain,
    /// `AUTH LOGIN`.
    Login,
    /// `AUTH CRAM-MD5`.
    CramMd5,
}

/// SMTP server settings.
#[derive(Clone)]
pub struct SmtpSettings {
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
    /// Name announced in EHLO.
    pub ehlo_hostname: String,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Time allowed for each reply.
    pub read_timeout: Duration,
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("auth_type", &self.auth_type)
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .field("ehlo_hostname", &self.ehlo_hostname)
            .finish_non_exhaustive()
    }
}

impl SmtpSettings {
    /// Creates settings for STARTTLS submission on port 587.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self::builder(host).build()
    }

    /// Creates a settings builder.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> SmtpSettingsBuilder {
        SmtpSettingsBuilder::new(host)
    }
}

/// Builder for [`SmtpSettings`].
#[derive(Debug, Clone)]
pub struct SmtpSettingsBuilder {
    settings: SmtpSettings,
    port: Option<u16>,
}

impl SmtpSettingsBuilder {
    /// Creates a new builder with the given hostname.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            settings: SmtpSettings {
                host: host.into(),
                port: 0,
                security: Security::StartTls,
                auth_type: AuthType::Plain,
                username: String::new(),
                password: String::new(),
                ehlo_hostname: "localhost".to_string(),
                connect_timeout: Duration::from_secs(30),
                read_timeout: Duration::from_secs(300),
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

    /// Sets the name announced in EHLO.
    #[must_use]
    pub fn ehlo_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.settings.ehlo_hostname = hostname.into();
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.settings.connect_timeout = timeout;
        self
    }

    /// Sets the per-reply timeout.
    #[must_use]
    pub const fn read_timeout(mut self, timeout: Duration) -> Self {
        self.settings.read_timeout = timeout;
        self
    }

    /// Builds the settings.
    #[must_use]
    pub fn build(mut self) -> SmtpSettings {
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
        assert_eq!(Security::None.default_port(), 25);
        assert_eq!(Security::StartTls.default_port(), 587);
        assert_eq!(Security::Implicit.default_port(), 465);
    }

    #[test]
    fn test_builder() {
        let settings = SmtpSettings::builder("smtp.example.com")
            .security(Security::Implicit)
            .auth_type(AuthType::Login)
            .credentials("ada", "secret")
            .ehlo_hostname("client.example.org")
            .build();
        assert_eq!(settings.port, 465);
        assert_eq!(settings.auth_type, AuthType::Login);
        assert_eq!(settings.ehlo_hostname, "client.example.org");

        let explicit = SmtpSettings::builder("h").port(2525).build();
        assert_eq!(explicit.port, 2525);
        assert_eq!(explicit.security, Security::StartTls);
    }

    #[test]
    fn test_debug_redacts_password() {
        let settings = SmtpSettings::builder("h").credentials("u", "hunter2").build();
        assert!(!format!("{settings:?}").contains("hunter2"));
    }
}
