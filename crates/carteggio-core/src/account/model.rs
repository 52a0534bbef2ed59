//! Account model types.

use std::time::Duration;

use carteggio_imap::ServerSettings;
use carteggio_smtp::SmtpSettings;
use serde::{Deserialize, Serialize};

use super::uri::ServerUri;
use crate::error::Result;

const DEFAULT_IDLE_REFRESH_SECS: u64 = 24 * 60;
const DEFAULT_BACKOFF_BASE_SECS: u64 = 5;
const DEFAULT_BACKOFF_CEILING_SECS: u64 = 5 * 60;

/// Email account configuration.
///
/// Server details live in the two URIs; see [`ServerUri`] for their
/// format.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Account {
    /// Display name used in the From header.
    pub display_name: String,
    /// Email address.
    pub email: String,
    /// Incoming server, e.g. `imap+ssl+://PLAIN:user:pass@imap.example.com`.
    pub incoming_uri: String,
    /// Outgoing server, e.g. `smtp+tls+://PLAIN:user:pass@smtp.example.com`.
    pub outgoing_uri: String,
    /// Folder watched for new mail.
    pub inbox_folder: String,
    /// Folder holding the private conversation messages.
    pub private_folder: String,
    /// Folder deleted messages are moved to; `None` only flags them.
    pub trash_folder: Option<String>,
    /// How long one IDLE is held before it is renewed, in seconds.
    pub idle_refresh_secs: u64,
    /// First retry delay after a push failure, in seconds.
    pub push_backoff_base_secs: u64,
    /// Longest retry delay after repeated push failures, in seconds.
    pub push_backoff_ceiling_secs: u64,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            email: String::new(),
            incoming_uri: String::new(),
            outgoing_uri: String::new(),
            inbox_folder: "INBOX".to_string(),
            private_folder: "Carteggio".to_string(),
            trash_folder: Some("Trash".to_string()),
            idle_refresh_secs: DEFAULT_IDLE_REFRESH_SECS,
            push_backoff_base_secs: DEFAULT_BACKOFF_BASE_SECS,
            push_backoff_ceiling_secs: DEFAULT_BACKOFF_CEILING_SECS,
        }
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The URIs carry passwords.
        f.debug_struct("Account")
            .field("display_name", &self.display_name)
            .field("email", &self.email)
            .field("incoming", &ServerUri::parse(&self.incoming_uri).ok())
            .field("outgoing", &ServerUri::parse(&self.outgoing_uri).ok())
            .field("inbox_folder", &self.inbox_folder)
            .field("private_folder", &self.private_folder)
            .field("trash_folder", &self.trash_folder)
            .finish_non_exhaustive()
    }
}

impl Account {
    /// Creates an account with default folder names and push timing.
    #[must_use]
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Self::default()
        }
    }

    /// Sets the incoming server from settings.
    #[must_use]
    pub fn with_incoming(mut self, settings: &ServerSettings) -> Self {
        self.incoming_uri = ServerUri::from_imap(settings).to_string();
        self
    }

    /// Sets the outgoing server from settings.
    #[must_use]
    pub fn with_outgoing(mut self, settings: &SmtpSettings) -> Self {
        self.outgoing_uri = ServerUri::from_smtp(settings).to_string();
        self
    }

    /// Parsed incoming server URI.
    ///
    /// # Errors
    ///
    /// See [`ServerUri::parse`].
    pub fn incoming(&self) -> Result<ServerUri> {
        ServerUri::parse(&self.incoming_uri)
    }

    /// Parsed outgoing server URI.
    ///
    /// # Errors
    ///
    /// See [`ServerUri::parse`].
    pub fn outgoing(&self) -> Result<ServerUri> {
        ServerUri::parse(&self.outgoing_uri)
    }

    /// IMAP settings with this account's IDLE refresh interval applied.
    ///
    /// # Errors
    ///
    /// Fails if the incoming URI is not a valid IMAP URI.
    pub fn imap_settings(&self) -> Result<ServerSettings> {
        let mut settings = self.incoming()?.imap_settings()?;
        settings.idle_refresh = self.idle_refresh();
        Ok(settings)
    }

    /// SMTP settings, announcing the email domain in EHLO.
    ///
    /// # Errors
    ///
    /// Fails if the outgoing URI is not a valid SMTP URI.
    pub fn smtp_settings(&self) -> Result<SmtpSettings> {
        let mut settings = self.outgoing()?.smtp_settings()?;
        if let Some((_, domain)) = self.email.rsplit_once('@')
            && !domain.is_empty()
        {
            settings.ehlo_hostname = domain.to_string();
        }
        Ok(settings)
    }

    /// IDLE refresh interval.
    #[must_use]
    pub const fn idle_refresh(&self) -> Duration {
        Duration::from_secs(self.idle_refresh_secs)
    }

    /// First push retry delay.
    #[must_use]
    pub const fn push_backoff_base(&self) -> Duration {
        Duration::from_secs(self.push_backoff_base_secs)
    }

    /// Longest push retry delay.
    #[must_use]
    pub const fn push_backoff_ceiling(&self) -> Duration {
        Duration::from_secs(self.push_backoff_ceiling_secs)
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
    fn test_serde_fills_defaults() {
        let account: Account = serde_json::from_str(
            r#"{"email":"me@example.com","incoming_uri":"imap+ssl+://PLAIN:me:pw@imap.example.com"}"#,
        )
        .unwrap();
        assert_eq!(account.inbox_folder, "INBOX");
        assert_eq!(account.idle_refresh(), Duration::from_secs(24 * 60));

        let json = serde_json::to_string(&account).unwrap();
        let back: Account = serde_json::from_str(&json).unwrap();
        assert_eq!(back, account);
    }

    #[test]
    fn test_settings_from_uris() {
        let mut account = Account::new("me@example.com");
        account.incoming_uri = "imap+ssl+://PLAIN:me:pw@imap.example.com".into();
        account.outgoing_uri = "smtp+tls+://PLAIN:me:pw@smtp.example.com".into();
        account.idle_refresh_secs = 60;

        let imap = account.imap_settings().unwrap();
        assert_eq!(imap.idle_refresh, Duration::from_secs(60));
        assert_eq!(imap.password, "pw");

        let smtp = account.smtp_settings().unwrap();
        assert_eq!(smtp.ehlo_hostname, "example.com");
        assert_eq!(smtp.port, 587);
    }

    #[test]
    fn test_builder_helpers_round_trip() {
        let imap = ServerSettings::builder("imap.example.com")
            .credentials("me", "secret")
            .build();
        let account = Account::new("me@example.com").with_incoming(&imap);
        let back = account.imap_settings().unwrap();
        assert_eq!(back.host, "imap.example.com");
        assert_eq!(back.password, "secret");
        assert!(!format!("{account:?}").contains("secret"));
    }
}
