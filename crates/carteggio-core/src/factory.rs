//! Stores and transports chosen by account URI scheme.

use std::sync::Arc;

use carteggio_imap::TrustStore;
use tracing::debug;

use crate::account::{Account, Protocol};
use crate::error::{Error, Result};
use crate::push::{NoopWakeLock, WakeLock};
use crate::store::{ImapMessageStore, MessageStore};
use crate::transport::{MessageTransport, SmtpTransport};

/// Creates the message store for an account's incoming URI.
pub trait StoreFactory {
    /// The store type produced.
    type Store: MessageStore;

    /// Builds the store for `account`.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedScheme`] if no store handles the incoming URI.
    fn create_store(&self, account: &Account) -> Result<Self::Store>;
}

/// Creates the transport for an account's outgoing URI.
pub trait TransportFactory {
    /// The transport type produced.
    type Transport: MessageTransport;

    /// Builds the transport for `account`.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedScheme`] if no transport handles the outgoing URI.
    fn create_transport(&self, account: &Account) -> Result<Self::Transport>;
}

/// Dispatches `imap*` URIs to [`ImapMessageStore`] and `smtp*` URIs to
/// [`SmtpTransport`].
pub struct Factory<I = carteggio_imap::TcpConnector, S = carteggio_smtp::TcpConnector> {
    imap: I,
    smtp: S,
    wake_lock: Arc<dyn WakeLock>,
}

impl<I: std::fmt::Debug, S: std::fmt::Debug> std::fmt::Debug for Factory<I, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factory")
            .field("imap", &self.imap)
            .field("smtp", &self.smtp)
            .finish_non_exhaustive()
    }
}

impl Default for Factory {
    fn default() -> Self {
        Self::new()
    }
}

impl Factory {
    /// Network connectors trusting the webpki roots; no wake lock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_connectors(
            carteggio_imap::TcpConnector::new(),
            carteggio_smtp::TcpConnector,
            Arc::new(NoopWakeLock),
        )
    }

    /// Also accepts the certificates in `trust` for IMAP.
    #[must_use]
    pub fn with_trust_store(self, trust: Arc<dyn TrustStore>) -> Self {
        Self {
            imap: self.imap.with_trust_store(trust),
            ..self
        }
    }
}

impl<I, S> Factory<I, S> {
    /// Uses the given connectors and wake lock for everything created.
    pub fn with_connectors(imap: I, smtp: S, wake_lock: Arc<dyn WakeLock>) -> Self {
        Self {
            imap,
            smtp,
            wake_lock,
        }
    }

    /// Replaces the wake lock handed to new stores.
    #[must_use]
    pub fn with_wake_lock(self, wake_lock: Arc<dyn WakeLock>) -> Self {
        Self { wake_lock, ..self }
    }
}

impl<I, S> StoreFactory for Factory<I, S>
where
    I: carteggio_imap::Connector + Clone + 'static,
{
    type Store = ImapMessageStore<I>;

    fn create_store(&self, account: &Account) -> Result<Self::Store> {
        let uri = account.incoming()?;
        if uri.scheme.protocol != Protocol::Imap {
            return Err(Error::UnsupportedScheme(uri.scheme.to_string()));
        }
        debug!(scheme = %uri.scheme, host = %uri.host, "creating message store");
        ImapMessageStore::with_connector(account, self.imap.clone(), Arc::clone(&self.wake_lock))
    }
}

impl<I, S> TransportFactory for Factory<I, S>
where
    S: carteggio_smtp::Connector + Clone,
{
    type Transport = SmtpTransport<S>;

    fn create_transport(&self, account: &Account) -> Result<Self::Transport> {
        let uri = account.outgoing()?;
        if uri.scheme.protocol != Protocol::Smtp {
            return Err(Error::UnsupportedScheme(uri.scheme.to_string()));
        }
        debug!(scheme = %uri.scheme, host = %uri.host, "creating transport");
        SmtpTransport::with_connector(account, self.smtp.clone())
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
    use crate::store::Folder;

    fn account(incoming: &str, outgoing: &str) -> Account {
        Account {
            incoming_uri: incoming.to_string(),
            outgoing_uri: outgoing.to_string(),
            ..Account::new("me@example.com")
        }
    }

    #[test]
    fn test_dispatch_by_scheme() {
        let factory = Factory::new();
        let account = account(
            "imap+ssl+://PLAIN:me:pw@imap.example.com",
            "smtp+tls+://LOGIN:me:pw@smtp.example.com",
        );

        let store = factory.create_store(&account).unwrap();
        assert_eq!(store.store().settings().port, 993);
        assert_eq!(store.inbox().name(), "INBOX");

        let transport = factory.create_transport(&account);
        assert!(transport.is_ok());
    }

    #[test]
    fn test_crossed_uris_are_unsupported() {
        let factory = Factory::new();
        let crossed = account(
            "smtp://PLAIN:me:pw@smtp.example.com",
            "imap://PLAIN:me:pw@imap.example.com",
        );
        assert!(matches!(
            factory.create_store(&crossed),
            Err(Error::UnsupportedScheme(scheme)) if scheme == "smtp"
        ));
        assert!(matches!(
            factory.create_transport(&crossed),
            Err(Error::UnsupportedScheme(scheme)) if scheme == "imap"
        ));

        let pop = account("pop3://me:pw@pop.example.com", "");
        let err = factory.create_store(&pop).unwrap_err();
        assert!(matches!(err, Error::UnsupportedScheme(ref scheme) if scheme == "pop3"));
        assert!(err.is_permanent());
    }
}
