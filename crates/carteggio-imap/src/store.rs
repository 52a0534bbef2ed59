//! Connection pool and folder cache for one IMAP account.
//!
//! A [`Store`] hands out one [`Folder`] per folder name for its whole
//! lifetime and keeps idle connections in a LIFO pool. Pooled connections
//! are validated with NOOP before reuse; a connection that fails
//! validation, or that was left mid-response, is closed instead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace};

use crate::command::Command;
use crate::connection::{
    Connector, ImapConnection, Namespace, NamespaceCache, ServerSettings, TcpConnector,
};
use crate::folder::Folder;
use crate::handler::ignore;
use crate::types::ListEntry;
use crate::Result;

/// Connections shared by a store and its folders.
pub(crate) struct Pool<C> {
    settings: Arc<ServerSettings>,
    connector: C,
    namespace: NamespaceCache,
    idle: Mutex<Vec<ImapConnection>>,
}

impl<C: Connector> Pool<C> {
    fn new(settings: ServerSettings, connector: C) -> Self {
        Self {
            settings: Arc::new(settings),
            connector,
            namespace: NamespaceCache::default(),
            idle: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Server path for a folder name, once the namespace is known.
    pub(crate) fn remote_path(&self, name: &str) -> String {
        self.namespace
            .get()
            .map_or_else(|| name.to_string(), |ns| ns.remote_path(name))
    }

    fn pop_idle(&self) -> Option<ImapConnection> {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
    }

    /// Takes the most recently released live connection, or opens a new one.
    pub(crate) async fn acquire(&self) -> Result<ImapConnection> {
        while let Some(mut conn) = self.pop_idle() {
            match conn.noop_with(&mut ignore).await {
                Ok(()) => {
                    trace!("reusing pooled connection");
                    return Ok(conn);
                }
                Err(err) => {
                    debug!(%err, "discarding stale pooled connection");
                    conn.close().await;
                }
            }
        }
        let mut conn = ImapConnection::new(Arc::clone(&self.settings), Arc::clone(&self.namespace));
        conn.open(&self.connector).await?;
        Ok(conn)
    }

    /// Returns a connection to the pool, or closes it if it cannot be
    /// trusted any more.
    pub(crate) async fn release(&self, mut conn: ImapConnection) {
        if conn.is_reusable() {
            self.idle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(conn);
        } else {
            debug!("closing connection that is not reusable");
            conn.close().await;
        }
    }

    /// Runs CREATE. A NO from the server yields `false`.
    pub(crate) async fn create_folder(&self, name: &str) -> Result<bool> {
        let mut conn = self.acquire().await?;
        let result = conn
            .execute(&Command::Create {
                mailbox: self.remote_path(name),
            })
            .await;
        self.release(conn).await;
        match result {
            Ok(_) => Ok(true),
            Err(err) if err.is_protocol() => {
                debug!(folder = name, %err, "CREATE refused");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    async fn close_idle(&self) {
        let connections: Vec<_> = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for mut conn in connections {
            conn.close().await;
        }
    }
}

/// One IMAP account: connection pool, namespace and folder cache.
///
/// Cloning is cheap; clones share everything.
pub struct Store<C = TcpConnector> {
    pool: Arc<Pool<C>>,
    folders: Arc<Mutex<HashMap<String, Folder<C>>>>,
}

impl<C> Clone for Store<C> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            folders: Arc::clone(&self.folders),
        }
    }
}

impl<C> std::fmt::Debug for Store<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("host", &self.pool.settings.host)
            .field("namespace", &self.pool.namespace.get())
            .finish_non_exhaustive()
    }
}

impl Store<TcpConnector> {
    /// Creates a store that dials the network.
    #[must_use]
    pub fn new(settings: ServerSettings) -> Self {
        Self::with_connector(settings, TcpConnector::new())
    }
}

impl<C: Connector> Store<C> {
    /// Creates a store using `connector` to open streams.
    #[must_use]
    pub fn with_connector(settings: ServerSettings, connector: C) -> Self {
        Self {
            pool: Arc::new(Pool::new(settings, connector)),
            folders: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Server settings.
    #[must_use]
    pub fn settings(&self) -> &ServerSettings {
        self.pool.settings()
    }

    /// The folder called `name`, always the same instance for a name.
    #[must_use]
    pub fn folder(&self, name: &str) -> Folder<C> {
        self.folders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert_with(|| Folder::new(Arc::clone(&self.pool), name.to_string()))
            .clone()
    }

    /// Opens and authenticates a connection, then returns it to the pool.
    ///
    /// # Errors
    ///
    /// Whatever [`ImapConnection::open`] reports.
    pub async fn check_settings(&self) -> Result<()> {
        let conn = self.pool.acquire().await?;
        self.pool.release(conn).await;
        Ok(())
    }

    /// Personal namespace, discovering it if no connection has yet.
    ///
    /// # Errors
    ///
    /// Fails if no connection can be opened.
    pub async fn namespace(&self) -> Result<Namespace> {
        if let Some(namespace) = self.pool.namespace.get() {
            return Ok(namespace.clone());
        }
        self.check_settings().await?;
        Ok(self.pool.namespace.get().cloned().unwrap_or_default())
    }

    /// Lists selectable folders under the personal namespace, by local
    /// name. INBOX is always included.
    ///
    /// # Errors
    ///
    /// Fails on transport errors or if the server rejects LIST/LSUB.
    pub async fn list_folders(&self, subscribed_only: bool) -> Result<Vec<String>> {
        let mut conn = self.pool.acquire().await?;
        let namespace = conn.namespace().cloned().unwrap_or_default();
        let reference = String::new();
        let pattern = format!("{}*", namespace.combined_prefix());
        let command = if subscribed_only {
            Command::Lsub { reference, pattern }
        } else {
            Command::List { reference, pattern }
        };
        let result = conn.execute(&command).await;
        self.pool.release(conn).await;

        let mut names: Vec<String> = result?
            .iter()
            .filter_map(ListEntry::from_response)
            .filter(ListEntry::is_selectable)
            .map(|entry| namespace.local_name(&entry.name))
            .collect();
        if !names.iter().any(|n| n.eq_ignore_ascii_case("INBOX")) {
            names.insert(0, "INBOX".to_string());
        }
        names.dedup();
        Ok(names)
    }

    /// Creates a folder. Returns `false` if the server refused, for example
    /// because it already exists.
    ///
    /// # Errors
    ///
    /// Fails on transport errors only.
    pub async fn create_folder(&self, name: &str) -> Result<bool> {
        self.pool.create_folder(name).await
    }

    /// Closes every open folder and pooled connection.
    pub async fn close(&self) {
        let folders: Vec<_> = self
            .folders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for folder in folders {
            folder.close().await;
        }
        self.pool.close_idle().await;
    }

    /// Number of idle connections in the pool.
    #[must_use]
    pub fn pooled_connections(&self) -> usize {
        self.pool
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
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
    use tokio_test::io::Builder;

    use super::*;
    use crate::connection::{AuthType, Security};
    use crate::folder::OpenMode;
    use crate::testing::{Scripted, greeted, store};

    #[tokio::test]
    async fn test_folder_is_cached_by_name() {
        let store = store(Builder::new().build());
        let a = store.folder("Archive");
        let b = store.folder("Archive");
        a.state().set_read_only(true);
        assert!(b.state().is_read_only());
    }

    #[tokio::test]
    async fn test_pooled_connection_is_validated_and_reused() {
        let mock = greeted("")
            .write(b"A0001 CREATE \"Archive\"\r\n")
            .read(b"A0001 OK created\r\n")
            .write(b"A0002 NOOP\r\n")
            .read(b"A0002 OK\r\n")
            .write(b"A0003 CREATE \"Archive\"\r\n")
            .read(b"A0003 NO [ALREADYEXISTS] exists\r\n")
            .build();
        let store = store(mock);

        assert!(store.create_folder("Archive").await.unwrap());
        assert_eq!(store.pooled_connections(), 1);
        assert!(!store.create_folder("Archive").await.unwrap());
        assert_eq!(store.pooled_connections(), 1);
    }

    #[tokio::test]
    async fn test_stale_pooled_connection_is_replaced() {
        let first = greeted("")
            .write(b"A0001 CREATE \"A\"\r\n")
            .read(b"A0001 OK\r\n")
            .write(b"A0002 NOOP\r\n")
            .read(b"* BYE idle too long\r\n")
            .build();
        let second = greeted("")
            .write(b"A0001 CREATE \"B\"\r\n")
            .read(b"A0001 OK\r\n")
            .build();
        let store = Store::with_connector(
            crate::testing::preauth_settings(),
            Scripted::sequence(vec![first, second]),
        );

        store.create_folder("A").await.unwrap();
        store.create_folder("B").await.unwrap();
        assert_eq!(store.pooled_connections(), 1);
    }

    #[tokio::test]
    async fn test_list_folders_uses_namespace() {
        let settings = ServerSettings::builder("imap.example.com")
            .security(Security::None)
            .auth_type(AuthType::Plain)
            .use_compression(false)
            .build();
        let mock = greeted("NAMESPACE")
            .write(b"A0001 NAMESPACE\r\n")
            .read(b"* NAMESPACE ((\"INBOX.\" \".\")) NIL NIL\r\nA0001 OK\r\n")
            .write(b"A0002 LSUB \"\" \"INBOX.*\"\r\n")
            .read(b"* LSUB () \".\" \"INBOX.Sent\"\r\n* LSUB (\\Noselect) \".\" \"INBOX.Old\"\r\n* LSUB () \".\" \"INBOX.Archiv&AOk-\"\r\nA0002 OK\r\n")
            .build();
        let store = Store::with_connector(settings, Scripted::new(mock));

        let names = store.list_folders(true).await.unwrap();
        assert_eq!(names, vec!["INBOX", "Sent", "Archivé"]);
        assert_eq!(store.folder("Sent").remote_path(), "INBOX.Sent");
        assert_eq!(store.folder("INBOX").remote_path(), "INBOX");
    }

    #[tokio::test]
    async fn test_close_releases_folders_and_pool() {
        let mock = greeted("")
            .write(b"A0001 SELECT \"INBOX\"\r\n")
            .read(b"* 1 EXISTS\r\nA0001 OK\r\n")
            .write(b"A0002 LOGOUT\r\n")
            .read(b"* BYE\r\nA0002 OK\r\n")
            .build();
        let store = store(mock);
        store.folder("INBOX").open(OpenMode::ReadWrite).await.unwrap();

        store.close().await;
        assert_eq!(store.pooled_connections(), 0);
        assert!(!store.folder("INBOX").is_open().await);
    }
}
