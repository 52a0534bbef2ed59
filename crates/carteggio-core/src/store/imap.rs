//! IMAP-backed message store.

use std::sync::Arc;

use carteggio_imap::{
    Connector, FetchItem, Flags, Message, OpenMode, Store, SyncPoint, TcpConnector, Uid,
};
use carteggio_mime::Entity;
use tracing::debug;

use super::{Folder, FolderListener, MessageStore};
use crate::account::Account;
use crate::error::Result;
use crate::push::{NoopWakeLock, PushConfig, PushManager, WakeLock};

/// A folder of an [`ImapMessageStore`].
///
/// Cloning is cheap and clones share the IMAP session.
pub struct ImapFolder<C = TcpConnector> {
    folder: carteggio_imap::Folder<C>,
    trash: Option<Arc<str>>,
}

impl<C> Clone for ImapFolder<C> {
    fn clone(&self) -> Self {
        Self {
            folder: self.folder.clone(),
            trash: self.trash.clone(),
        }
    }
}

impl<C> std::fmt::Debug for ImapFolder<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapFolder")
            .field("folder", &self.folder)
            .field("trash", &self.trash)
            .finish()
    }
}

impl<C: Connector + 'static> ImapFolder<C> {
    /// The underlying IMAP folder session, for operations outside the
    /// [`Folder`] abstraction.
    #[must_use]
    pub const fn imap(&self) -> &carteggio_imap::Folder<C> {
        &self.folder
    }

    /// Moves messages to the account's trash folder, or only flags them
    /// deleted when there is none or this is the trash.
    ///
    /// # Errors
    ///
    /// Protocol and transport errors.
    pub async fn delete_messages(&self, messages: &[Message]) -> Result<()> {
        self.folder
            .delete_messages(&uids(messages), self.trash.as_deref())
            .await?;
        Ok(())
    }

    /// Adds or removes flags.
    ///
    /// # Errors
    ///
    /// Protocol and transport errors.
    pub async fn set_flags(&self, messages: &mut [Message], flags: &Flags, add: bool) -> Result<()> {
        self.folder.set_flags(messages, flags, add).await?;
        Ok(())
    }

    /// Uploads a message and returns its UID when the server reveals it.
    ///
    /// # Errors
    ///
    /// Protocol and transport errors.
    pub async fn append(&self, message: &Entity) -> Result<Option<Uid>> {
        Ok(self.folder.append(message, &Flags::new()).await?)
    }

    /// Unseen messages, from STATUS.
    ///
    /// # Errors
    ///
    /// Protocol and transport errors.
    pub async fn unread_count(&self) -> Result<Option<u32>> {
        Ok(self.folder.unread_count().await?)
    }
}

fn uids(messages: &[Message]) -> Vec<Uid> {
    messages.iter().map(Message::uid).collect()
}

impl<C: Connector + 'static> Folder for ImapFolder<C> {
    type Message = Message;

    fn name(&self) -> &str {
        self.folder.name()
    }

    async fn open(&self) -> Result<()> {
        self.folder.open(OpenMode::ReadWrite).await?;
        Ok(())
    }

    async fn close(&self) {
        self.folder.close().await;
    }

    async fn messages_after(&self, sync_point: &mut SyncPoint) -> Result<Vec<Message>> {
        Ok(self.folder.messages_after(sync_point).await?)
    }

    async fn fetch_envelopes(&self, messages: &mut [Message]) -> Result<()> {
        self.folder
            .fetch(messages, &[FetchItem::Flags, FetchItem::Envelope])
            .await?;
        Ok(())
    }

    async fn fetch_structures(&self, messages: &mut [Message]) -> Result<()> {
        self.folder.fetch(messages, &[FetchItem::Structure]).await?;
        Ok(())
    }

    async fn move_messages(&self, messages: &[Message], destination: &Self) -> Result<()> {
        let mapping = self
            .folder
            .move_messages(&uids(messages), destination.folder.name())
            .await?;
        debug!(
            from = self.folder.name(),
            to = destination.folder.name(),
            mapped = mapping.len(),
            "moved messages"
        );
        Ok(())
    }

    async fn fetch_part(&self, message: &mut Message, part_id: &str) -> Result<Vec<u8>> {
        Ok(self.folder.fetch_part(message, part_id).await?)
    }
}

/// [`MessageStore`] over IMAP, with IDLE push.
///
/// Push workers run on a connection pool of their own, so a folder being
/// watched stays free for queries.
pub struct ImapMessageStore<C = TcpConnector> {
    store: Store<C>,
    inbox: String,
    private: String,
    trash: Option<Arc<str>>,
    push: PushManager<C>,
}

impl<C> std::fmt::Debug for ImapMessageStore<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapMessageStore")
            .field("store", &self.store)
            .field("inbox", &self.inbox)
            .field("private", &self.private)
            .finish_non_exhaustive()
    }
}

impl ImapMessageStore {
    /// Creates a store for `account` that dials the network.
    ///
    /// # Errors
    ///
    /// Fails if the account's incoming URI is not a valid IMAP URI.
    pub fn new(account: &Account) -> Result<Self> {
        Self::with_connector(account, TcpConnector::new(), Arc::new(NoopWakeLock))
    }
}

impl<C: Connector + Clone + 'static> ImapMessageStore<C> {
    /// Creates a store using `connector` for every connection and
    /// `wake_lock` around push work.
    ///
    /// # Errors
    ///
    /// Fails if the account's incoming URI is not a valid IMAP URI.
    pub fn with_connector(
        account: &Account,
        connector: C,
        wake_lock: Arc<dyn WakeLock>,
    ) -> Result<Self> {
        Self::with_connectors(account, connector.clone(), connector, wake_lock)
    }
}

impl<C: Connector + 'static> ImapMessageStore<C> {
    /// Like [`ImapMessageStore::with_connector`], with push workers
    /// connecting through `push_connector`.
    ///
    /// # Errors
    ///
    /// Fails if the account's incoming URI is not a valid IMAP URI.
    pub fn with_connectors(
        account: &Account,
        connector: C,
        push_connector: C,
        wake_lock: Arc<dyn WakeLock>,
    ) -> Result<Self> {
        let settings = account.imap_settings()?;
        let trash: Option<Arc<str>> = account.trash_folder.as_deref().map(Arc::from);
        let push = PushManager::new(
            Store::with_connector(settings.clone(), push_connector),
            PushConfig::from_account(account),
            wake_lock,
        );
        Ok(Self {
            store: Store::with_connector(settings, connector),
            inbox: account.inbox_folder.clone(),
            private: account.private_folder.clone(),
            trash,
            push,
        })
    }

    /// The folder called `name`.
    #[must_use]
    pub fn folder(&self, name: &str) -> ImapFolder<C> {
        ImapFolder {
            folder: self.store.folder(name),
            trash: self.trash.clone(),
        }
    }

    /// The underlying IMAP store.
    #[must_use]
    pub const fn store(&self) -> &Store<C> {
        &self.store
    }

    /// The push manager, for polling and per-folder control.
    #[must_use]
    pub const fn push(&self) -> &PushManager<C> {
        &self.push
    }

    /// Opens one connection to check host, TLS and credentials.
    ///
    /// # Errors
    ///
    /// Connection, certificate and authentication failures.
    pub async fn check_settings(&self) -> Result<()> {
        Ok(self.store.check_settings().await?)
    }

    /// Lists selectable folders by local name.
    ///
    /// # Errors
    ///
    /// Protocol and transport errors.
    pub async fn list_folders(&self) -> Result<Vec<String>> {
        Ok(self.store.list_folders(false).await?)
    }

    /// Stops push and closes every connection.
    pub async fn close(&self) {
        self.push.shutdown().await;
        self.store.close().await;
    }
}

impl<C: Connector + 'static> MessageStore for ImapMessageStore<C> {
    type Folder = ImapFolder<C>;

    fn inbox(&self) -> ImapFolder<C> {
        self.folder(&self.inbox)
    }

    fn private_folder(&self) -> ImapFolder<C> {
        self.folder(&self.private)
    }

    fn add_message_listener(
        &self,
        folder: &ImapFolder<C>,
        listener: Arc<dyn FolderListener<ImapFolder<C>>>,
    ) {
        self.push.start(folder.clone(), listener);
    }

    async fn remove_message_listeners(&self) {
        self.push.stop_all().await;
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
    use crate::testing::{Scripted, account, greeted};

    #[tokio::test]
    async fn test_inbox_sync_and_move_to_private() {
        let mock = greeted("UIDPLUS")
            .write(b"A0002 SELECT \"INBOX\"\r\n")
            .read(b"* 3 EXISTS\r\n* OK [UIDNEXT 11] next\r\nA0002 OK [READ-WRITE] done\r\n")
            .write(b"A0003 UID SEARCH UID 9:* NOT DELETED\r\n")
            .read(b"* SEARCH 9 10\r\nA0003 OK done\r\n")
            .write(b"A0004 STATUS \"Carteggio\" (UIDNEXT)\r\n")
            .read(b"* STATUS \"Carteggio\" (UIDNEXT 51)\r\nA0004 OK done\r\n")
            .write(b"A0005 UID COPY 10,9 \"Carteggio\"\r\n")
            .read(b"A0005 OK [COPYUID 7 10,9 51:52] done\r\n")
            .write(b"A0006 UID STORE 10,9 +FLAGS.SILENT (\\Deleted)\r\n")
            .read(b"A0006 OK done\r\n")
            .build();
        let store =
            ImapMessageStore::with_connector(&account(), Scripted::new(vec![mock]), Arc::new(NoopWakeLock))
                .unwrap();

        let inbox = store.inbox();
        inbox.open().await.unwrap();
        let mut sync_point = store.parse_sync_point("9").unwrap();
        let messages = inbox.messages_after(&mut sync_point).await.unwrap();
        let uids: Vec<u32> = messages.iter().map(|m| m.uid().get()).collect();
        assert_eq!(uids, vec![10, 9]);
        assert_eq!(sync_point.save(), "11");

        inbox
            .move_messages(&messages, &store.private_folder())
            .await
            .unwrap();
    }

    #[test]
    fn test_bad_sync_point_is_permanent() {
        let store = ImapMessageStore::with_connector(
            &account(),
            Scripted::new(Vec::new()),
            Arc::new(NoopWakeLock),
        )
        .unwrap();
        let err = store.parse_sync_point("yesterday").unwrap_err();
        assert!(matches!(err, crate::Error::InvalidSyncPoint(ref s) if s == "yesterday"));
        assert!(err.is_permanent());
        assert_eq!(store.inbox().name(), "INBOX");
        assert_eq!(store.private_folder().name(), "Carteggio");
    }
}
