//! Folder sessions.
//!
//! A [`Folder`] is bound to one mailbox for the lifetime of its
//! [`Store`](crate::Store). Opening takes a connection from the pool and
//! selects the mailbox; closing hands the connection back. Every
//! operation runs on that one connection under an async lock, so commands
//! are never interleaved. A connection left mid-response (because a
//! caller dropped an operation's future) or broken by a transport error
//! is discarded instead of being reused.

mod copy;
mod fetch;
mod idle;
mod message;
mod search;
mod state;
mod structure;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

pub use idle::{IdleOutcome, IdleSession};
pub use message::{FetchItem, Message};
pub use state::{FolderState, OpenMode};
pub use structure::{ROOT_PART, STORE_DATA_HEADER, apply_structure};

use self::fetch::{BodyCollector, apply_fetch, fetch_attributes, fetch_items};
use crate::command::{Command, FetchAttribute, StatusAttribute};
use crate::connection::{Connector, ImapConnection, TcpConnector};
use crate::parser::NoLiterals;
use crate::store::Pool;
use crate::types::{MailboxStatus, Uid, UidSet};
use crate::{Error, Result};

/// The connection currently bound to a folder.
#[derive(Debug, Default)]
struct Session {
    connection: Option<ImapConnection>,
    mode: Option<OpenMode>,
}

impl Session {
    /// The open connection, or [`Error::NotOpen`]. A connection that can no
    /// longer be trusted is closed here.
    async fn connection(&mut self, name: &str) -> Result<&mut ImapConnection> {
        self.settle().await;
        self.connection
            .as_mut()
            .ok_or_else(|| Error::NotOpen(name.to_string()))
    }

    /// Drops the connection if the last command left it unusable.
    async fn settle(&mut self) {
        if self
            .connection
            .as_ref()
            .is_some_and(|conn| !conn.is_reusable())
            && let Some(mut conn) = self.connection.take()
        {
            debug!("discarding folder connection");
            conn.close().await;
            self.mode = None;
        }
    }

    fn take(&mut self) -> Option<ImapConnection> {
        self.mode = None;
        self.connection.take()
    }
}

struct FolderInner<C> {
    pool: Arc<Pool<C>>,
    name: String,
    state: FolderState,
    session: Mutex<Session>,
}

/// One mailbox of a [`Store`](crate::Store).
///
/// Cloning is cheap and clones share the session.
pub struct Folder<C = TcpConnector> {
    inner: Arc<FolderInner<C>>,
}

impl<C> Clone for Folder<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> std::fmt::Debug for Folder<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Folder")
            .field("name", &self.inner.name)
            .field("state", &self.inner.state)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Folder<C> {
    pub(crate) fn new(pool: Arc<Pool<C>>, name: String) -> Self {
        Self {
            inner: Arc::new(FolderInner {
                pool,
                name,
                state: FolderState::default(),
                session: Mutex::new(Session::default()),
            }),
        }
    }

    /// Local folder name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Mailbox path on the server.
    #[must_use]
    pub fn remote_path(&self) -> String {
        self.inner.pool.remote_path(&self.inner.name)
    }

    /// Live state of the current selection.
    #[must_use]
    pub fn state(&self) -> &FolderState {
        &self.inner.state
    }

    /// Messages in the folder as of the last server report.
    #[must_use]
    pub fn message_count(&self) -> Option<u32> {
        self.inner.state.message_count()
    }

    /// Returns true while a connection is bound and selected.
    pub async fn is_open(&self) -> bool {
        self.inner.session.lock().await.mode.is_some()
    }

    /// Mode of the current selection.
    pub async fn mode(&self) -> Option<OpenMode> {
        self.inner.session.lock().await.mode
    }

    /// Selects the folder.
    ///
    /// If it is already open in `mode`, a NOOP checks the connection and
    /// picks up pending changes; a dead connection is replaced silently.
    ///
    /// # Errors
    ///
    /// - Connection and authentication failures from the pool.
    /// - [`Error::Protocol`] if SELECT/EXAMINE is rejected or the server
    ///   reports no message count.
    pub async fn open(&self, mode: OpenMode) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        session.settle().await;
        if session.mode == Some(mode)
            && let Some(conn) = session.connection.as_mut()
        {
            match conn.noop_with(&mut self.inner.state.tracker()).await {
                Ok(()) => return Ok(()),
                Err(err) => debug!(folder = %self.inner.name, %err, "reopening after failed NOOP"),
            }
        }

        if let Some(old) = session.take() {
            self.inner.pool.release(old).await;
        }
        self.inner.state.reset();

        let mut conn = self.inner.pool.acquire().await?;
        match self.select(&mut conn, mode).await {
            Ok(()) => {
                session.connection = Some(conn);
                session.mode = Some(mode);
                Ok(())
            }
            Err(err) => {
                self.inner.state.reset();
                self.inner.pool.release(conn).await;
                Err(err)
            }
        }
    }

    async fn select(&self, conn: &mut ImapConnection, mode: OpenMode) -> Result<()> {
        let mailbox = self.remote_path();
        let command = match mode {
            OpenMode::ReadWrite => Command::Select { mailbox },
            OpenMode::ReadOnly => Command::Examine { mailbox },
        };
        let state = &self.inner.state;
        state.set_read_only(mode == OpenMode::ReadOnly);
        let responses = conn
            .execute_with(&command, &mut state.tracker(), &mut NoLiterals)
            .await?;
        if let Some(completion) = responses.last() {
            state.apply(completion);
        }
        if state.message_count().is_none() {
            return Err(Error::protocol(format!(
                "{} reported no message count",
                self.inner.name
            )));
        }
        info!(
            folder = %self.inner.name,
            messages = ?state.message_count(),
            read_only = state.is_read_only(),
            "folder opened"
        );
        Ok(())
    }

    /// Unbinds the connection and returns it to the pool. A connection
    /// left mid-command is closed instead.
    pub async fn close(&self) {
        let mut session = self.inner.session.lock().await;
        if let Some(conn) = session.take() {
            self.inner.pool.release(conn).await;
        }
    }

    /// Returns true if the mailbox exists on the server.
    ///
    /// # Errors
    ///
    /// Fails on transport errors only.
    pub async fn exists(&self) -> Result<bool> {
        match self.status().await {
            Ok(_) => Ok(true),
            Err(err) if err.is_protocol() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Runs STATUS on a pooled connection, without selecting.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] if the mailbox does not exist.
    pub async fn status(&self) -> Result<MailboxStatus> {
        let mut conn = self.inner.pool.acquire().await?;
        let result = conn
            .execute(&Command::Status {
                mailbox: self.remote_path(),
                items: vec![
                    StatusAttribute::Messages,
                    StatusAttribute::Unseen,
                    StatusAttribute::UidNext,
                    StatusAttribute::UidValidity,
                ],
            })
            .await;
        self.inner.pool.release(conn).await;
        Ok(result?
            .iter()
            .find_map(MailboxStatus::from_response)
            .unwrap_or_default())
    }

    /// Messages without `\Seen`.
    ///
    /// # Errors
    ///
    /// See [`Folder::status`].
    pub async fn unread_count(&self) -> Result<Option<u32>> {
        Ok(self.status().await?.unseen)
    }

    /// Creates the mailbox. Returns `false` if the server refused.
    ///
    /// # Errors
    ///
    /// Fails on transport errors only.
    pub async fn create(&self) -> Result<bool> {
        self.inner.pool.create_folder(&self.inner.name).await
    }

    /// Fills in `messages` with the requested items.
    ///
    /// UIDs go out in batches of the configured size. Messages the server
    /// no longer has are left untouched.
    ///
    /// # Errors
    ///
    /// - [`Error::NotOpen`] if the folder is closed.
    /// - [`Error::UnsupportedContent`] for structures with embedded messages.
    /// - Protocol and transport errors.
    pub async fn fetch(&self, messages: &mut [Message], items: &[FetchItem]) -> Result<()> {
        if messages.is_empty() || items.is_empty() {
            return Ok(());
        }
        let settings = self.inner.pool.settings();
        let attributes = fetch_attributes(items, settings.body_sane_limit);
        let uids: Vec<Uid> = messages.iter().map(Message::uid).collect();
        let positions: HashMap<Uid, usize> =
            uids.iter().enumerate().map(|(i, uid)| (*uid, i)).collect();

        let mut session = self.inner.session.lock().await;
        for batch in uids.chunks(settings.fetch_batch_size) {
            let command = Command::UidFetch {
                uids: UidSet::from_uids(batch),
                items: attributes.clone(),
            };
            let mut bodies = BodyCollector::default();
            let conn = session.connection(&self.inner.name).await?;
            let result = conn
                .execute_with(&command, &mut self.inner.state.tracker(), &mut bodies)
                .await;
            session.settle().await;
            for response in &result? {
                let Some((uid, fetched)) = fetch_items(response) else {
                    continue;
                };
                if let Some(message) = positions.get(&uid).and_then(|&i| messages.get_mut(i)) {
                    apply_fetch(message, fetched, &mut bodies)?;
                }
            }
        }
        Ok(())
    }

    /// Loads one part's body and returns it with its transfer encoding
    /// removed. The raw bytes stay on the part.
    ///
    /// `part_id` is a leaf id recorded by a structure fetch.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownPart`] if the message has no such part.
    /// - [`Error::Mime`] if the body cannot be decoded.
    /// - Protocol and transport errors.
    pub async fn fetch_part(&self, message: &mut Message, part_id: &str) -> Result<Vec<u8>> {
        if message.part(part_id).is_none() {
            return Err(Error::UnknownPart(part_id.to_string()));
        }
        let command = Command::UidFetch {
            uids: UidSet::from_uids(&[message.uid()]),
            items: vec![FetchAttribute::Uid, FetchAttribute::peek(part_id)],
        };
        let mut bodies = BodyCollector::default();
        let responses = {
            let mut session = self.inner.session.lock().await;
            let conn = session.connection(&self.inner.name).await?;
            let result = conn
                .execute_with(&command, &mut self.inner.state.tracker(), &mut bodies)
                .await;
            session.settle().await;
            result?
        };
        for response in &responses {
            if let Some((uid, fetched)) = fetch_items(response)
                && uid == message.uid()
            {
                apply_fetch(message, fetched, &mut bodies)?;
            }
        }
        let part = message
            .part(part_id)
            .ok_or_else(|| Error::UnknownPart(part_id.to_string()))?;
        Ok(part.decoded_body()?)
    }

    /// An IDLE session on this folder.
    #[must_use]
    pub fn idle_session(&self) -> IdleSession<C> {
        IdleSession::new(self.clone())
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
    use crate::testing::{greeted, store};

    fn uid(n: u32) -> Uid {
        Uid::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_open_selects_and_tracks_state() {
        let mock = greeted("UIDPLUS")
            .write(b"A0001 SELECT \"INBOX\"\r\n")
            .read(b"* 3 EXISTS\r\n* OK [UIDNEXT 10] next\r\n* OK [PERMANENTFLAGS (\\Seen \\Deleted)] ok\r\nA0001 OK [READ-WRITE] selected\r\n")
            .write(b"A0002 NOOP\r\n")
            .read(b"* 4 EXISTS\r\nA0002 OK\r\n")
            .build();
        let store = store(mock);
        let inbox = store.folder("INBOX");

        inbox.open(OpenMode::ReadWrite).await.unwrap();
        assert_eq!(inbox.message_count(), Some(3));
        assert_eq!(inbox.state().uid_next(), Some(uid(10)));
        assert!(!inbox.state().is_read_only());

        // Same mode: NOOP instead of a second SELECT.
        inbox.open(OpenMode::ReadWrite).await.unwrap();
        assert_eq!(inbox.message_count(), Some(4));
        assert_eq!(inbox.mode().await, Some(OpenMode::ReadWrite));
    }

    #[tokio::test]
    async fn test_open_without_exists_is_protocol_error() {
        let mock = greeted("")
            .write(b"A0001 EXAMINE \"Odd\"\r\n")
            .read(b"A0001 OK [READ-ONLY] done\r\n")
            .build();
        let store = store(mock);
        let folder = store.folder("Odd");

        let err = folder.open(OpenMode::ReadOnly).await.unwrap_err();
        assert!(err.is_protocol());
        assert!(!folder.is_open().await);
        assert_eq!(store.pooled_connections(), 1);
    }

    #[tokio::test]
    async fn test_operations_require_open_folder() {
        let store = store(tokio_test::io::Builder::new().build());
        let folder = store.folder("INBOX");
        let mut messages = vec![Message::new(uid(1))];

        let err = folder
            .fetch(&mut messages, &[FetchItem::Flags])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotOpen(name) if name == "INBOX"));
    }

    #[tokio::test]
    async fn test_fetch_batches_and_maps_by_uid() {
        let mock = greeted("")
            .write(b"A0001 EXAMINE \"INBOX\"\r\n")
            .read(b"* 3 EXISTS\r\nA0001 OK [READ-ONLY] done\r\n")
            .write(b"A0002 UID FETCH 7:8 (UID FLAGS)\r\n")
            .read(b"* 2 FETCH (FLAGS (\\Seen) UID 8)\r\n* 1 FETCH (UID 7 FLAGS ())\r\nA0002 OK\r\n")
            .write(b"A0003 UID FETCH 9 (UID FLAGS)\r\n")
            .read(b"* 3 FETCH (UID 9 FLAGS (\\Flagged))\r\nA0003 OK\r\n")
            .build();
        let store = store(mock);
        let inbox = store.folder("INBOX");
        inbox.open(OpenMode::ReadOnly).await.unwrap();

        let mut messages: Vec<_> = [7, 8, 9].into_iter().map(|n| Message::new(uid(n))).collect();
        inbox.fetch(&mut messages, &[FetchItem::Flags]).await.unwrap();

        assert!(!messages[0].flags().is_seen());
        assert!(messages[1].flags().is_seen());
        assert!(messages[2].is_set(&crate::types::Flag::Flagged));
    }

    #[tokio::test]
    async fn test_fetch_part_decodes_body() {
        let mock = greeted("")
            .write(b"A0001 EXAMINE \"INBOX\"\r\n")
            .read(b"* 1 EXISTS\r\nA0001 OK [READ-ONLY] done\r\n")
            .write(b"A0002 UID FETCH 5 (UID BODYSTRUCTURE)\r\n")
            .read(b"* 1 FETCH (UID 5 BODYSTRUCTURE ((\"TEXT\" \"PLAIN\" (\"CHARSET\" \"UTF-8\") NIL NIL \"7BIT\" 2 1)(\"APPLICATION\" \"OCTET-STREAM\" NIL NIL NIL \"BASE64\" 8 NIL (\"ATTACHMENT\" (\"FILENAME\" \"x.bin\")) NIL) \"MIXED\" (\"BOUNDARY\" \"b\")))\r\nA0002 OK\r\n")
            .write(b"A0003 UID FETCH 5 (UID BODY.PEEK[2])\r\n")
            .read(b"* 1 FETCH (UID 5 BODY[2] {8}\r\naGVsbG8=)\r\nA0003 OK\r\n")
            .build();
        let store = store(mock);
        let inbox = store.folder("INBOX");
        inbox.open(OpenMode::ReadOnly).await.unwrap();

        let mut messages = vec![Message::new(uid(5))];
        inbox
            .fetch(&mut messages, &[FetchItem::Structure])
            .await
            .unwrap();
        assert_eq!(messages[0].part_ids(), vec!["1", "2"]);

        let err = inbox.fetch_part(&mut messages[0], "3").await.unwrap_err();
        assert!(matches!(err, Error::UnknownPart(_)));

        let body = inbox.fetch_part(&mut messages[0], "2").await.unwrap();
        assert_eq!(body, b"hello");
        assert!(messages[0].part("2").unwrap().is_loaded());
        assert!(!messages[0].part("1").unwrap().is_loaded());
    }

    #[tokio::test]
    async fn test_close_returns_connection_to_pool() {
        let mock = greeted("")
            .write(b"A0001 SELECT \"INBOX\"\r\n")
            .read(b"* 0 EXISTS\r\nA0001 OK done\r\n")
            .build();
        let store = store(mock);
        let inbox = store.folder("INBOX");
        inbox.open(OpenMode::ReadWrite).await.unwrap();
        assert_eq!(inbox.message_count(), Some(0));

        inbox.close().await;
        assert!(!inbox.is_open().await);
        assert_eq!(store.pooled_connections(), 1);
    }
}
