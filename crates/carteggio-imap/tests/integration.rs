//! End-to-end sessions against scripted servers.
//!
//! Every test drives the public API only; the connector hands out
//! `tokio_test` mocks that check each command byte for byte.

#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::Mutex;

use carteggio_imap::connection::ImapStream;
use carteggio_imap::{
    Connector, Error, FetchItem, Message, OpenMode, Security, ServerSettings, Store, SyncPoint,
    Uid,
};
use tokio_test::io::{Builder, Mock};

struct Script(Mutex<VecDeque<Mock>>);

impl Connector for Script {
    async fn connect(&self, _settings: &ServerSettings) -> carteggio_imap::Result<ImapStream> {
        let mock = self.0.lock().unwrap().pop_front().unwrap();
        Ok(ImapStream::plain(mock))
    }

    async fn start_tls(
        &self,
        stream: ImapStream,
        _host: &str,
    ) -> carteggio_imap::Result<ImapStream> {
        Ok(stream)
    }
}

fn store(mocks: Vec<Mock>) -> Store<Script> {
    let settings = ServerSettings::builder("imap.example.com")
        .security(Security::None)
        .path_prefix("")
        .delimiter('/')
        .use_compression(false)
        .build();
    Store::with_connector(settings, Script(Mutex::new(mocks.into())))
}

fn server(capabilities: &str) -> Builder {
    let mut builder = Builder::new();
    builder.read(format!("* PREAUTH [CAPABILITY IMAP4rev1 {capabilities}] ready\r\n").as_bytes());
    builder
}

fn uid(n: u32) -> Uid {
    Uid::new(n).unwrap()
}

#[tokio::test]
async fn test_incremental_sync_session() {
    let mock = server("UIDPLUS")
        .write(b"A0001 SELECT \"INBOX\"\r\n")
        .read(b"* 27 EXISTS\r\n* OK [UIDNEXT 28] next\r\nA0001 OK [READ-WRITE] selected\r\n")
        // First sync only records the watermark.
        .write(b"A0002 UID SEARCH UID *\r\n")
        .read(b"* SEARCH 27\r\nA0002 OK\r\n")
        // Nothing new: the server still answers with the last message.
        .write(b"A0003 UID SEARCH UID 28:* NOT DELETED\r\n")
        .read(b"* SEARCH 27\r\nA0003 OK\r\n")
        .write(b"A0004 UID SEARCH UID 28:* NOT DELETED\r\n")
        .read(b"* 29 EXISTS\r\n* SEARCH 28 29\r\nA0004 OK\r\n")
        .write(b"A0005 UID FETCH 29,28 (UID FLAGS)\r\n")
        .read(b"* 29 FETCH (UID 29 FLAGS (\\Seen))\r\n* 28 FETCH (UID 28 FLAGS ())\r\nA0005 OK\r\n")
        .write(b"A0006 STATUS \"Archive\" (UIDNEXT)\r\n")
        .read(b"* STATUS \"Archive\" (UIDNEXT 100)\r\nA0006 OK\r\n")
        .write(b"A0007 UID COPY 28:29 \"Archive\"\r\n")
        .read(b"A0007 OK [COPYUID 9 28:29 100:101] copied\r\n")
        .build();
    let store = store(vec![mock]);
    let inbox = store.folder("INBOX");
    inbox.open(OpenMode::ReadWrite).await.unwrap();
    assert_eq!(inbox.message_count(), Some(27));

    let mut point = SyncPoint::unknown();
    assert!(inbox.messages_after(&mut point).await.unwrap().is_empty());
    assert_eq!(point.next_uid(), Some(uid(28)));

    assert!(inbox.messages_after(&mut point).await.unwrap().is_empty());
    assert_eq!(point.next_uid(), Some(uid(28)));

    let mut messages = inbox.messages_after(&mut point).await.unwrap();
    assert_eq!(point.save(), "30");
    assert_eq!(inbox.message_count(), Some(29));
    inbox.fetch(&mut messages, &[FetchItem::Flags]).await.unwrap();
    let seen: Vec<(u32, bool)> = messages
        .iter()
        .map(|m| (m.uid().get(), m.flags().is_seen()))
        .collect();
    assert_eq!(seen, vec![(29, true), (28, false)]);

    let mapping = inbox
        .copy_messages(&[uid(28), uid(29)], "Archive")
        .await
        .unwrap();
    assert_eq!(mapping[&uid(28)], uid(100));
    assert_eq!(mapping[&uid(29)], uid(101));
}

#[tokio::test]
async fn test_closed_folder_connection_is_reused() {
    let mock = server("")
        .write(b"A0001 EXAMINE \"INBOX\"\r\n")
        .read(b"* 3 EXISTS\r\nA0001 OK [READ-ONLY] examined\r\n")
        .write(b"A0002 NOOP\r\n")
        .read(b"A0002 OK\r\n")
        .write(b"A0003 CREATE \"Archive\"\r\n")
        .read(b"A0003 OK created\r\n")
        .build();
    let store = store(vec![mock]);
    let inbox = store.folder("INBOX");
    inbox.open(OpenMode::ReadOnly).await.unwrap();
    inbox.close().await;
    assert!(!inbox.is_open().await);
    assert_eq!(store.pooled_connections(), 1);

    assert!(store.create_folder("Archive").await.unwrap());
    assert_eq!(store.pooled_connections(), 1);
}

#[tokio::test]
async fn test_dropped_connection_is_not_pooled() {
    let first = server("")
        .write(b"A0001 EXAMINE \"INBOX\"\r\n")
        .read(b"* 3 EXISTS\r\nA0001 OK [READ-ONLY] examined\r\n")
        .write(b"A0002 UID FETCH 1 (UID FLAGS)\r\n")
        .read(b"* 1 FETCH (UID 1")
        .build();
    let second = server("")
        .write(b"A0001 EXAMINE \"INBOX\"\r\n")
        .read(b"* 3 EXISTS\r\nA0001 OK [READ-ONLY] examined\r\n")
        .build();
    let store = store(vec![first, second]);
    let inbox = store.folder("INBOX");
    inbox.open(OpenMode::ReadOnly).await.unwrap();

    let mut messages = vec![Message::new(uid(1))];
    let err = inbox
        .fetch(&mut messages, &[FetchItem::Flags])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert!(!inbox.is_open().await);

    inbox.open(OpenMode::ReadOnly).await.unwrap();
    assert_eq!(store.pooled_connections(), 0);
}
