//! An account driven through the factory: sync, push and send.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::similar_names)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use carteggio_core::{
    Account, Factory, Folder, FolderListener, ImapFolder, MessageStore, MessageTransport,
    NoopWakeLock, StoreFactory, TransportFactory,
};
use carteggio_imap::connection::ImapStream;
use carteggio_mime::{TextMessage, text_message};
use carteggio_smtp::{DataEncoder, SmtpSettings, SmtpStream};
use tokio::sync::mpsc;
use tokio_test::io::{Builder, Mock};

/// IMAP connections in the order they are opened.
#[derive(Clone)]
struct ImapScript(Arc<Mutex<VecDeque<Mock>>>);

impl carteggio_imap::Connector for ImapScript {
    async fn connect(
        &self,
        _settings: &carteggio_imap::ServerSettings,
    ) -> carteggio_imap::Result<ImapStream> {
        let mock = self.0.lock().unwrap().pop_front().expect("unscripted IMAP connection");
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

#[derive(Clone)]
struct SmtpScript(Arc<Mutex<Option<Mock>>>);

impl carteggio_smtp::Connector for SmtpScript {
    async fn connect(&self, _settings: &SmtpSettings) -> carteggio_smtp::Result<SmtpStream> {
        let mock = self.0.lock().unwrap().take().expect("unscripted SMTP connection");
        Ok(SmtpStream::plain(mock))
    }

    async fn start_tls(&self, stream: SmtpStream, _host: &str) -> carteggio_smtp::Result<SmtpStream> {
        Ok(stream)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Event {
    Started,
    Changed,
    NotSupported,
}

struct Channel(mpsc::UnboundedSender<Event>);

impl FolderListener<ImapFolder<ImapScript>> for Channel {
    fn on_folder_changed(&self, _folder: &ImapFolder<ImapScript>) {
        let _ = self.0.send(Event::Changed);
    }

    fn on_listening_not_supported(&self) {
        let _ = self.0.send(Event::NotSupported);
    }

    fn on_listening_started(&self, _folder: &ImapFolder<ImapScript>) {
        let _ = self.0.send(Event::Started);
    }
}

fn greeting(builder: &mut Builder) -> &mut Builder {
    builder
        .read(b"* PREAUTH [CAPABILITY IMAP4rev1 IDLE UIDPLUS] ready\r\n")
        .write(b"A0001 LIST \"\" \"\"\r\n")
        .read(b"* LIST (\\Noselect) \".\" \"\"\r\nA0001 OK done\r\n")
}

fn account() -> Account {
    let json = r#"{
        "display_name": "Me",
        "email": "me@example.com",
        "incoming_uri": "imap://PLAIN:me:pw@imap.example.com",
        "outgoing_uri": "smtp://PLAIN:me:pw@smtp.example.com"
    }"#;
    serde_json::from_str(json).unwrap()
}

#[tokio::test]
async fn test_sync_push_and_send() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("carteggio_core=debug,carteggio_imap=debug")
        .with_test_writer()
        .try_init();

    let app = greeting(&mut Builder::new())
        .write(b"A0002 SELECT \"INBOX\"\r\n")
        .read(b"* 2 EXISTS\r\n* OK [UIDNEXT 5] next\r\nA0002 OK [READ-WRITE] done\r\n")
        .write(b"A0003 UID SEARCH UID 3:* NOT DELETED\r\n")
        .read(b"* SEARCH 3 4\r\nA0003 OK done\r\n")
        .write(b"A0004 LOGOUT\r\n")
        .read(b"* BYE\r\nA0004 OK done\r\n")
        .build();
    let push = greeting(&mut Builder::new())
        .write(b"A0002 EXAMINE \"INBOX\"\r\n")
        .read(b"* 2 EXISTS\r\nA0002 OK [READ-ONLY] done\r\n")
        .write(b"A0003 IDLE\r\n")
        .read(b"+ idling\r\n")
        .read(b"* 3 EXISTS\r\n")
        .write(b"DONE\r\n")
        .read(b"A0003 OK done\r\n")
        .write(b"A0004 NOOP\r\n")
        .read(b"A0004 OK done\r\n")
        .write(b"A0005 IDLE\r\n")
        .read(b"+ idling\r\n")
        .write(b"DONE\r\n")
        .read(b"A0005 OK done\r\n")
        .write(b"A0006 LOGOUT\r\n")
        .read(b"* BYE\r\nA0006 OK done\r\n")
        .build();

    let message = text_message(&TextMessage {
        from: "Me <me@example.com>".into(),
        to: vec!["you@example.org".into()],
        subject: "ciao".into(),
        body: "a presto".into(),
        ..TextMessage::default()
    })
    .unwrap();
    let smtp = Builder::new()
        .read(b"220 mx ready\r\n")
        .write(b"EHLO example.com\r\n")
        .read(b"250-mx\r\n250 AUTH PLAIN\r\n")
        .write(b"AUTH PLAIN AG1lAHB3\r\n")
        .read(b"235 ok\r\n")
        .write(b"MAIL FROM:<me@example.com>\r\n")
        .read(b"250 ok\r\n")
        .write(b"RCPT TO:<you@example.org>\r\n")
        .read(b"250 ok\r\n")
        .write(b"DATA\r\n")
        .read(b"354 go\r\n")
        .write(&DataEncoder::encode_all(&message.to_bytes()))
        .read(b"250 queued\r\n")
        .write(b"QUIT\r\n")
        .read(b"221 bye\r\n")
        .build();

    let factory = Factory::with_connectors(
        ImapScript(Arc::new(Mutex::new(VecDeque::from([app, push])))),
        SmtpScript(Arc::new(Mutex::new(Some(smtp)))),
        Arc::new(NoopWakeLock),
    );
    let account = account();
    let store = factory.create_store(&account).unwrap();

    let inbox = store.inbox();
    inbox.open().await.unwrap();
    let mut sync_point = store.parse_sync_point("3").unwrap();
    let fresh = inbox.messages_after(&mut sync_point).await.unwrap();
    assert_eq!(fresh.len(), 2);
    let saved = sync_point.save();
    assert_eq!(saved, "5");
    assert_eq!(store.parse_sync_point(&saved).unwrap().save(), saved);

    let (tx, mut events) = mpsc::unbounded_channel();
    store.add_message_listener(&inbox, Arc::new(Channel(tx)));
    assert_eq!(events.recv().await, Some(Event::Started));
    assert_eq!(events.recv().await, Some(Event::Changed));
    assert_eq!(events.recv().await, Some(Event::Started));

    let transport = factory.create_transport(&account).unwrap();
    transport.send_message(&message).await.unwrap();

    store.remove_message_listeners().await;
    assert!(store.push().monitored().is_empty());
    store.close().await;
    assert_eq!(store.store().pooled_connections(), 0);
}
