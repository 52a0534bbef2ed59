//! Scripted IMAP servers for unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use carteggio_imap::connection::ImapStream;
use carteggio_imap::{Connector, ServerSettings};
use tokio_test::io::{Builder, Mock};

use crate::account::Account;

/// Hands out scripted streams in order; `None` refuses the connection.
/// Clones share the script.
#[derive(Clone)]
pub(crate) struct Scripted(Arc<Mutex<VecDeque<Option<Mock>>>>);

impl Scripted {
    pub(crate) fn new(mocks: Vec<Mock>) -> Self {
        Self::with_failures(mocks.into_iter().map(Some).collect())
    }

    pub(crate) fn with_failures(script: Vec<Option<Mock>>) -> Self {
        Self(Arc::new(Mutex::new(script.into())))
    }
}

impl Connector for Scripted {
    async fn connect(&self, _settings: &ServerSettings) -> carteggio_imap::Result<ImapStream> {
        let next = self.0.lock().unwrap().pop_front();
        match next {
            Some(Some(mock)) => Ok(ImapStream::plain(mock)),
            Some(None) => Err(std::io::Error::from(std::io::ErrorKind::ConnectionRefused).into()),
            None => panic!("unscripted connection"),
        }
    }

    async fn start_tls(
        &self,
        stream: ImapStream,
        _host: &str,
    ) -> carteggio_imap::Result<ImapStream> {
        Ok(stream)
    }
}

/// Hands out one scripted SMTP stream.
pub(crate) struct SmtpScripted(Mutex<Option<Mock>>);

impl SmtpScripted {
    pub(crate) fn new(mock: Mock) -> Self {
        Self(Mutex::new(Some(mock)))
    }
}

impl carteggio_smtp::Connector for SmtpScripted {
    async fn connect(
        &self,
        _settings: &carteggio_smtp::SmtpSettings,
    ) -> carteggio_smtp::Result<carteggio_smtp::SmtpStream> {
        let mock = self.0.lock().unwrap().take().expect("unscripted connection");
        Ok(carteggio_smtp::SmtpStream::plain(mock))
    }

    async fn start_tls(
        &self,
        stream: carteggio_smtp::SmtpStream,
        _host: &str,
    ) -> carteggio_smtp::Result<carteggio_smtp::SmtpStream> {
        Ok(stream)
    }
}

/// A script that starts with a PREAUTH greeting advertising
/// `capabilities`, followed by delimiter discovery as `A0001`.
pub(crate) fn greeted(capabilities: &str) -> Builder {
    let mut builder = Builder::new();
    builder
        .read(format!("* PREAUTH [CAPABILITY IMAP4rev1 {capabilities}] hi\r\n").as_bytes())
        .write(b"A0001 LIST \"\" \"\"\r\n")
        .read(b"* LIST (\\Noselect) \"/\" \"\"\r\nA0001 OK done\r\n");
    builder
}

/// A plaintext account whose server greets with PREAUTH.
pub(crate) fn account() -> Account {
    let mut account = Account::new("me@example.com");
    account.incoming_uri = "imap://PLAIN:me:pw@imap.example.com".to_string();
    account.outgoing_uri = "smtp://PLAIN:me:pw@smtp.example.com".to_string();
    account
}
