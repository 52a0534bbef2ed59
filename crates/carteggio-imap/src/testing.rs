//! Scripted streams for unit tests.

#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio_test::io::{Builder, Mock};

use crate::connection::{Connector, ImapStream, Security, ServerSettings};
use crate::store::Store;
use crate::Result;

/// Hands out scripted streams in order; STARTTLS is a no-op.
pub(crate) struct Scripted(Mutex<VecDeque<Mock>>);

impl Scripted {
    pub(crate) fn new(mock: Mock) -> Self {
        Self::sequence(vec![mock])
    }

    pub(crate) fn sequence(mocks: Vec<Mock>) -> Self {
        Self(Mutex::new(mocks.into()))
    }
}

impl Connector for Scripted {
    async fn connect(&self, _settings: &ServerSettings) -> Result<ImapStream> {
        let mock = self.0.lock().unwrap().pop_front().unwrap();
        Ok(ImapStream::plain(mock))
    }

    async fn start_tls(&self, stream: ImapStream, _host: &str) -> Result<ImapStream> {
        Ok(stream)
    }
}

/// Settings that skip authentication and namespace discovery when the
/// server greets with PREAUTH.
pub(crate) fn preauth_settings() -> ServerSettings {
    ServerSettings::builder("imap.example.com")
        .security(Security::None)
        .path_prefix("")
        .delimiter('/')
        .use_compression(false)
        .fetch_batch_size(2)
        .build()
}

/// A script that starts with a PREAUTH greeting advertising `capabilities`.
pub(crate) fn greeted(capabilities: &str) -> Builder {
    let mut builder = Builder::new();
    builder.read(format!("* PREAUTH [CAPABILITY IMAP4rev1 {capabilities}] hi\r\n").as_bytes());
    builder
}

/// A store whose only connection follows `mock`.
pub(crate) fn store(mock: Mock) -> Store<Scripted> {
    Store::with_connector(preauth_settings(), Scripted::new(mock))
}
