//! One-shot message submission over a fresh connection.

use tracing::{debug, info, warn};

use crate::connection::{Client, Connector, MailOptions, SmtpConnection, TcpConnector};
use crate::error::{Error, Result};
use crate::settings::{Security, SmtpSettings};
use crate::types::Address;

/// Sender and recipients of one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Reverse path.
    pub from: Address,
    /// Forward paths, in the order they are offered to the server.
    pub recipients: Vec<Address>,
}

/// Sends messages to a configured server.
///
/// Each call to [`Transport::send`] opens its own connection, runs the full
/// dialogue and closes it again.
#[derive(Debug, Clone)]
pub struct Transport<C = TcpConnector> {
    settings: SmtpSettings,
    connector: C,
}

impl Transport {
    /// Creates a transport that dials TCP.
    #[must_use]
    pub const fn new(settings: SmtpSettings) -> Self {
        Self {
            settings,
            connector: TcpConnector,
        }
    }
}

impl<C: Connector> Transport<C> {
    /// Creates a transport over a custom connector.
    pub const fn with_connector(settings: SmtpSettings, connector: C) -> Self {
        Self {
            settings,
            connector,
        }
    }

    /// Returns the settings this transport sends with.
    pub const fn settings(&self) -> &SmtpSettings {
        &self.settings
    }

    /// Sends `message` to every recipient of `envelope`.
    ///
    /// The message is checked against the server's SIZE limit before MAIL
    /// FROM is issued. Any recipient rejection aborts the submission.
    ///
    /// # Errors
    ///
    /// Connection and TLS failures, [`Error::MessageTooLarge`],
    /// [`Error::RecipientRejected`] and any other refusal.
    pub async fn send(&self, envelope: &Envelope, message: &[u8]) -> Result<()> {
        let Some((first, rest)) = envelope.recipients.split_first() else {
            return Err(Error::InvalidAddress("no recipients".into()));
        };
        let settings = &self.settings;

        let stream = self.connector.connect(settings).await?;
        let mut client = Client::from_stream(stream, settings.read_timeout)
            .await?
            .ehlo(&settings.ehlo_hostname)
            .await?;
        if settings.security == Security::StartTls {
            client = client
                .starttls(&self.connector, &settings.host, &settings.ehlo_hostname)
                .await?;
        }

        let info = client.server_info();
        if let Some(limit) = info.max_message_size()
            && message.len() > limit
        {
            if let Err(err) = client.quit().await {
                debug!(%err, "QUIT after size check failed");
            }
            return Err(Error::MessageTooLarge {
                size: message.len(),
                limit,
            });
        }
        let options = MailOptions {
            size: Some(message.len()),
            eight_bit: !message.is_ascii(),
        };

        let client = client
            .authenticate(
                settings.auth_type,
                &settings.username,
                &settings.password,
            )
            .await?;
        let transaction = client.mail_from(envelope.from.clone(), options).await?;
        let mut client = transaction.rcpt_to(first.clone()).await?;
        for recipient in rest {
            client = client.rcpt_to(recipient.clone()).await?;
        }
        let client = client.data().await?.send_message(message).await?;

        if let Err(err) = client.quit().await {
            warn!(%err, "QUIT failed after successful send");
        }
        info!(
            host = %settings.host,
            recipients = envelope.recipients.len(),
            bytes = message.len(),
            "message sent"
        );
        Ok(())
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
    use std::sync::Mutex;

    use tokio_test::io::{Builder, Mock};

    use super::*;
    use crate::connection::SmtpStream;
    use crate::settings::AuthType;

    struct OneShot(Mutex<Option<Mock>>);

    impl OneShot {
        fn new(mock: Mock) -> Self {
            Self(Mutex::new(Some(mock)))
        }
    }

    impl Connector for OneShot {
        async fn connect(&self, _settings: &SmtpSettings) -> Result<SmtpStream> {
            let mock = self.0.lock().unwrap().take();
            mock.map(SmtpStream::plain)
                .ok_or_else(|| Error::Protocol("connected twice".into()))
        }

        async fn start_tls(&self, stream: SmtpStream, _host: &str) -> Result<SmtpStream> {
            Ok(stream)
        }
    }

    fn settings() -> SmtpSettings {
        SmtpSettings::builder("smtp.example.com")
            .security(Security::None)
            .auth_type(AuthType::Plain)
            .credentials("u", "p")
            .ehlo_hostname("c")
            .build()
    }

    fn envelope(to: &[&str]) -> Envelope {
        Envelope {
            from: Address::new("a@example.com").unwrap(),
            recipients: to.iter().map(|r| Address::new(*r).unwrap()).collect(),
        }
    }

    #[tokio::test]
    async fn test_send_to_two_recipients() {
        let mock = Builder::new()
            .read(b"220 mx ready\r\n")
            .write(b"EHLO c\r\n")
            .read(b"250-mx\r\n250-SIZE 100\r\n250 AUTH PLAIN\r\n")
            .write(b"AUTH PLAIN AHUAcA==\r\n")
            .read(b"235 ok\r\n")
            .write(b"MAIL FROM:<a@example.com> SIZE=7\r\n")
            .read(b"250 ok\r\n")
            .write(b"RCPT TO:<b@example.com>\r\n")
            .read(b"250 ok\r\n")
            .write(b"RCPT TO:<c@example.com>\r\n")
            .read(b"250 ok\r\n")
            .write(b"DATA\r\n")
            .read(b"354 go\r\n")
            .write(b"\r\nhello\r\n.\r\n")
            .read(b"250 queued\r\n")
            .write(b"QUIT\r\n")
            .read(b"221 bye\r\n")
            .build();
        let transport = Transport::with_connector(settings(), OneShot::new(mock));
        transport
            .send(&envelope(&["b@example.com", "c@example.com"]), b"\nhello\n")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_oversized_message_is_refused_before_mail_from() {
        let mock = Builder::new()
            .read(b"220 mx ready\r\n")
            .write(b"EHLO c\r\n")
            .read(b"250-mx\r\n250 SIZE 4\r\n")
            .write(b"QUIT\r\n")
            .read(b"221 bye\r\n")
            .build();
        let transport = Transport::with_connector(settings(), OneShot::new(mock));
        let err = transport
            .send(&envelope(&["b@example.com"]), b"too long")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MessageTooLarge { size: 8, limit: 4 }));
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_empty_envelope_does_not_connect() {
        let transport = Transport::with_connector(settings(), OneShot(Mutex::new(None)));
        let err = transport.send(&envelope(&[]), b"x").await.unwrap_err();
        assert!(matches!(err, Error::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn test_transient_rejection_is_not_permanent() {
        let settings = SmtpSettings::builder("smtp.example.com")
            .security(Security::None)
            .auth_type(AuthType::None)
            .ehlo_hostname("c")
            .build();
        let mock = Builder::new()
            .read(b"220 mx ready\r\n")
            .write(b"EHLO c\r\n")
            .read(b"250 mx\r\n")
            .write(b"MAIL FROM:<a@example.com>\r\n")
            .read(b"451 try later\r\n")
            .build();
        let transport = Transport::with_connector(settings, OneShot::new(mock));
        let err = transport
            .send(&envelope(&["b@example.com"]), b"x")
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(!err.is_permanent());
    }
}
