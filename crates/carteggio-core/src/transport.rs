//! Outgoing mail.

use std::future::Future;

use carteggio_mime::Entity;
use carteggio_smtp::{Address, Connector, Envelope, TcpConnector, Transport};
use tracing::debug;

use crate::account::Account;
use crate::error::{Error, Result};

const RECIPIENT_HEADERS: [&str; 3] = ["To", "Cc", "Bcc"];

/// Sends finished MIME messages.
pub trait MessageTransport: Send + Sync {
    /// Delivers `message` to every address in its To, Cc and Bcc headers.
    /// Bcc is not transmitted.
    fn send_message(&self, message: &Entity) -> impl Future<Output = Result<()>> + Send;
}

/// [`MessageTransport`] over SMTP, one connection per message.
#[derive(Debug)]
pub struct SmtpTransport<C = TcpConnector> {
    transport: Transport<C>,
}

impl SmtpTransport {
    /// Creates a transport for the account's outgoing server.
    ///
    /// # Errors
    ///
    /// Fails if the outgoing URI is not a valid SMTP URI.
    pub fn new(account: &Account) -> Result<Self> {
        Self::with_connector(account, TcpConnector)
    }
}

impl<C: Connector> SmtpTransport<C> {
    /// Creates a transport that connects through `connector`.
    ///
    /// # Errors
    ///
    /// Fails if the outgoing URI is not a valid SMTP URI.
    pub fn with_connector(account: &Account, connector: C) -> Result<Self> {
        Ok(Self {
            transport: Transport::with_connector(account.smtp_settings()?, connector),
        })
    }
}

impl<C: Connector> MessageTransport for SmtpTransport<C> {
    async fn send_message(&self, message: &Entity) -> Result<()> {
        let envelope = envelope(message)?;
        let data = if message.headers.contains("Bcc") {
            let mut visible = message.clone();
            visible.headers.remove("Bcc");
            visible.to_bytes()
        } else {
            message.to_bytes()
        };
        debug!(
            from = %envelope.from,
            recipients = envelope.recipients.len(),
            size = data.len(),
            "sending message"
        );
        self.transport.send(&envelope, &data).await?;
        Ok(())
    }
}

/// Sender and recipients from the message headers, recipients in header
/// order without duplicates.
fn envelope(message: &Entity) -> Result<Envelope> {
    let from = message
        .header("From")
        .map(Address::parse_list)
        .transpose()?
        .and_then(|list| list.into_iter().next())
        .ok_or_else(|| Error::Mime(carteggio_mime::Error::MissingHeader("From".to_string())))?;

    let mut recipients: Vec<Address> = Vec::new();
    for name in RECIPIENT_HEADERS {
        for value in message.headers.get_all(name) {
            for address in Address::parse_list(value)? {
                if !recipients.contains(&address) {
                    recipients.push(address);
                }
            }
        }
    }
    Ok(Envelope { from, recipients })
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
    use carteggio_mime::{Headers, TextMessage, text_message};
    use tokio_test::io::Builder;

    use super::*;
    use crate::testing::{SmtpScripted, account};

    fn message(extra: Vec<(String, String)>) -> Entity {
        text_message(&TextMessage {
            from: "Me <me@example.com>".into(),
            to: vec!["you@example.com".into()],
            subject: "hi".into(),
            body: "hello".into(),
            message_id: Some("<1@example.com>".into()),
            extra_headers: extra,
            ..TextMessage::default()
        })
        .unwrap()
    }

    #[test]
    fn test_envelope_collects_unique_recipients() {
        let entity = message(vec![
            ("Cc".into(), "\"Doe, Jane\" <jane@example.com>, you@example.com".into()),
            ("Bcc".into(), "hidden@example.com".into()),
        ]);
        let envelope = envelope(&entity).unwrap();
        assert_eq!(envelope.from.as_str(), "me@example.com");
        let recipients: Vec<&str> = envelope.recipients.iter().map(Address::as_str).collect();
        assert_eq!(
            recipients,
            vec!["you@example.com", "jane@example.com", "hidden@example.com"]
        );
    }

    #[test]
    fn test_missing_from_is_permanent() {
        let mut headers = Headers::new();
        headers.add("To", "you@example.com");
        let err = envelope(&Entity::leaf(headers, b"x".to_vec())).unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_send_strips_bcc() {
        let entity = message(vec![("Bcc".into(), "hidden@example.com".into())]);
        let mut visible = entity.clone();
        visible.headers.remove("Bcc");
        let data = visible.to_bytes();
        assert!(!String::from_utf8_lossy(&data).contains("hidden@"));

        let expected = carteggio_smtp::DataEncoder::encode_all(&data);
        let mock = Builder::new()
            .read(b"220 mx ready\r\n")
            .write(b"EHLO example.com\r\n")
            .read(b"250-mx\r\n250 AUTH PLAIN\r\n")
            .write(b"AUTH PLAIN AG1lAHB3\r\n")
            .read(b"235 ok\r\n")
            .write(b"MAIL FROM:<me@example.com>\r\n")
            .read(b"250 ok\r\n")
            .write(b"RCPT TO:<you@example.com>\r\n")
            .read(b"250 ok\r\n")
            .write(b"RCPT TO:<hidden@example.com>\r\n")
            .read(b"250 ok\r\n")
            .write(b"DATA\r\n")
            .read(b"354 go\r\n")
            .write(&expected)
            .read(b"250 queued\r\n")
            .write(b"QUIT\r\n")
            .read(b"221 bye\r\n")
            .build();

        let transport = SmtpTransport::with_connector(&account(), SmtpScripted::new(mock)).unwrap();
        transport.send_message(&entity).await.unwrap();
    }
}
