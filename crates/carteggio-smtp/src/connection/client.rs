//! Type-state SMTP client.

use std::marker::PhantomData;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tracing::{debug, trace};

use super::auth;
use super::{Connector, MailOptions, ServerInfo, SmtpStream};
use crate::command::Command;
use crate::data::DataEncoder;
use crate::error::{Error, Result};
use crate::parser::read_reply;
use crate::settings::AuthType;
use crate::types::{Address, AuthMechanism, Extension, Reply, ReplyClass, ReplyCode};

/// Bytes of message handed to the encoder per write.
const DATA_CHUNK: usize = 16 * 1024;

/// Type-state marker for connected state.
#[derive(Debug)]
pub struct Connected;

/// Type-state marker for authenticated state.
#[derive(Debug)]
pub struct Authenticated;

/// Type-state marker for mail transaction started.
#[derive(Debug)]
pub struct MailTransaction;

/// Type-state marker for recipient added.
#[derive(Debug)]
pub struct RecipientAdded;

/// Type-state marker for data mode.
#[derive(Debug)]
pub struct Data;

/// SMTP client with type-state pattern.
#[derive(Debug)]
pub struct Client<State> {
    stream: BufReader<SmtpStream>,
    server_info: ServerInfo,
    timeout: Duration,
    _state: PhantomData<State>,
}

/// Connection trait for all states.
pub trait SmtpConnection {
    /// Returns the server information.
    fn server_info(&self) -> &ServerInfo;
}

impl<S> SmtpConnection for Client<S> {
    fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }
}

impl Client<Connected> {
    /// Creates a client from a stream and reads the server greeting.
    ///
    /// `timeout` bounds every reply and write.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the greeting fails or if the server
    /// does not greet with 220.
    pub async fn from_stream(stream: SmtpStream, timeout: Duration) -> Result<Self> {
        let mut stream = BufReader::new(stream);
        let greeting = read_reply(&mut stream, timeout).await?;
        trace!(code = %greeting.code, text = %greeting.message_text(), "S:");
        if greeting.code != ReplyCode::SERVICE_READY {
            return Err(greeting.to_error());
        }

        let hostname = greeting
            .message
            .first()
            .and_then(|msg| msg.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();
        debug!(%hostname, "SMTP greeting");

        Ok(Self {
            stream,
            server_info: ServerInfo {
                hostname,
                extensions: Vec::new(),
            },
            timeout,
            _state: PhantomData,
        })
    }

    /// Sends EHLO and records the extensions; falls back to HELO when the
    /// server does not speak ESMTP.
    ///
    /// # Errors
    ///
    /// Returns an error if both greetings are refused.
    pub async fn ehlo(mut self, client_hostname: &str) -> Result<Self> {
        let reply = self
            .send_command(&Command::Ehlo {
                hostname: client_hostname.to_string(),
            })
            .await?;

        if reply.is_success() {
            self.server_info.extensions =
                reply.message.iter().skip(1).map(|line| Extension::parse(line)).collect();
        } else if reply.code.class() == Some(ReplyClass::Permanent) {
            debug!(code = %reply.code, "EHLO refused, trying HELO");
            self.send_command(&Command::Helo {
                hostname: client_hostname.to_string(),
            })
            .await?
            .success()?;
            self.server_info.extensions.clear();
        } else {
            return Err(reply.to_error());
        }
        Ok(self)
    }

    /// Upgrades the connection to TLS using STARTTLS, then repeats EHLO.
    ///
    /// # Errors
    ///
    /// Returns an error if STARTTLS is not advertised, is refused, or the
    /// TLS handshake fails.
    pub async fn starttls<C: Connector>(
        mut self,
        connector: &C,
        host: &str,
        client_hostname: &str,
    ) -> Result<Self> {
        if !self.server_info.supports_starttls() {
            return Err(Error::NotSupported("STARTTLS".into()));
        }
        self.send_command(&Command::StartTls).await?.success()?;
        if !self.stream.buffer().is_empty() {
            return Err(Error::Protocol("Data received before TLS handshake".into()));
        }

        let plain = self.stream.into_inner();
        self.stream = BufReader::new(connector.start_tls(plain, host).await?);
        self.server_info.extensions.clear();
        self.ehlo(client_hostname).await
    }

    /// Authenticates with the configured mechanism. [`AuthType::None`]
    /// skips AUTH entirely.
    ///
    /// # Errors
    ///
    /// [`Error::Authentication`] if the server does not offer the mechanism
    /// or rejects the credentials; transport errors.
    pub async fn authenticate(
        mut self,
        auth_type: AuthType,
        username: &str,
        password: &str,
    ) -> Result<Client<Authenticated>> {
        let mechanism = match auth_type {
            AuthType::None => return Ok(self.into_state()),
            AuthType::Plain => AuthMechanism::Plain,
            AuthType::Login => AuthMechanism::Login,
            AuthType::CramMd5 => AuthMechanism::CramMd5,
        };
        if !self.server_info.auth_mechanisms().contains(&mechanism) {
            return Err(Error::Authentication(format!(
                "server does not offer AUTH {mechanism}"
            )));
        }

        let reply = match mechanism {
            AuthMechanism::Plain => {
                self.send_command(&Command::Auth {
                    mechanism,
                    initial_response: Some(auth::plain(username, password)),
                })
                .await?
            }
            AuthMechanism::Login => {
                let reply = self.start_auth(mechanism).await?;
                let reply = self.answer(&reply, auth::login(username)).await?;
                self.answer(&reply, auth::login(password)).await?
            }
            AuthMechanism::CramMd5 => {
                let reply = self.start_auth(mechanism).await?;
                let challenge = challenge(&reply)?;
                match auth::cram_md5(username, password, &challenge) {
                    Ok(response) => self.send_command(&Command::AuthResponse(response)).await?,
                    Err(err) => {
                        self.send_command(&Command::AuthResponse("*".into())).await?;
                        return Err(err);
                    }
                }
            }
        };

        if reply.code != ReplyCode::AUTH_SUCCESS {
            return Err(auth_failure(&reply));
        }
        debug!(%mechanism, "authenticated");
        Ok(self.into_state())
    }

    /// Starts a mail transaction without authentication (if server allows).
    ///
    /// # Errors
    ///
    /// Returns an error if the MAIL FROM command fails.
    pub async fn mail_from(
        self,
        from: Address,
        options: MailOptions,
    ) -> Result<Client<MailTransaction>> {
        self.start_mail(from, options).await
    }

    async fn start_auth(&mut self, mechanism: AuthMechanism) -> Result<Reply> {
        self.send_command(&Command::Auth {
            mechanism,
            initial_response: None,
        })
        .await
    }

    async fn answer(&mut self, reply: &Reply, response: String) -> Result<Reply> {
        if reply.code != ReplyCode::AUTH_CONTINUE {
            return Err(auth_failure(reply));
        }
        self.send_command(&Command::AuthResponse(response)).await
    }
}

fn challenge(reply: &Reply) -> Result<String> {
    if reply.code == ReplyCode::AUTH_CONTINUE {
        Ok(reply.message_text())
    } else {
        Err(auth_failure(reply))
    }
}

fn auth_failure(reply: &Reply) -> Error {
    Error::Authentication(format!("{} {}", reply.code, reply.message_text()))
}

impl Client<Authenticated> {
    /// Starts a mail transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the MAIL FROM command fails.
    pub async fn mail_from(
        self,
        from: Address,
        options: MailOptions,
    ) -> Result<Client<MailTransaction>> {
        self.start_mail(from, options).await
    }
}

impl Client<MailTransaction> {
    /// Adds the first recipient.
    ///
    /// # Errors
    ///
    /// [`Error::RecipientRejected`] if the server refuses the address.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Client<RecipientAdded>> {
        self.add_recipient(to).await?;
        Ok(self.into_state())
    }

    /// Resets the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RSET command fails.
    pub async fn reset(mut self) -> Result<Client<Connected>> {
        self.send_command(&Command::Rset).await?.success()?;
        Ok(self.into_state())
    }
}

impl Client<RecipientAdded> {
    /// Adds another recipient to the transaction.
    ///
    /// # Errors
    ///
    /// [`Error::RecipientRejected`] if the server refuses the address.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Self> {
        self.add_recipient(to).await?;
        Ok(self)
    }

    /// Begins sending message data.
    ///
    /// # Errors
    ///
    /// Returns an error unless the server answers 354.
    pub async fn data(mut self) -> Result<Client<Data>> {
        let reply = self.send_command(&Command::Data).await?;
        if reply.code != ReplyCode::START_DATA {
            return Err(reply.to_error());
        }
        Ok(self.into_state())
    }

    /// Resets the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RSET command fails.
    pub async fn reset(mut self) -> Result<Client<Connected>> {
        self.send_command(&Command::Rset).await?.success()?;
        Ok(self.into_state())
    }
}

impl Client<Data> {
    /// Streams the message and completes the transaction.
    ///
    /// Line endings are normalized to CRLF, leading dots are doubled and
    /// the terminating `.` line is added.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails or the server rejects the message.
    pub async fn send_message(mut self, message: &[u8]) -> Result<Client<Connected>> {
        let mut encoder = DataEncoder::new();
        let mut out = Vec::with_capacity(DATA_CHUNK + DATA_CHUNK / 8);
        for chunk in message.chunks(DATA_CHUNK) {
            out.clear();
            encoder.encode(chunk, &mut out);
            self.write(&out).await?;
        }
        out.clear();
        encoder.finish(&mut out);
        self.write(&out).await?;
        trace!(bytes = message.len(), "C: <message data>");

        self.read_reply().await?.success()?;
        Ok(self.into_state())
    }
}

// Common implementation for all states
impl<S> Client<S> {
    fn into_state<T>(self) -> Client<T> {
        Client {
            stream: self.stream,
            server_info: self.server_info,
            timeout: self.timeout,
            _state: PhantomData,
        }
    }

    async fn start_mail(
        mut self,
        from: Address,
        options: MailOptions,
    ) -> Result<Client<MailTransaction>> {
        let command = Command::MailFrom {
            from,
            eight_bit: options.eight_bit && self.server_info.supports(&Extension::EightBitMime),
            size: options.size.filter(|_| self.server_info.supports_size()),
        };
        self.send_command(&command).await?.success()?;
        Ok(self.into_state())
    }

    async fn add_recipient(&mut self, to: Address) -> Result<()> {
        let reply = self
            .send_command(&Command::RcptTo { to: to.clone() })
            .await?;
        if reply.is_success() {
            return Ok(());
        }
        Err(Error::RecipientRejected {
            recipient: to.to_string(),
            code: reply.code.as_u16(),
            message: reply.message_text(),
        })
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self.stream.get_mut();
        tokio::time::timeout(self.timeout, async {
            stream.write_all(bytes).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| Error::Timeout(self.timeout))??;
        Ok(())
    }

    async fn send_command(&mut self, cmd: &Command) -> Result<Reply> {
        trace!(command = %cmd.redacted(), "C:");
        self.write(&cmd.serialize()).await?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        let reply = read_reply(&mut self.stream, self.timeout).await?;
        trace!(code = %reply.code, text = %reply.message_text(), "S:");
        Ok(reply)
    }

    /// Sends QUIT and closes the connection (available in any state).
    ///
    /// # Errors
    ///
    /// Returns an error if the QUIT command fails.
    pub async fn quit(mut self) -> Result<()> {
        let reply = self.send_command(&Command::Quit).await?;
        if !reply.is_success() && reply.code != ReplyCode::CLOSING {
            return Err(reply.to_error());
        }
        if let Err(err) = self.stream.get_mut().shutdown().await {
            trace!(%err, "shutdown failed");
        }
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
    use tokio_test::io::{Builder, Mock};

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn greeted() -> Builder {
        let mut builder = Builder::new();
        builder.read(b"220 mx.example.com ESMTP ready\r\n");
        builder
    }

    async fn client(mock: Mock) -> Client<Connected> {
        Client::from_stream(SmtpStream::plain(mock), TIMEOUT)
            .await
            .unwrap()
    }

    fn addr(s: &str) -> Address {
        Address::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_greeting_and_ehlo() {
        let mock = greeted()
            .write(b"EHLO client.test\r\n")
            .read(b"250-mx.example.com hello\r\n250-SIZE 1000\r\n250-8BITMIME\r\n250 AUTH PLAIN CRAM-MD5\r\n")
            .build();
        let client = client(mock).await.ehlo("client.test").await.unwrap();
        let info = client.server_info();
        assert_eq!(info.hostname, "mx.example.com");
        assert_eq!(info.max_message_size(), Some(1000));
        assert!(info.supports(&Extension::EightBitMime));
        assert_eq!(
            info.auth_mechanisms(),
            vec![AuthMechanism::Plain, AuthMechanism::CramMd5]
        );
    }

    #[tokio::test]
    async fn test_refused_greeting() {
        let mock = Builder::new().read(b"554 go away\r\n").build();
        let err = Client::from_stream(SmtpStream::plain(mock), TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rejected { code: 554, .. }));
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_helo_fallback() {
        let mock = greeted()
            .write(b"EHLO c\r\n")
            .read(b"502 not implemented\r\n")
            .write(b"HELO c\r\n")
            .read(b"250 mx\r\n")
            .build();
        let client = client(mock).await.ehlo("c").await.unwrap();
        assert!(client.server_info().extensions.is_empty());
    }

    #[tokio::test]
    async fn test_auth_login_exchange() {
        let mock = greeted()
            .write(b"EHLO c\r\n")
            .read(b"250-mx\r\n250 AUTH LOGIN\r\n")
            .write(b"AUTH LOGIN\r\n")
            .read(b"334 VXNlcm5hbWU6\r\n")
            .write(b"dXNlcg==\r\n")
            .read(b"334 UGFzc3dvcmQ6\r\n")
            .write(b"cGFzcw==\r\n")
            .read(b"235 ok\r\n")
            .build();
        let client = client(mock).await.ehlo("c").await.unwrap();
        client
            .authenticate(AuthType::Login, "user", "pass")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_auth_cram_md5() {
        let mock = greeted()
            .write(b"EHLO c\r\n")
            .read(b"250-mx\r\n250 AUTH CRAM-MD5\r\n")
            .write(b"AUTH CRAM-MD5\r\n")
            .read(b"334 PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+\r\n")
            .write(b"dGltIGI5MTNhNjAyYzdlZGE3YTQ5NWI0ZTZlNzMzNGQzODkw\r\n")
            .read(b"235 ok\r\n")
            .build();
        let client = client(mock).await.ehlo("c").await.unwrap();
        client
            .authenticate(AuthType::CramMd5, "tim", "tanstaaftanstaaf")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_auth_rejected_credentials() {
        let mock = greeted()
            .write(b"EHLO c\r\n")
            .read(b"250-mx\r\n250 AUTH PLAIN\r\n")
            .write(b"AUTH PLAIN AHUAcA==\r\n")
            .read(b"535 5.7.8 bad credentials\r\n")
            .build();
        let client = client(mock).await.ehlo("c").await.unwrap();
        let err = client
            .authenticate(AuthType::Plain, "u", "p")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authentication(ref m) if m.starts_with("535")));
    }

    #[tokio::test]
    async fn test_unoffered_mechanism_is_not_tried() {
        let mock = greeted()
            .write(b"EHLO c\r\n")
            .read(b"250-mx\r\n250 AUTH PLAIN\r\n")
            .build();
        let client = client(mock).await.ehlo("c").await.unwrap();
        let err = client
            .authenticate(AuthType::CramMd5, "u", "p")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[tokio::test]
    async fn test_transaction_with_rejected_recipient() {
        let mock = greeted()
            .write(b"EHLO c\r\n")
            .read(b"250-mx\r\n250 SIZE\r\n")
            .write(b"MAIL FROM:<a@example.com> SIZE=42\r\n")
            .read(b"250 ok\r\n")
            .write(b"RCPT TO:<b@example.com>\r\n")
            .read(b"250 ok\r\n")
            .write(b"RCPT TO:<nobody@example.com>\r\n")
            .read(b"550 5.1.1 no such user\r\n")
            .build();
        let client = client(mock).await.ehlo("c").await.unwrap();
        let options = MailOptions {
            size: Some(42),
            eight_bit: true,
        };
        let transaction = client
            .mail_from(addr("a@example.com"), options)
            .await
            .unwrap();
        let added = transaction.rcpt_to(addr("b@example.com")).await.unwrap();
        let err = added
            .rcpt_to(addr("nobody@example.com"))
            .await
            .unwrap_err();
        match err {
            Error::RecipientRejected {
                recipient, code, ..
            } => {
                assert_eq!(recipient, "nobody@example.com");
                assert_eq!(code, 550);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_data_is_stuffed_and_terminated() {
        let mock = greeted()
            .write(b"EHLO c\r\n")
            .read(b"250 mx\r\n")
            .write(b"MAIL FROM:<a@example.com>\r\n")
            .read(b"250 ok\r\n")
            .write(b"RCPT TO:<b@example.com>\r\n")
            .read(b"250 ok\r\n")
            .write(b"DATA\r\n")
            .read(b"354 go ahead\r\n")
            .write(b"Subject: x\r\n\r\n..leading\r\nend\r\n.\r\n")
            .read(b"250 queued\r\n")
            .write(b"QUIT\r\n")
            .read(b"221 bye\r\n")
            .build();
        let client = client(mock).await.ehlo("c").await.unwrap();
        let client = client
            .mail_from(addr("a@example.com"), MailOptions::default())
            .await
            .unwrap()
            .rcpt_to(addr("b@example.com"))
            .await
            .unwrap()
            .data()
            .await
            .unwrap()
            .send_message(b"Subject: x\n\n.leading\nend")
            .await
            .unwrap();
        client.quit().await.unwrap();
    }
}
