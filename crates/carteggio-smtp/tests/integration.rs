//! End-to-end submissions against an in-process SMTP server.

#![allow(clippy::unwrap_used, clippy::redundant_clone, clippy::similar_names)]

use std::sync::{Arc, Mutex};

use carteggio_smtp::{
    Address, AuthType, Connector, Envelope, Error, Result, Security, SmtpSettings, SmtpStream,
    Transport,
};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};

/// What the fake server saw.
#[derive(Debug, Default)]
struct Transcript {
    commands: Vec<String>,
    data: Vec<u8>,
}

/// Serves one session per `connect` on an in-memory pipe.
#[derive(Clone)]
struct FakeServer {
    ehlo: &'static str,
    rcpt_reply: fn(&str) -> &'static str,
    transcript: Arc<Mutex<Transcript>>,
}

impl FakeServer {
    fn new(ehlo: &'static str) -> Self {
        Self {
            ehlo,
            rcpt_reply: |_| "250 ok\r\n",
            transcript: Arc::default(),
        }
    }

    async fn serve(self, stream: DuplexStream) {
        let mut stream = BufReader::new(stream);
        stream.write_all(b"220 fake ESMTP\r\n").await.unwrap();
        loop {
            let mut line = String::new();
            if stream.read_line(&mut line).await.unwrap() == 0 {
                return;
            }
            let line = line.trim_end().to_string();
            self.transcript.lock().unwrap().commands.push(line.clone());
            let reply = match line.split(' ').next().unwrap_or_default() {
                "EHLO" => self.ehlo.to_string(),
                "AUTH" => "334 VXNlcm5hbWU6\r\n".to_string(),
                "dXNlcg==" => "334 UGFzc3dvcmQ6\r\n".to_string(),
                "c2VjcmV0" => "235 ok\r\n".to_string(),
                "RCPT" => (self.rcpt_reply)(&line).to_string(),
                "DATA" => {
                    stream.write_all(b"354 go\r\n").await.unwrap();
                    let data = read_data(&mut stream).await;
                    self.transcript.lock().unwrap().data = data;
                    "250 queued\r\n".to_string()
                }
                "QUIT" => {
                    stream.write_all(b"221 bye\r\n").await.unwrap();
                    return;
                }
                _ => "250 ok\r\n".to_string(),
            };
            stream.write_all(reply.as_bytes()).await.unwrap();
        }
    }

    fn commands(&self) -> Vec<String> {
        self.transcript.lock().unwrap().commands.clone()
    }
}

async fn read_data(stream: &mut BufReader<DuplexStream>) -> Vec<u8> {
    let mut data = Vec::new();
    let mut byte = [0u8; 1];
    while !data.ends_with(b"\r\n.\r\n") && data != b".\r\n" {
        stream.read_exact(&mut byte).await.unwrap();
        data.push(byte[0]);
    }
    data
}

impl Connector for FakeServer {
    async fn connect(&self, _settings: &SmtpSettings) -> Result<SmtpStream> {
        let (client, server) = tokio::io::duplex(4096);
        tokio::spawn(self.clone().serve(server));
        Ok(SmtpStream::plain(client))
    }

    async fn start_tls(&self, _stream: SmtpStream, _host: &str) -> Result<SmtpStream> {
        Err(Error::NotSupported("TLS in tests".into()))
    }
}

fn settings(auth_type: AuthType) -> SmtpSettings {
    SmtpSettings::builder("smtp.example.com")
        .security(Security::None)
        .auth_type(auth_type)
        .credentials("user", "secret")
        .ehlo_hostname("client.test")
        .build()
}

fn envelope(recipients: &[&str]) -> Envelope {
    Envelope {
        from: Address::new("me@example.com").unwrap(),
        recipients: recipients
            .iter()
            .map(|r| Address::new(*r).unwrap())
            .collect(),
    }
}

#[tokio::test]
async fn test_login_and_eight_bit_submission() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("carteggio_smtp=trace")
        .with_test_writer()
        .try_init();

    let server = FakeServer::new("250-fake\r\n250-8BITMIME\r\n250-SIZE 10000\r\n250 AUTH LOGIN\r\n");
    let transport = Transport::with_connector(settings(AuthType::Login), server.clone());
    let message = "Subject: caf\u{e9}\n\n.dot\nfin\n".as_bytes();

    transport
        .send(&envelope(&["you@example.org"]), message)
        .await
        .unwrap();

    let commands = server.commands();
    assert_eq!(commands[0], "EHLO client.test");
    assert_eq!(commands[1], "AUTH LOGIN");
    assert_eq!(
        commands[4],
        format!("MAIL FROM:<me@example.com> BODY=8BITMIME SIZE={}", message.len())
    );
    assert_eq!(commands[5], "RCPT TO:<you@example.org>");
    assert_eq!(commands.last().map(String::as_str), Some("QUIT"));

    let data = server.transcript.lock().unwrap().data.clone();
    assert_eq!(
        data,
        "Subject: caf\u{e9}\r\n\r\n..dot\r\nfin\r\n.\r\n".as_bytes()
    );
}

#[tokio::test]
async fn test_rejected_recipient_aborts_submission() {
    let mut server = FakeServer::new("250 fake\r\n");
    server.rcpt_reply = |line| {
        if line.contains("ghost") {
            "550 5.1.1 unknown user\r\n"
        } else {
            "250 ok\r\n"
        }
    };
    let transport = Transport::with_connector(settings(AuthType::None), server.clone());

    let err = transport
        .send(&envelope(&["you@example.org", "ghost@example.org"]), b"hi")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::RecipientRejected { ref recipient, code: 550, .. } if recipient == "ghost@example.org"));
    assert!(err.is_permanent());
    assert!(!server.commands().iter().any(|c| c == "DATA"));
}

#[tokio::test]
async fn test_starttls_required_but_not_offered() {
    let server = FakeServer::new("250 fake\r\n");
    let settings = SmtpSettings::builder("smtp.example.com")
        .security(Security::StartTls)
        .build();
    let transport = Transport::with_connector(settings, server);

    let err = transport
        .send(&envelope(&["you@example.org"]), b"hi")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotSupported(ref what) if what == "STARTTLS"));
}
