//! # carteggio-smtp
//!
//! SMTP submission of already-serialized messages (RFC 5321).
//!
//! ## Features
//!
//! - **Type-state client**: the compiler rejects `DATA` before `RCPT TO`
//!   and every other out-of-order command
//! - **TLS via rustls**: implicit TLS (port 465) and STARTTLS (port 587)
//! - **Authentication**: PLAIN, LOGIN and CRAM-MD5
//! - **Extensions**: SIZE is enforced before the transaction starts,
//!   8BITMIME is declared for non-ASCII bodies
//! - **Streaming DATA**: line endings are normalized and dots stuffed chunk
//!   by chunk
//!
//! ## Quick Start
//!
//! ```no_run
//! use carteggio_smtp::{Address, AuthType, Envelope, SmtpSettings, Transport};
//!
//! # async fn run() -> carteggio_smtp::Result<()> {
//! let settings = SmtpSettings::builder("smtp.example.com")
//!     .auth_type(AuthType::Plain)
//!     .credentials("user@example.com", "password")
//!     .build();
//! let transport = Transport::new(settings);
//!
//! let envelope = Envelope {
//!     from: Address::new("user@example.com")?,
//!     recipients: vec![Address::new("friend@example.org")?],
//! };
//! transport
//!     .send(&envelope, b"Subject: Hi\r\n\r\nHello!\r\n")
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Connection States
//!
//! ```text
//! Connected ── authenticate() ──→ Authenticated
//!     │                                │
//!     └──────── mail_from() ───────────┴──→ MailTransaction
//!                                               │ rcpt_to()
//!                                               ▼
//!               Connected ←── send_message() ── Data ←── data() ── RecipientAdded
//! ```
//!
//! ## Modules
//!
//! - [`command`]: SMTP command serialization
//! - [`connection`]: streams, TLS and the type-state client
//! - [`data`]: DATA transparency encoding
//! - [`parser`]: reply parsing
//! - [`types`]: addresses, extensions and replies

#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
pub mod data;
mod error;
pub mod parser;
mod settings;
mod transport;
pub mod types;

pub use connection::{
    AsyncStream, Authenticated, Client, Connected, Connector, Data, MailOptions, MailTransaction,
    RecipientAdded, ServerInfo, SmtpConnection, SmtpStream, TcpConnector,
};
pub use data::DataEncoder;
pub use error::{Error, Result};
pub use settings::{AuthType, Security, SmtpSettings, SmtpSettingsBuilder};
pub use transport::{Envelope, Transport};
pub use types::{Address, AuthMechanism, Extension, Reply, ReplyClass, ReplyCode};
