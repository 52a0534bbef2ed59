//! # carteggio-imap
//!
//! IMAP4rev1 synchronization engine: a streaming response parser, a
//! pooled connection store, folder sessions and IDLE push.
//!
//! ## Features
//!
//! - **Streaming parser**: one response per call; literals are handed to a
//!   callback as they arrive so message bodies are never buffered twice
//! - **Pooled store**: connections are reused LIFO after a NOOP check, and
//!   one [`Folder`] exists per folder name
//! - **Incremental sync**: [`SyncPoint`] watermarks make "messages since
//!   last time" a single `UID SEARCH`
//! - **Lazy MIME trees**: BODYSTRUCTURE becomes a deferred entity tree;
//!   parts are fetched one by one
//! - **IDLE**: exactly one DONE per IDLE, however many tasks ask to stop
//! - **TLS via rustls**, STARTTLS, COMPRESS=DEFLATE, SASL PLAIN and CRAM-MD5
//!
//! ## Quick Start
//!
//! ```no_run
//! use carteggio_imap::{FetchItem, OpenMode, ServerSettings, Store, SyncPoint};
//!
//! # async fn run() -> carteggio_imap::Result<()> {
//! let settings = ServerSettings::builder("imap.example.com")
//!     .credentials("user@example.com", "password")
//!     .build();
//! let store = Store::new(settings);
//!
//! let inbox = store.folder("INBOX");
//! inbox.open(OpenMode::ReadWrite).await?;
//!
//! let mut sync_point = SyncPoint::unknown();
//! inbox.messages_after(&mut sync_point).await?; // establishes the watermark
//! let mut messages = inbox.messages_after(&mut sync_point).await?;
//! inbox
//!     .fetch(&mut messages, &[FetchItem::Envelope, FetchItem::Structure])
//!     .await?;
//! for message in &messages {
//!     println!("{} {:?}", message.uid(), message.entity().subject());
//! }
//!
//! store.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`command`]: command serialization, tags and modified UTF-7
//! - [`connection`]: sockets, TLS, handshake and authentication
//! - [`folder`]: folder sessions, fetch, search, copy and IDLE
//! - [`parser`]: streaming response parser
//! - [`types`]: flags, UIDs, UID sets, sync points and response codes

#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod folder;
pub mod handler;
pub mod parser;
mod store;
pub mod types;

#[cfg(test)]
mod testing;

pub use command::{Command, FetchAttribute, SearchCriteria, StatusAttribute, StoreAction};
pub use connection::{
    AuthType, Connector, ImapConnection, MemoryTrustStore, Namespace, Security, ServerSettings,
    ServerSettingsBuilder, TcpConnector, TrustStore,
};
pub use error::{Error, Result};
pub use folder::{
    FetchItem, Folder, FolderState, IdleOutcome, IdleSession, Message, OpenMode, STORE_DATA_HEADER,
};
pub use handler::UntaggedHandler;
pub use parser::{ImapList, ImapResponse, ImapValue, LiteralHandler};
pub use store::Store;
pub use types::{Flag, Flags, ListEntry, MailboxStatus, SyncPoint, Uid, UidSet, UidValidity};
