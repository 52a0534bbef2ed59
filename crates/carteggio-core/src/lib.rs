//! # carteggio-core
//!
//! The application-facing side of the carteggio mail engine.
//!
//! This crate provides:
//! - **Accounts**: serializable configuration with `scheme://` server URIs
//! - **Message stores**: [`MessageStore`] and [`Folder`], implemented over
//!   IMAP by [`ImapMessageStore`]
//! - **Push**: IDLE workers per folder reporting to a [`FolderListener`],
//!   with backoff, polling on demand and a [`WakeLock`] hook
//! - **Transport**: [`MessageTransport`], implemented over SMTP
//! - **Factories** choosing the implementation by URI scheme
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use carteggio_core::{
//!     Account, Factory, Folder, FolderListener, ImapFolder, MessageStore, StoreFactory,
//! };
//!
//! struct Wake;
//!
//! impl FolderListener<ImapFolder> for Wake {
//!     fn on_folder_changed(&self, folder: &ImapFolder) {
//!         println!("{} changed", folder.name());
//!     }
//!     fn on_listening_not_supported(&self) {}
//!     fn on_listening_started(&self, _folder: &ImapFolder) {}
//! }
//!
//! # async fn run() -> carteggio_core::Result<()> {
//! let mut account = Account::new("me@example.com");
//! account.incoming_uri = "imap+ssl+://PLAIN:me%40example.com:secret@imap.example.com".into();
//!
//! let store = Factory::new().create_store(&account)?;
//! let inbox = store.inbox();
//! inbox.open().await?;
//! let mut sync_point = store.parse_sync_point("1")?;
//! let messages = inbox.messages_after(&mut sync_point).await?;
//! println!("{} new, resume from {}", messages.len(), sync_point.save());
//!
//! store.add_message_listener(&inbox, Arc::new(Wake));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod account;
mod error;
pub mod factory;
pub mod push;
pub mod store;
#[cfg(test)]
mod testing;
pub mod transport;

pub use account::{Account, Protocol, Scheme, ServerUri, ValidationError, validate_account};
pub use error::{Error, Result};
pub use factory::{Factory, StoreFactory, TransportFactory};
pub use push::{NoopWakeLock, PushConfig, PushManager, WakeGuard, WakeLock};
pub use store::{Folder, FolderListener, ImapFolder, ImapMessageStore, MessageStore, SyncPoint};
pub use transport::{MessageTransport, SmtpTransport};
