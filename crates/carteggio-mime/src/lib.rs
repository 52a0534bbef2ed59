//! # carteggio-mime
//!
//! MIME entity model shared by the IMAP and SMTP halves of carteggio.
//!
//! ## Features
//!
//! - **Entity tree**: headers plus a body that is raw data, child parts, or
//!   deferred until fetched
//! - **Serialization** and parsing of RFC 5322 / MIME messages
//! - **Encoding/Decoding**: Base64, Quoted-Printable, RFC 2047 header encoding
//! - **Line endings**: a chunk-safe CRLF normalizer for transports
//!
//! ## Quick Start
//!
//! ```
//! use carteggio_mime::{CrlfFilter, TextMessage, text_message};
//!
//! let entity = text_message(&TextMessage {
//!     from: "ada@example.org".into(),
//!     to: vec!["bob@example.net".into()],
//!     subject: "Hello".into(),
//!     body: "Hi Bob\n".into(),
//!     ..TextMessage::default()
//! })?;
//!
//! let wire = CrlfFilter::convert(&entity.to_bytes());
//! assert!(wire.starts_with(b"From: ada@example.org\r\n"));
//! # Ok::<(), carteggio_mime::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod builder;
mod content_type;
mod entity;
mod eol;
mod error;
mod header;

pub mod encoding;

pub use builder::{TextMessage, generate_message_id, text_message};
pub use content_type::{ContentDisposition, ContentType};
pub use entity::{Body, Entity, Multipart, TransferEncoding};
pub use eol::CrlfFilter;
pub use error::{Error, Result};
pub use header::Headers;
