//! Construction of outgoing messages.

use crate::encoding::encode_quoted_printable;
use crate::entity::{Entity, TransferEncoding};
use crate::error::{Error, Result};
use crate::header::Headers;
use chrono::{DateTime, FixedOffset, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// Inputs for a plain-text message.
#[derive(Debug, Clone, Default)]
pub struct TextMessage {
    /// Sender address, optionally with display name.
    pub from: String,
    /// Recipient addresses.
    pub to: Vec<String>,
    /// Subject line (UTF-8, encoded as needed).
    pub subject: String,
    /// Body text.
    pub body: String,
    /// Date header; now when `None`.
    pub date: Option<DateTime<FixedOffset>>,
    /// Message-ID including angle brackets; generated when `None`.
    pub message_id: Option<String>,
    /// Additional header fields appended after the standard ones.
    pub extra_headers: Vec<(String, String)>,
}

/// Builds an immutable `text/plain` message entity.
///
/// The body is quoted-printable encoded with CRLF line breaks.
///
/// # Errors
///
/// Returns [`Error::MissingHeader`] when the sender or all recipients are
/// missing.
pub fn text_message(message: &TextMessage) -> Result<Entity> {
    if message.from.trim().is_empty() {
        return Err(Error::MissingHeader("From".to_string()));
    }
    if message.to.is_empty() {
        return Err(Error::MissingHeader("To".to_string()));
    }

    let date = message
        .date
        .unwrap_or_else(|| Utc::now().fixed_offset());
    let message_id = match &message.message_id {
        Some(id) => id.clone(),
        None => generate_message_id(domain_of(&message.from)),
    };

    let mut headers = Headers::new();
    headers.add("From", Headers::encode_value(&message.from)?);
    headers.add("To", message.to.join(", "));
    headers.add("Subject", Headers::encode_value(&message.subject)?);
    headers.add("Date", date.to_rfc2822());
    headers.add("Message-ID", message_id);
    headers.add("MIME-Version", "1.0");
    headers.add("Content-Type", "text/plain; charset=utf-8");
    headers.add(
        "Content-Transfer-Encoding",
        TransferEncoding::QuotedPrintable.to_string(),
    );
    for (name, value) in &message.extra_headers {
        headers.add(name.clone(), value.clone());
    }

    Ok(Entity::leaf(
        headers,
        encode_quoted_printable(&message.body).into_bytes(),
    ))
}

/// Generates a unique `<...@domain>` Message-ID.
#[must_use]
pub fn generate_message_id(domain: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let sequence = COUNTER.fetch_add(1, Ordering::Relaxed);
    let now = Utc::now();
    let nanos = now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp());
    format!(
        "<{nanos:x}.{sequence:x}.{pid:x}@{domain}>",
        pid = std::process::id()
    )
}

fn domain_of(address: &str) -> &str {
    address
        .rsplit_once('@')
        .map_or("localhost", |(_, domain)| domain.trim_end_matches('>'))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> TextMessage {
        TextMessage {
            from: "Ada <ada@example.org>".to_string(),
            to: vec!["bob@example.net".to_string()],
            subject: "Ciao".to_string(),
            body: "first line\nsecond line".to_string(),
            ..TextMessage::default()
        }
    }

    #[test]
    fn test_text_message_headers() {
        let entity = text_message(&sample()).unwrap();
        assert_eq!(entity.header("To"), Some("bob@example.net"));
        assert_eq!(entity.header("MIME-Version"), Some("1.0"));
        assert!(entity.message_id().unwrap().ends_with("@example.org>"));
        assert_eq!(entity.body_text().unwrap(), "first line\r\nsecond line");
    }

    #[test]
    fn test_text_message_encodes_subject() {
        let mut message = sample();
        message.subject = "Caffè".to_string();
        let entity = text_message(&message).unwrap();
        assert!(entity.subject().unwrap().starts_with("=?utf-8?B?"));
    }

    #[test]
    fn test_text_message_requires_recipient() {
        let mut message = sample();
        message.to.clear();
        assert!(matches!(text_message(&message), Err(Error::MissingHeader(_))));
    }

    #[test]
    fn test_message_ids_are_unique() {
        assert_ne!(generate_message_id("a.b"), generate_message_id("a.b"));
    }
}
