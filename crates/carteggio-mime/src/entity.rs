//! MIME entity tree.
//!
//! An [`Entity`] is a header block plus a [`Body`]. Bodies of leaf parts
//! may be [`Body::Deferred`]: the structure is known (for example from an
//! IMAP `BODYSTRUCTURE`) but the bytes have not been fetched yet.

use crate::content_type::{ContentDisposition, ContentType};
use crate::encoding::{decode_base64_lenient, decode_quoted_printable_bytes};
use crate::error::{Error, Result};
use crate::header::Headers;
use std::fmt;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    #[default]
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit,
        }
    }

    /// Reverses the encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not valid for the encoding.
    pub fn decode(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Base64 => decode_base64_lenient(data),
            Self::QuotedPrintable => decode_quoted_printable_bytes(data),
            Self::SevenBit | Self::EightBit | Self::Binary => Ok(data.to_vec()),
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SevenBit => "7bit",
            Self::EightBit => "8bit",
            Self::Base64 => "base64",
            Self::QuotedPrintable => "quoted-printable",
            Self::Binary => "binary",
        })
    }
}

/// Children of a multipart entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Multipart {
    /// Multipart subtype (`mixed`, `alternative`, ...).
    pub sub_type: String,
    /// Delimiter used when serializing.
    pub boundary: String,
    /// Child entities in order.
    pub parts: Vec<Entity>,
}

/// Body of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Body {
    /// Structure known, bytes not fetched.
    #[default]
    Deferred,
    /// Raw content in its transfer encoding.
    Data(Vec<u8>),
    /// Child entities.
    Multipart(Multipart),
}

/// A MIME entity: headers plus body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Entity {
    /// Header fields.
    pub headers: Headers,
    /// Content.
    pub body: Body,
}

impl Entity {
    /// Creates an entity from headers and a body.
    #[must_use]
    pub const fn new(headers: Headers, body: Body) -> Self {
        Self { headers, body }
    }

    /// Creates a leaf entity with raw (already transfer-encoded) data.
    #[must_use]
    pub const fn leaf(headers: Headers, data: Vec<u8>) -> Self {
        Self::new(headers, Body::Data(data))
    }

    /// Creates a multipart entity and sets its Content-Type header.
    #[must_use]
    pub fn multipart(mut headers: Headers, sub_type: &str, boundary: &str, parts: Vec<Self>) -> Self {
        headers.set(
            "Content-Type",
            ContentType::multipart(sub_type, boundary).to_string(),
        );
        Self::new(
            headers,
            Body::Multipart(Multipart {
                sub_type: sub_type.to_ascii_lowercase(),
                boundary: boundary.to_string(),
                parts,
            }),
        )
    }

    /// First value of a header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Parsed Content-Type, defaulting to `text/plain` when absent or invalid.
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.headers
            .get("Content-Type")
            .and_then(|value| ContentType::parse(value).ok())
            .unwrap_or_else(|| ContentType::new("text", "plain"))
    }

    /// `type/subtype` of this entity.
    #[must_use]
    pub fn mime_type(&self) -> String {
        self.content_type().mime_type()
    }

    /// Parsed Content-Disposition, if present and valid.
    #[must_use]
    pub fn disposition(&self) -> Option<ContentDisposition> {
        self.headers
            .get("Content-Disposition")
            .and_then(|value| ContentDisposition::parse(value).ok())
    }

    /// Declared Content-Transfer-Encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("Content-Transfer-Encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// The Message-ID header.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.headers.get("Message-ID")
    }

    /// The Subject header.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.headers.get("Subject")
    }

    /// Child parts, empty for leaves.
    #[must_use]
    pub fn parts(&self) -> &[Self] {
        match &self.body {
            Body::Multipart(multipart) => &multipart.parts,
            _ => &[],
        }
    }

    /// Returns true once leaf data is available.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        !matches!(self.body, Body::Deferred)
    }

    /// Decoded leaf content.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BodyNotLoaded`] for deferred bodies, or a decoding
    /// error if the data does not match its transfer encoding.
    pub fn decoded_body(&self) -> Result<Vec<u8>> {
        match &self.body {
            Body::Data(data) => self.transfer_encoding().decode(data),
            Body::Deferred => Err(Error::BodyNotLoaded(self.mime_type())),
            Body::Multipart(_) => Err(Error::InvalidContentType(format!(
                "{} has no leaf body",
                self.mime_type()
            ))),
        }
    }

    /// Decoded leaf content as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Same as [`Entity::decoded_body`], plus UTF-8 failures.
    pub fn body_text(&self) -> Result<String> {
        String::from_utf8(self.decoded_body()?).map_err(Into::into)
    }

    /// All leaf entities in depth-first order.
    #[must_use]
    pub fn leaves(&self) -> Vec<&Self> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(entity) = stack.pop() {
            match &entity.body {
                Body::Multipart(multipart) => stack.extend(multipart.parts.iter().rev()),
                _ => out.push(entity),
            }
        }
        out
    }

    /// Finds the first entity (depth-first) whose header `name` equals `value`.
    pub fn find_by_header_mut(&mut self, name: &str, value: &str) -> Option<&mut Self> {
        if self.headers.get(name) == Some(value) {
            return Some(self);
        }
        match &mut self.body {
            Body::Multipart(multipart) => multipart
                .parts
                .iter_mut()
                .find_map(|part| part.find_by_header_mut(name, value)),
            _ => None,
        }
    }

    /// Serializes the entity.
    ///
    /// Deferred bodies serialize as empty. Line endings inside leaf data are
    /// written untouched; run the output through
    /// [`CrlfFilter`](crate::CrlfFilter) before handing it to a transport.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        self.headers.write_to(out);
        out.extend_from_slice(b"\r\n");
        match &self.body {
            Body::Deferred => {}
            Body::Data(data) => out.extend_from_slice(data),
            Body::Multipart(multipart) => {
                for part in &multipart.parts {
                    out.extend_from_slice(b"\r\n--");
                    out.extend_from_slice(multipart.boundary.as_bytes());
                    out.extend_from_slice(b"\r\n");
                    part.write_to(out);
                }
                out.extend_from_slice(b"\r\n--");
                out.extend_from_slice(multipart.boundary.as_bytes());
                out.extend_from_slice(b"--\r\n");
            }
        }
    }

    /// Serializes the entity into a new buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out);
        out
    }

    /// Parses a complete RFC 5322 message or MIME part.
    ///
    /// Multipart bodies are split recursively on their boundary; anything
    /// else keeps its raw bytes as [`Body::Data`].
    ///
    /// # Errors
    ///
    /// Returns an error if the header block is malformed or a multipart
    /// entity lacks a boundary parameter.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let (header_bytes, body) = split_header_block(raw);
        let headers = Headers::parse(&String::from_utf8_lossy(header_bytes))?;
        let mut entity = Self::new(headers, Body::Deferred);

        let content_type = entity.content_type();
        if content_type.is_multipart() {
            let boundary = content_type
                .boundary()
                .ok_or(Error::MissingBoundary)?
                .to_string();
            let parts = split_multipart(body, &boundary)
                .into_iter()
                .map(Self::parse)
                .collect::<Result<Vec<_>>>()?;
            entity.body = Body::Multipart(Multipart {
                sub_type: content_type.sub_type,
                boundary,
                parts,
            });
        } else {
            entity.body = Body::Data(body.to_vec());
        }

        Ok(entity)
    }
}

/// Splits at the first empty line, accepting CRLF or bare LF.
fn split_header_block(raw: &[u8]) -> (&[u8], &[u8]) {
    if raw.starts_with(b"\r\n") {
        return (&[], &raw[2..]);
    }
    if raw.starts_with(b"\n") {
        return (&[], &raw[1..]);
    }
    let mut index = 0;
    while index < raw.len() {
        if raw[index] == b'\n' {
            let rest = &raw[index + 1..];
            if rest.starts_with(b"\r\n") {
                return (&raw[..=index], &rest[2..]);
            }
            if rest.starts_with(b"\n") {
                return (&raw[..=index], &rest[1..]);
            }
        }
        index += 1;
    }
    (raw, &[])
}

/// Returns the raw bytes of each part between `--boundary` delimiter lines.
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();
    let mut start: Option<usize> = None;
    let mut offset = 0;

    while offset < body.len() {
        let end = body[offset..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(body.len(), |p| offset + p + 1);
        let line = trim_line_end(&body[offset..end]);

        if let Some(rest) = line.strip_prefix(delimiter.as_bytes()) {
            let closing = rest.starts_with(b"--");
            if rest.iter().all(u8::is_ascii_whitespace) || closing {
                if let Some(part_start) = start {
                    // The line break before a delimiter belongs to the delimiter.
                    parts.push(trim_line_end(&body[part_start..offset]));
                }
                if closing {
                    return parts;
                }
                start = Some(end);
            }
        }
        offset = end;
    }

    if let Some(part_start) = start {
        parts.push(&body[part_start..]);
    }
    parts
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
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
    use super::*;

    const MULTIPART: &[u8] = b"From: a@example.com\r\n\
Content-Type: multipart/mixed; boundary=\"xyz\"\r\n\
\r\n\
preamble\r\n\
--xyz\r\n\
Content-Type: text/plain\r\n\
\r\n\
Hello\r\n\
--xyz\r\n\
Content-Type: application/octet-stream\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
AAEC\r\n\
--xyz--\r\n";

    #[test]
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse("BASE64"), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse("quoted-printable"),
            TransferEncoding::QuotedPrintable
        );
    }

    #[test]
    fn test_parse_single_part() {
        let entity = Entity::parse(b"Subject: Hi\r\n\r\nbody text").unwrap();
        assert_eq!(entity.subject(), Some("Hi"));
        assert_eq!(entity.body_text().unwrap(), "body text");
        assert_eq!(entity.mime_type(), "text/plain");
    }

    #[test]
    fn test_parse_multipart() {
        let entity = Entity::parse(MULTIPART).unwrap();
        assert_eq!(entity.parts().len(), 2);
        assert_eq!(entity.parts()[0].body_text().unwrap(), "Hello");
        assert_eq!(entity.parts()[1].decoded_body().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_serialize_then_parse_keeps_structure() {
        let entity = Entity::parse(MULTIPART).unwrap();
        let reparsed = Entity::parse(&entity.to_bytes()).unwrap();
        assert_eq!(reparsed.parts(), entity.parts());
    }

    #[test]
    fn test_deferred_body() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "image/png");
        let entity = Entity::new(headers, Body::Deferred);
        assert!(!entity.is_loaded());
        assert!(matches!(
            entity.decoded_body(),
            Err(Error::BodyNotLoaded(ref t)) if t == "image/png"
        ));
    }

    #[test]
    fn test_find_by_header_and_leaves() {
        let mut first = Headers::new();
        first.add("X-Part", "1");
        let mut second = Headers::new();
        second.add("X-Part", "2");
        let mut root = Entity::multipart(
            Headers::new(),
            "mixed",
            "b",
            vec![Entity::leaf(first, b"a".to_vec()), Entity::leaf(second, Vec::new())],
        );

        assert_eq!(root.leaves().len(), 2);
        let found = root.find_by_header_mut("X-Part", "2").unwrap();
        found.body = Body::Data(b"filled".to_vec());
        assert_eq!(root.parts()[1].body_text().unwrap(), "filled");
    }

    #[test]
    fn test_missing_boundary() {
        let raw = b"Content-Type: multipart/mixed\r\n\r\n--x\r\n";
        assert!(matches!(Entity::parse(raw), Err(Error::MissingBoundary)));
    }
}
