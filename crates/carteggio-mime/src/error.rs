//! Errors raised while parsing, building or decoding entities.

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Why an entity could not be read or produced.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A header line without a `name:` part, or a structured value that
    /// does not parse.
    #[error("malformed header: {0}")]
    InvalidHeader(String),

    /// A `Content-Type` value without a `type/subtype`.
    #[error("malformed content type: {0}")]
    InvalidContentType(String),

    /// Transfer-encoded or encoded-word data that does not decode.
    #[error("bad encoding: {0}")]
    InvalidEncoding(String),

    /// Base64 payload that does not decode.
    #[error(transparent)]
    Base64Decode(#[from] base64::DecodeError),

    /// Decoded text that claims UTF-8 but is not.
    #[error("decoded text is not UTF-8: {0}")]
    Utf8Decode(#[from] std::string::FromUtf8Error),

    /// A multipart `Content-Type` with no `boundary` parameter.
    #[error("multipart entity has no boundary")]
    MissingBoundary,

    /// The named header is required here but absent.
    #[error("missing {0} header")]
    MissingHeader(String),

    /// The entity at this part id still only carries its structure.
    #[error("body of part {0} not fetched")]
    BodyNotLoaded(String),

    /// Writing the serialized entity failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying with the same input is pointless. Only writer I/O
    /// failures are transient.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        !matches!(self, Self::Io(_))
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
    use super::*;

    #[test]
    fn test_only_io_is_transient() {
        assert!(Error::MissingHeader("From".into()).is_permanent());
        assert!(!Error::Io(std::io::Error::other("closed")).is_permanent());
        assert_eq!(Error::MissingHeader("From".into()).to_string(), "missing From header");
    }
}
