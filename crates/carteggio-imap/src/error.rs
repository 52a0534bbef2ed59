//! Error types for the IMAP engine.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during IMAP operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// The server certificate was rejected by every trust source.
    #[error("Certificate for {host} is not trusted")]
    Certificate {
        /// Host the connection was made to.
        host: String,
        /// DER-encoded chain as presented by the server, leaf first.
        chain: Vec<Vec<u8>>,
    },

    /// Malformed data on the wire.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Tagged NO/BAD/BYE, or an otherwise unexpected server response.
    #[error("Command failed: {response}")]
    Protocol {
        /// Raw response text.
        response: String,
        /// Text of an `[ALERT]` response code, if present.
        alert: Option<String>,
    },

    /// Login or AUTHENTICATE failed, or no usable mechanism was offered.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The settings cannot be used as given.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation requires an open folder.
    #[error("Folder {0} is not open")]
    NotOpen(String),

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// A literal callback failed; re-raised after the line was drained.
    #[error("Literal handler failed: {0}")]
    Callback(String),

    /// Body structure contains a part type the walker does not handle.
    #[error("Unsupported content: {0}")]
    UnsupportedContent(String),

    /// A part id that does not occur in the message's structure.
    #[error("Message has no part {0}")]
    UnknownPart(String),

    /// Another task is already idling on this folder.
    #[error("Folder {0} is already idling")]
    AlreadyIdling(String),

    /// The server does not advertise IDLE.
    #[error("Server does not support IDLE")]
    PushNotSupported,

    /// Building or decoding a MIME entity failed.
    #[error("MIME error: {0}")]
    Mime(#[from] carteggio_mime::Error),
}

impl Error {
    /// Builds a protocol failure from a raw response.
    #[must_use]
    pub fn protocol(response: impl Into<String>) -> Self {
        Self::Protocol {
            response: response.into(),
            alert: None,
        }
    }

    /// Returns true if retrying cannot help without a change of input.
    ///
    /// Transport failures and timeouts are retryable; server rejections,
    /// authentication, certificate and precondition failures are not.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        !matches!(self, Self::Io(_) | Self::Tls(_) | Self::Timeout(_))
    }

    /// Returns true if the connection that produced this error can no longer
    /// be trusted to be positioned at a response boundary.
    #[must_use]
    pub const fn poisons_connection(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Tls(_) | Self::Parse(_) | Self::Timeout(_)
        )
    }

    /// Returns true for a tagged NO/BAD rejection.
    #[must_use]
    pub const fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_permanence() {
        let io = Error::Io(std::io::Error::other("reset"));
        assert!(!io.is_permanent());
        assert!(io.poisons_connection());

        let no = Error::protocol("A1 NO [ALERT] go away");
        assert!(no.is_permanent());
        assert!(!no.poisons_connection());
        assert!(no.is_protocol());

        assert!(Error::Authentication("bad".into()).is_permanent());
        assert!(!Error::Timeout(Duration::from_secs(1)).is_permanent());
    }
}
