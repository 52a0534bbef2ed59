//! Error types for SMTP operations.

use std::io;
use std::time::Duration;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// No reply within the read timeout.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Server rejected a command.
    #[error("SMTP error {code}: {message}")]
    Rejected {
        /// Reply code (e.g., 550).
        code: u16,
        /// Error message from server.
        message: String,
    },

    /// Server refused one recipient; the message was not sent to anyone.
    #[error("Recipient {recipient} rejected ({code}): {message}")]
    RecipientRejected {
        /// The refused address.
        recipient: String,
        /// Reply code.
        code: u16,
        /// Error message from server.
        message: String,
    },

    /// AUTH failed or the configured mechanism is not offered.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Malformed or unexpected reply.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Message is larger than the server's advertised SIZE.
    #[error("Message of {size} bytes exceeds server limit of {limit} bytes")]
    MessageTooLarge {
        /// Message size in bytes.
        size: usize,
        /// Limit from the EHLO SIZE keyword.
        limit: usize,
    },

    /// Feature not supported by server.
    #[error("Server does not support {0}")]
    NotSupported(String),

    /// The settings cannot be used as given.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Creates a rejection from a reply code and message.
    #[must_use]
    pub fn rejected(code: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            code,
            message: message.into(),
        }
    }

    /// Returns true if retrying the same message cannot succeed.
    ///
    /// 5xx replies and local failures are permanent; 4xx replies, transport
    /// failures and timeouts are not.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        match self {
            Self::Io(_) | Self::Tls(_) | Self::Timeout(_) => false,
            Self::Rejected { code, .. } | Self::RecipientRejected { code, .. } => {
                *code >= 500 && *code < 600
            }
            Self::Authentication(_)
            | Self::Protocol(_)
            | Self::InvalidAddress(_)
            | Self::MessageTooLarge { .. }
            | Self::NotSupported(_)
            | Self::Config(_) => true,
        }
    }

    /// Returns true if this is a transient rejection (4xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Rejected { code, .. } | Self::RecipientRejected { code, .. }
                if *code >= 400 && *code < 500
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_permanence_follows_reply_class() {
        assert!(Error::rejected(554, "no").is_permanent());
        assert!(!Error::rejected(451, "later").is_permanent());
        assert!(Error::rejected(451, "later").is_transient());

        let recipient = Error::RecipientRejected {
            recipient: "x@example.com".into(),
            code: 550,
            message: "no such user".into(),
        };
        assert!(recipient.is_permanent());
        assert!(!recipient.is_transient());

        assert!(!Error::Timeout(Duration::from_secs(5)).is_permanent());
        assert!(!Error::Io(io::Error::other("reset")).is_permanent());
        assert!(Error::Authentication("535".into()).is_permanent());
    }
}
