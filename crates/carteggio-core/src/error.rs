//! Error types for the engine.

use thiserror::Error;

/// Any failure the engine reports to the application.
#[derive(Debug, Error)]
pub enum Error {
    /// IMAP operation failed.
    #[error("IMAP error: {0}")]
    Imap(#[from] carteggio_imap::Error),

    /// SMTP operation failed.
    #[error("SMTP error: {0}")]
    Smtp(#[from] carteggio_smtp::Error),

    /// A message could not be built or parsed.
    #[error("MIME error: {0}")]
    Mime(#[from] carteggio_mime::Error),

    /// No store or transport handles this URI scheme.
    #[error("Unsupported URI scheme: {0}")]
    UnsupportedScheme(String),

    /// A server URI could not be parsed.
    #[error("Invalid server URI: {0}")]
    InvalidUri(String),

    /// A saved sync point could not be parsed.
    #[error("Invalid sync point: {0:?}")]
    InvalidSyncPoint(String),
}

impl Error {
    /// Returns true if retrying cannot help without a change of input,
    /// settings or credentials.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        match self {
            Self::Imap(err) => err.is_permanent(),
            Self::Smtp(err) => err.is_permanent(),
            Self::Mime(_)
            | Self::UnsupportedScheme(_)
            | Self::InvalidUri(_)
            | Self::InvalidSyncPoint(_) => true,
        }
    }

    /// Returns true if the server refused the credentials.
    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        matches!(
            self,
            Self::Imap(carteggio_imap::Error::Authentication(_))
                | Self::Smtp(carteggio_smtp::Error::Authentication(_))
        )
    }

    /// Returns the DER chain of a rejected server certificate, so the user
    /// can be asked whether to trust it.
    #[must_use]
    pub fn certificate_chain(&self) -> Option<&[Vec<u8>]> {
        match self {
            Self::Imap(carteggio_imap::Error::Certificate { chain, .. }) => Some(chain),
            _ => None,
        }
    }
}

impl From<carteggio_imap::types::InvalidSyncPoint> for Error {
    fn from(err: carteggio_imap::types::InvalidSyncPoint) -> Self {
        Self::InvalidSyncPoint(err.0)
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_permanence_is_forwarded() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(!Error::from(carteggio_imap::Error::Io(io)).is_permanent());
        assert!(Error::from(carteggio_imap::Error::protocol("A1 NO nope")).is_permanent());
        assert!(!Error::from(carteggio_smtp::Error::rejected(451, "later")).is_permanent());
        assert!(Error::from(carteggio_smtp::Error::rejected(554, "no")).is_permanent());
        assert!(Error::UnsupportedScheme("pop3".into()).is_permanent());
    }

    #[test]
    fn test_authentication_is_distinguished() {
        let err = Error::from(carteggio_imap::Error::Authentication("bad".into()));
        assert!(err.is_authentication());
        assert!(err.certificate_chain().is_none());
    }
}
