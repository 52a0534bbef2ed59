//! Server replies.

use crate::error::Error;

/// One complete reply, with continuation lines collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Three-digit status.
    pub code: ReplyCode,
    /// Text after the code, one entry per line.
    pub message: Vec<String>,
}

impl Reply {
    /// Assembles a reply.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(code: ReplyCode, message: Vec<String>) -> Self {
        Self { code, message }
    }

    /// Whether the code is in the 2xx range.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code.class(), Some(ReplyClass::Completed))
    }

    /// Lines joined with `\n`.
    #[must_use]
    pub fn message_text(&self) -> String {
        self.message.join("\n")
    }

    /// The reply as an [`Error::Rejected`].
    #[must_use]
    pub fn to_error(&self) -> Error {
        Error::rejected(self.code.as_u16(), self.message_text())
    }

    /// Passes a 2xx reply through.
    ///
    /// # Errors
    ///
    /// [`Error::Rejected`] carrying the code and text of anything else.
    pub fn success(self) -> Result<Self, Error> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.to_error())
        }
    }
}

/// What the first digit of a reply code says about the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyClass {
    /// 2xx
    Completed,
    /// 3xx: the server waits for more input.
    Intermediate,
    /// 4xx: worth retrying later.
    Transient,
    /// 5xx
    Permanent,
}

/// A reply code as sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// Greeting.
    pub const SERVICE_READY: Self = Self(220);
    /// Answer to QUIT.
    pub const CLOSING: Self = Self(221);
    /// Authentication accepted.
    pub const AUTH_SUCCESS: Self = Self(235);
    /// Next SASL challenge follows.
    pub const AUTH_CONTINUE: Self = Self(334);
    /// Send the message, ending with `.`.
    pub const START_DATA: Self = Self(354);

    /// Wraps a raw code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// The raw code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// `None` for codes outside 200..=599, which no command may complete with.
    #[must_use]
    pub const fn class(self) -> Option<ReplyClass> {
        match self.0 / 100 {
            2 => Some(ReplyClass::Completed),
            3 => Some(ReplyClass::Intermediate),
            4 => Some(ReplyClass::Transient),
            5 => Some(ReplyClass::Permanent),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
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
    fn test_classes_follow_first_digit() {
        assert_eq!(ReplyCode::CLOSING.class(), Some(ReplyClass::Completed));
        assert_eq!(ReplyCode::AUTH_CONTINUE.class(), Some(ReplyClass::Intermediate));
        assert_eq!(ReplyCode::new(421).class(), Some(ReplyClass::Transient));
        assert_eq!(ReplyCode::new(554).class(), Some(ReplyClass::Permanent));
        assert_eq!(ReplyCode::new(199).class(), None);
        assert_eq!(ReplyCode::new(535).to_string(), "535");
    }

    #[test]
    fn test_success_rejects_everything_but_2xx() {
        let ok = Reply::new(ReplyCode::new(250), vec!["OK".to_string()]);
        assert!(ok.success().is_ok());

        let busy = Reply::new(
            ReplyCode::new(450),
            vec!["Mailbox busy".to_string(), "try later".to_string()],
        );
        match busy.success() {
            Err(Error::Rejected { code, message }) => {
                assert_eq!(code, 450);
                assert_eq!(message, "Mailbox busy\ntry later");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
