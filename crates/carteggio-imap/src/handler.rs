//! Untagged response handling.
//!
//! IMAP servers send untagged data at any point while a command runs: the
//! selected mailbox can grow (`EXISTS`), shrink (`EXPUNGE`) or have flags
//! changed by another client (`FETCH`). Commands run through
//! [`ImapConnection::execute_with`](crate::connection::ImapConnection::execute_with)
//! hand every untagged response to an [`UntaggedHandler`] as soon as it is
//! read, before the tagged completion arrives.
//!
//! # Example
//!
//! ```
//! use carteggio_imap::handler::UntaggedHandler;
//! use carteggio_imap::parser::ImapResponse;
//!
//! let mut seen = 0;
//! let mut counter = |_: &ImapResponse| seen += 1;
//! fn takes_handler(_: &mut impl UntaggedHandler) {}
//! takes_handler(&mut counter);
//! ```

use crate::parser::ImapResponse;

/// Receives untagged responses while a command is in flight.
pub trait UntaggedHandler: Send {
    /// Called once per untagged response, in wire order.
    fn on_untagged(&mut self, response: &ImapResponse);
}

impl<F> UntaggedHandler for F
where
    F: FnMut(&ImapResponse) + Send,
{
    fn on_untagged(&mut self, response: &ImapResponse) {
        self(response);
    }
}

/// Handler that drops untagged data.
pub fn ignore(_: &ImapResponse) {}
