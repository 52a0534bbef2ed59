//! Commands the engine sends, and their wire form.
//!
//! Mailbox names are given in UTF-8 and encoded on the way out.

mod serialize;
mod tag_generator;
mod types;
pub mod utf7;

use crate::types::{Flags, UidSet};

pub use tag_generator::TagGenerator;
pub use types::{FetchAttribute, SearchCriteria, StatusAttribute, StoreAction};

use serialize::{mailbox, parenthesized, quoted, store_item};

/// A tagged command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `CAPABILITY`
    Capability,
    /// `NOOP`, also used to probe a pooled connection.
    Noop,
    /// `LOGOUT`
    Logout,
    /// `STARTTLS`
    StartTls,
    /// Plaintext LOGIN; never logged verbatim.
    Login {
        /// Account name.
        username: String,
        /// Password, sent quoted.
        password: String,
    },
    /// SASL exchange; challenge responses follow as raw lines.
    Authenticate {
        /// SASL mechanism name, e.g. `CRAM-MD5`.
        mechanism: String,
    },
    /// RFC 4978. Both directions inflate after the tagged OK.
    CompressDeflate,
    /// `NAMESPACE`
    Namespace,
    /// `LIST reference pattern`
    List {
        /// Reference name, usually empty.
        reference: String,
        /// Mailbox pattern with `*` or `%` wildcards.
        pattern: String,
    },
    /// `LSUB reference pattern`, subscribed mailboxes only.
    Lsub {
        /// Reference name, usually empty.
        reference: String,
        /// Mailbox pattern with `*` or `%` wildcards.
        pattern: String,
    },
    /// `STATUS mailbox (items)`
    Status {
        /// Mailbox in UTF-8.
        mailbox: String,
        /// Counters to report.
        items: Vec<StatusAttribute>,
    },
    /// `SELECT mailbox`
    Select {
        /// Mailbox in UTF-8.
        mailbox: String,
    },
    /// SELECT without write access.
    Examine {
        /// Mailbox in UTF-8.
        mailbox: String,
    },
    /// `CREATE mailbox`
    Create {
        /// Mailbox in UTF-8.
        mailbox: String,
    },
    /// Announces a literal of `length` bytes; the message itself is written
    /// after the server's continuation.
    Append {
        /// Target mailbox in UTF-8.
        mailbox: String,
        /// Flags for the new message; omitted when empty.
        flags: Flags,
        /// Size of the message literal.
        length: u64,
    },
    /// `EXPUNGE`, every `\Deleted` message.
    Expunge,
    /// RFC 4315. Expunges only the given UIDs.
    UidExpunge {
        /// Messages to remove.
        uids: UidSet,
    },
    /// `UID SEARCH criteria`
    UidSearch {
        /// Keys that must all match.
        criteria: SearchCriteria,
    },
    /// `UID FETCH uids (items)`
    UidFetch {
        /// Messages to fetch.
        uids: UidSet,
        /// Data items per message.
        items: Vec<FetchAttribute>,
    },
    /// With `silent` the server skips the untagged FETCH echo.
    UidStore {
        /// Messages to change.
        uids: UidSet,
        /// Flags and how to apply them.
        action: StoreAction,
        /// Append `.SILENT`.
        silent: bool,
    },
    /// `UID COPY uids mailbox`
    UidCopy {
        /// Messages to copy.
        uids: UidSet,
        /// Destination in UTF-8.
        mailbox: String,
    },
    /// `IDLE`; ended by a raw `DONE` line.
    Idle,
}

impl Command {
    /// Everything after the tag, without the line ending.
    fn text(&self) -> String {
        match self {
            Self::Capability => "CAPABILITY".into(),
            Self::Noop => "NOOP".into(),
            Self::Logout => "LOGOUT".into(),
            Self::StartTls => "STARTTLS".into(),
            Self::Login { username, password } => {
                format!("LOGIN {} {}", quoted(username), quoted(password))
            }
            Self::Authenticate { mechanism } => format!("AUTHENTICATE {mechanism}"),
            Self::CompressDeflate => "COMPRESS DEFLATE".into(),
            Self::Namespace => "NAMESPACE".into(),
            Self::List { reference, pattern } => {
                format!("LIST {} {}", quoted(reference), quoted(pattern))
            }
            Self::Lsub { reference, pattern } => {
                format!("LSUB {} {}", quoted(reference), quoted(pattern))
            }
            Self::Status { mailbox: name, items } => {
                format!("STATUS {} {}", mailbox(name), parenthesized(items))
            }
            Self::Select { mailbox: name } => format!("SELECT {}", mailbox(name)),
            Self::Examine { mailbox: name } => format!("EXAMINE {}", mailbox(name)),
            Self::Create { mailbox: name } => format!("CREATE {}", mailbox(name)),
            Self::Append {
                mailbox: name,
                flags,
                length,
            } => {
                if flags.is_empty() {
                    format!("APPEND {} {{{length}}}", mailbox(name))
                } else {
                    format!("APPEND {} {} {{{length}}}", mailbox(name), flags.to_list())
                }
            }
            Self::Expunge => "EXPUNGE".into(),
            Self::UidExpunge { uids } => format!("UID EXPUNGE {uids}"),
            Self::UidSearch { criteria } => format!("UID SEARCH {criteria}"),
            Self::UidFetch { uids, items } => format!("UID FETCH {uids} {}", parenthesized(items)),
            Self::UidStore {
                uids,
                action,
                silent,
            } => format!("UID STORE {uids} {}", store_item(action, *silent)),
            Self::UidCopy { uids, mailbox: name } => {
                format!("UID COPY {uids} {}", mailbox(name))
            }
            Self::Idle => "IDLE".into(),
        }
    }

    /// The full line sent under `tag`, CRLF included.
    #[must_use]
    pub fn serialize(&self, tag: &str) -> Vec<u8> {
        format!("{tag} {}\r\n", self.text()).into_bytes()
    }

    /// Whether the wire form carries credentials.
    #[must_use]
    pub const fn is_sensitive(&self) -> bool {
        matches!(self, Self::Login { .. })
    }

    /// The line as it may appear in logs.
    #[must_use]
    pub fn log_line(&self, tag: &str) -> String {
        if self.is_sensitive() {
            format!("{tag} LOGIN [redacted]")
        } else {
            format!("{tag} {}", self.text())
        }
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
    use crate::types::{Flag, Uid};

    fn uids(values: &[u32]) -> UidSet {
        let uids: Vec<Uid> = values.iter().map(|v| Uid::new(*v).unwrap()).collect();
        UidSet::from_uids(&uids)
    }

    #[test]
    fn test_capability_command() {
        let cmd = Command::Capability;
        assert_eq!(cmd.serialize("A0001"), b"A0001 CAPABILITY\r\n");
    }

    #[test]
    fn test_login_escapes_quotes_and_backslashes() {
        let cmd = Command::Login {
            username: "user@example.com".to_string(),
            password: "pa\"ss\\word".to_string(),
        };
        assert_eq!(
            cmd.serialize("A0001"),
            b"A0001 LOGIN \"user@example.com\" \"pa\\\"ss\\\\word\"\r\n"
        );
        assert_eq!(cmd.log_line("A0001"), "A0001 LOGIN [redacted]");
    }

    #[test]
    fn test_select_encodes_and_quotes_mailbox() {
        let cmd = Command::Select {
            mailbox: "Posta inviata/Caffè".to_string(),
        };
        assert_eq!(
            cmd.serialize("A0002"),
            b"A0002 SELECT \"Posta inviata/Caff&AOg-\"\r\n"
        );
    }

    #[test]
    fn test_list_command() {
        let cmd = Command::List {
            reference: String::new(),
            pattern: "*".to_string(),
        };
        assert_eq!(cmd.serialize("A0001"), b"A0001 LIST \"\" \"*\"\r\n");
    }

    #[test]
    fn test_uid_fetch_command() {
        let cmd = Command::UidFetch {
            uids: uids(&[3, 4, 5, 9]),
            items: vec![
                FetchAttribute::Uid,
                FetchAttribute::Flags,
                FetchAttribute::Body {
                    section: String::new(),
                    peek: true,
                    partial: Some((0, 2048)),
                },
            ],
        };
        assert_eq!(
            cmd.serialize("A0007"),
            b"A0007 UID FETCH 3:5,9 (UID FLAGS BODY.PEEK[]<0.2048>)\r\n"
        );
    }

    #[test]
    fn test_uid_store_silent() {
        let cmd = Command::UidStore {
            uids: uids(&[12]),
            action: StoreAction::AddFlags([Flag::Deleted].into_iter().collect()),
            silent: true,
        };
        assert_eq!(
            cmd.serialize("A0003"),
            b"A0003 UID STORE 12 +FLAGS.SILENT (\\Deleted)\r\n"
        );
    }

    #[test]
    fn test_search_new_messages() {
        let cmd = Command::UidSearch {
            criteria: SearchCriteria::And(vec![
                SearchCriteria::UidsFrom(Uid::new(42).unwrap()),
                SearchCriteria::Not(Box::new(SearchCriteria::Deleted)),
            ]),
        };
        assert_eq!(cmd.serialize("A0004"), b"A0004 UID SEARCH UID 42:* NOT DELETED\r\n");
    }

    #[test]
    fn test_search_header() {
        let cmd = Command::UidSearch {
            criteria: SearchCriteria::Header("MESSAGE-ID".into(), "<a@b>".into()),
        };
        assert_eq!(
            cmd.serialize("A0005"),
            b"A0005 UID SEARCH HEADER MESSAGE-ID \"<a@b>\"\r\n"
        );
    }

    #[test]
    fn test_append_announces_literal() {
        let cmd = Command::Append {
            mailbox: "Sent".to_string(),
            flags: [Flag::Seen].into_iter().collect(),
            length: 310,
        };
        assert_eq!(
            cmd.serialize("A0006"),
            b"A0006 APPEND \"Sent\" (\\Seen) {310}\r\n"
        );
    }

    #[test]
    fn test_status_items() {
        let cmd = Command::Status {
            mailbox: "Archivio".into(),
            items: vec![StatusAttribute::Messages, StatusAttribute::UidNext],
        };
        assert_eq!(
            cmd.serialize("A0009"),
            b"A0009 STATUS \"Archivio\" (MESSAGES UIDNEXT)\r\n"
        );
        assert_eq!(cmd.log_line("A0009"), "A0009 STATUS \"Archivio\" (MESSAGES UIDNEXT)");
    }

    #[test]
    fn test_lsub_command() {
        let cmd = Command::Lsub {
            reference: String::new(),
            pattern: "INBOX.*".into(),
        };
        assert_eq!(cmd.serialize("A0001"), b"A0001 LSUB \"\" \"INBOX.*\"\r\n");
    }
}
