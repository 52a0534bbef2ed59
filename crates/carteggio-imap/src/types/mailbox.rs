//! LIST and STATUS data.

use super::{Uid, UidValidity};
use crate::command::utf7;
use crate::parser::ImapResponse;

/// Mailbox attributes from a LIST response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MailboxAttribute {
    /// Mailbox cannot be selected.
    NoSelect,
    /// Mailbox does not exist (RFC 5258).
    NonExistent,
    /// Mailbox has no children.
    HasNoChildren,
    /// Mailbox has children.
    HasChildren,
    /// Mailbox is the drafts folder.
    Drafts,
    /// Mailbox is the junk/spam folder.
    Junk,
    /// Mailbox is the sent folder.
    Sent,
    /// Mailbox is the trash folder.
    Trash,
    /// Mailbox is the archive folder.
    Archive,
    /// Unknown attribute.
    Unknown(String),
}

impl MailboxAttribute {
    /// Parses a mailbox attribute string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "\\NOSELECT" => Self::NoSelect,
            "\\NONEXISTENT" => Self::NonExistent,
            "\\HASNOCHILDREN" => Self::HasNoChildren,
            "\\HASCHILDREN" => Self::HasChildren,
            "\\DRAFTS" => Self::Drafts,
            "\\JUNK" | "\\SPAM" => Self::Junk,
            "\\SENT" => Self::Sent,
            "\\TRASH" => Self::Trash,
            "\\ARCHIVE" => Self::Archive,
            _ => Self::Unknown(s.to_string()),
        }
    }
}

/// One `* LIST` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Mailbox attributes.
    pub attributes: Vec<MailboxAttribute>,
    /// Hierarchy delimiter; `None` for a flat namespace.
    pub delimiter: Option<char>,
    /// Decoded mailbox name.
    pub name: String,
}

impl ListEntry {
    /// Parses `* LIST (attrs) delim name` or the LSUB equivalent. Returns
    /// `None` for other responses.
    #[must_use]
    pub fn from_response(response: &ImapResponse) -> Option<Self> {
        if !response.is_untagged() || !(response.atom_is(0, "LIST") || response.atom_is(0, "LSUB")) {
            return None;
        }
        let attributes = response
            .list(1)?
            .iter()
            .filter_map(|v| v.as_str())
            .map(MailboxAttribute::parse)
            .collect();
        let delimiter = response.string(2).and_then(|d| d.chars().next());
        let raw = response.string(3)?;
        Some(Self {
            attributes,
            delimiter,
            name: utf7::decode(&raw),
        })
    }

    /// Returns true if the mailbox can be opened.
    #[must_use]
    pub fn is_selectable(&self) -> bool {
        !self
            .attributes
            .iter()
            .any(|a| matches!(a, MailboxAttribute::NoSelect | MailboxAttribute::NonExistent))
    }
}

/// Counters from a STATUS response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStatus {
    /// Number of messages.
    pub messages: Option<u32>,
    /// Number of unseen messages.
    pub unseen: Option<u32>,
    /// Next UID to be assigned.
    pub uid_next: Option<Uid>,
    /// UIDVALIDITY value.
    pub uid_validity: Option<UidValidity>,
}

impl MailboxStatus {
    /// Parses `* STATUS name (key value ...)`.
    #[must_use]
    pub fn from_response(response: &ImapResponse) -> Option<Self> {
        if !response.is_untagged() || !response.atom_is(0, "STATUS") {
            return None;
        }
        let items = response.list(2)?;
        let number = |key| items.keyed_number(key).and_then(|n| u32::try_from(n).ok());
        Some(Self {
            messages: number("MESSAGES"),
            unseen: number("UNSEEN"),
            uid_next: number("UIDNEXT").and_then(Uid::new),
            uid_validity: number("UIDVALIDITY").and_then(UidValidity::new),
        })
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
    use crate::connection::PeekableReader;
    use crate::parser::read_plain;
    use tokio_test::io::Builder;

    async fn parse(line: &[u8]) -> ImapResponse {
        let mut reader = PeekableReader::new(Builder::new().read(line).build());
        read_plain(&mut reader).await.unwrap()
    }

    #[tokio::test]
    async fn test_list_entry_decodes_name() {
        let response = parse(b"* LIST (\\HasNoChildren \\Sent) \".\" \"Posta &AOk- inviata\"\r\n").await;
        let entry = ListEntry::from_response(&response).unwrap();
        assert_eq!(entry.name, "Posta é inviata");
        assert_eq!(entry.delimiter, Some('.'));
        assert!(entry.attributes.contains(&MailboxAttribute::Sent));
        assert!(entry.is_selectable());
    }

    #[tokio::test]
    async fn test_list_entry_nil_delimiter_and_noselect() {
        let response = parse(b"* LIST (\\Noselect) NIL Archive\r\n").await;
        let entry = ListEntry::from_response(&response).unwrap();
        assert_eq!(entry.delimiter, None);
        assert!(!entry.is_selectable());
    }

    #[tokio::test]
    async fn test_status_counts() {
        let response = parse(b"* STATUS blurdybloop (MESSAGES 231 UIDNEXT 44292)\r\n").await;
        let status = MailboxStatus::from_response(&response).unwrap();
        assert_eq!(status.messages, Some(231));
        assert_eq!(status.uid_next.unwrap().get(), 44292);
        assert!(status.unseen.is_none());
    }

    #[test]
    fn test_attribute_parse() {
        assert_eq!(MailboxAttribute::parse("\\NoSelect"), MailboxAttribute::NoSelect);
        assert_eq!(MailboxAttribute::parse("\\Spam"), MailboxAttribute::Junk);
    }
}
