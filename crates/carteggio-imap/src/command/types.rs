//! Argument types for [`Command`](super::Command).

use crate::types::{Flags, Uid, UidSet};

/// Counters a STATUS command can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAttribute {
    /// `MESSAGES`, the message count.
    Messages,
    /// `UIDNEXT`
    UidNext,
    /// `UIDVALIDITY`
    UidValidity,
    /// `UNSEEN`, messages without `\Seen`.
    Unseen,
}

impl StatusAttribute {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Messages => "MESSAGES",
            Self::UidNext => "UIDNEXT",
            Self::UidValidity => "UIDVALIDITY",
            Self::Unseen => "UNSEEN",
        }
    }
}

/// One item of a FETCH request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchAttribute {
    /// `FLAGS`
    Flags,
    /// `INTERNALDATE`, when the server received the message.
    InternalDate,
    /// `RFC822.SIZE`
    Rfc822Size,
    /// `BODYSTRUCTURE`
    BodyStructure,
    /// `UID`
    Uid,
    /// `BODY[section]<start.len>`. The empty section is the whole message;
    /// `peek` leaves `\Seen` alone.
    Body {
        /// Part specifier such as `1.2` or `TEXT`.
        section: String,
        /// Use `BODY.PEEK`.
        peek: bool,
        /// First byte and byte count.
        partial: Option<(u32, u32)>,
    },
}

impl FetchAttribute {
    /// `BODY.PEEK[section]`, all of it.
    #[must_use]
    pub fn peek(section: impl Into<String>) -> Self {
        Self::Body {
            section: section.into(),
            peek: true,
            partial: None,
        }
    }
}

/// How a STORE changes the flag set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreAction {
    /// Replace with exactly these.
    SetFlags(Flags),
    /// `+FLAGS`
    AddFlags(Flags),
    /// `-FLAGS`
    RemoveFlags(Flags),
}

/// The search keys the engine needs. Juxtaposed keys in [`And`](Self::And)
/// must all match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchCriteria {
    /// `ALL`
    All,
    /// `DELETED`
    Deleted,
    /// `UNSEEN`
    Unseen,
    /// `UID set`
    Uids(UidSet),
    /// `UID n:*`. Servers answer with the highest UID even when it is below
    /// `n`, so callers filter the result.
    UidsFrom(Uid),
    /// `UID *`
    HighestUid,
    /// `HEADER name value`, a substring match on the field.
    Header(String, String),
    /// Keys written side by side.
    And(Vec<SearchCriteria>),
    /// `NOT key`
    Not(Box<SearchCriteria>),
}
