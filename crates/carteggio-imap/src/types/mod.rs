//! Core IMAP types.

mod flags;
mod identifiers;
mod mailbox;
mod response_code;
mod sequence;
mod sync_point;

pub use flags::{Flag, Flags};
pub use identifiers::{Uid, UidValidity};
pub use mailbox::{ListEntry, MailboxAttribute, MailboxStatus};
pub use response_code::{AppendUid, CopyUid};
pub use sequence::UidSet;
pub use sync_point::{InvalidSyncPoint, SyncPoint};
