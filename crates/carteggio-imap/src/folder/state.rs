//! Live folder state fed by untagged server data.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::parser::ImapResponse;
use crate::types::{Flag, Flags, Uid, UidValidity};

/// How a folder is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// SELECT.
    ReadWrite,
    /// EXAMINE.
    ReadOnly,
}

const UNKNOWN: i64 = -1;

/// Message count, UIDNEXT and permanent flags of a selected folder.
///
/// Only the task holding the folder's connection writes; anyone may read.
#[derive(Debug)]
pub struct FolderState {
    message_count: AtomicI64,
    uid_next: AtomicI64,
    uid_validity: AtomicI64,
    read_only: AtomicBool,
    permanent_flags: Mutex<Flags>,
}

impl Default for FolderState {
    fn default() -> Self {
        Self {
            message_count: AtomicI64::new(UNKNOWN),
            uid_next: AtomicI64::new(UNKNOWN),
            uid_validity: AtomicI64::new(UNKNOWN),
            read_only: AtomicBool::new(false),
            permanent_flags: Mutex::new(Flags::new()),
        }
    }
}

fn known(value: i64) -> Option<u32> {
    u32::try_from(value).ok()
}

impl FolderState {
    /// Forgets everything learned from the last selection.
    pub fn reset(&self) {
        self.message_count.store(UNKNOWN, Ordering::Release);
        self.uid_next.store(UNKNOWN, Ordering::Release);
        self.uid_validity.store(UNKNOWN, Ordering::Release);
        self.read_only.store(false, Ordering::Release);
        *self
            .permanent_flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Flags::new();
    }

    /// Messages in the folder, `None` until the server reported EXISTS.
    #[must_use]
    pub fn message_count(&self) -> Option<u32> {
        known(self.message_count.load(Ordering::Acquire))
    }

    /// Predicted UID of the next message to arrive.
    #[must_use]
    pub fn uid_next(&self) -> Option<Uid> {
        known(self.uid_next.load(Ordering::Acquire)).and_then(Uid::new)
    }

    /// UIDVALIDITY of the current selection.
    #[must_use]
    pub fn uid_validity(&self) -> Option<UidValidity> {
        known(self.uid_validity.load(Ordering::Acquire)).and_then(UidValidity::new)
    }

    /// Returns true if the server selected the folder read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    /// Flags that persist across sessions.
    #[must_use]
    pub fn permanent_flags(&self) -> Flags {
        self.permanent_flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns true if `flag` can be stored permanently.
    #[must_use]
    pub fn supports_flag(&self, flag: &Flag) -> bool {
        let flags = self
            .permanent_flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        flags.contains(flag) || (matches!(flag, Flag::Keyword(_)) && flags.contains(&Flag::AnyKeyword))
    }

    pub(crate) fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Release);
    }

    /// An untagged-response handler feeding this state.
    pub(crate) fn tracker(&self) -> impl FnMut(&ImapResponse) + Send + '_ {
        move |response: &ImapResponse| {
            self.apply(response);
        }
    }

    /// Applies one response. Returns true if the folder's content changed
    /// (messages arrived, vanished or had their flags changed).
    pub fn apply(&self, response: &ImapResponse) -> bool {
        let mut changed = false;
        if response.is_untagged() {
            let number = response.number(0);
            if response.atom_is(1, "EXISTS") {
                if let Some(count) = number {
                    self.message_count.store(count, Ordering::Release);
                    changed = true;
                }
            } else if response.atom_is(1, "EXPUNGE") {
                let _ = self
                    .message_count
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                        (count > 0).then(|| count - 1)
                    });
                changed = true;
            } else if response.atom_is(1, "FETCH") {
                changed = true;
            }
        }

        if let Some(code) = response.response_code() {
            if let Some(next) = code.keyed_number("UIDNEXT") {
                self.uid_next.store(next, Ordering::Release);
            }
            if let Some(validity) = code.keyed_number("UIDVALIDITY") {
                self.uid_validity.store(validity, Ordering::Release);
            }
            if let Some(list) = code.keyed_list("PERMANENTFLAGS") {
                *self
                    .permanent_flags
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = list
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(Flag::parse)
                    .collect();
            }
            if code.atom_is(0, "READ-ONLY") {
                self.read_only.store(true, Ordering::Release);
            } else if code.atom_is(0, "READ-WRITE") {
                self.read_only.store(false, Ordering::Release);
            }
        }
        changed
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
    use tokio_test::io::Builder;

    use super::*;
    use crate::connection::PeekableReader;
    use crate::parser::read_plain;

    async fn responses(input: &[u8]) -> Vec<ImapResponse> {
        let mut reader = PeekableReader::new(Builder::new().read(input).build());
        let mut out = Vec::new();
        while reader.peek().await.unwrap().is_some() {
            out.push(read_plain(&mut reader).await.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_select_responses() {
        let state = FolderState::default();
        assert_eq!(state.message_count(), None);

        let lines = responses(
            b"* 172 EXISTS\r\n\
              * OK [UIDVALIDITY 3857529045] UIDs valid\r\n\
              * OK [UIDNEXT 4392] Predicted next UID\r\n\
              * OK [PERMANENTFLAGS (\\Deleted \\Seen \\*)] Limited\r\n\
              A0002 OK [READ-ONLY] EXAMINE completed\r\n",
        )
        .await;
        for line in &lines {
            state.apply(line);
        }

        assert_eq!(state.message_count(), Some(172));
        assert_eq!(state.uid_next().unwrap().get(), 4392);
        assert_eq!(state.uid_validity().unwrap().get(), 3857529045);
        assert!(state.is_read_only());
        assert!(state.supports_flag(&Flag::Seen));
        assert!(state.supports_flag(&Flag::Keyword("$Forwarded".into())));
        assert!(!state.supports_flag(&Flag::Flagged));

        state.reset();
        assert_eq!(state.message_count(), None);
        assert!(state.permanent_flags().is_empty());
    }

    #[tokio::test]
    async fn test_changes_are_reported() {
        let state = FolderState::default();
        let lines = responses(b"* 3 EXISTS\r\n* 2 EXPUNGE\r\n* 1 FETCH (FLAGS (\\Seen))\r\n* OK still here\r\n").await;

        let changed: Vec<bool> = lines.iter().map(|l| state.apply(l)).collect();
        assert_eq!(changed, vec![true, true, true, false]);
        assert_eq!(state.message_count(), Some(2));
    }
}
