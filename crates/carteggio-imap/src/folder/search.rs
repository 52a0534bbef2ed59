//! UID SEARCH and incremental sync.

use tracing::debug;

use super::{Folder, Message};
use crate::command::{Command, SearchCriteria};
use crate::connection::Connector;
use crate::parser::{ImapResponse, NoLiterals};
use crate::types::{SyncPoint, Uid};
use crate::Result;

/// UIDs listed in `* SEARCH` responses, highest first, without duplicates.
pub(crate) fn search_results(responses: &[ImapResponse]) -> Vec<Uid> {
    let mut uids: Vec<Uid> = responses
        .iter()
        .filter(|r| r.is_untagged() && r.atom_is(0, "SEARCH"))
        .flat_map(|r| r.iter().skip(1).filter_map(|v| v.as_str().and_then(Uid::parse)))
        .collect();
    uids.sort_unstable_by(|a, b| b.cmp(a));
    uids.dedup();
    uids
}

impl<C: Connector> Folder<C> {
    /// Runs `UID SEARCH`. Results are sorted highest UID first so callers
    /// that stop early handle the newest messages.
    ///
    /// # Errors
    ///
    /// [`crate::Error::NotOpen`], protocol or transport errors.
    pub async fn search(&self, criteria: SearchCriteria) -> Result<Vec<Uid>> {
        let command = Command::UidSearch { criteria };
        let mut session = self.inner.session.lock().await;
        let conn = session.connection(&self.inner.name).await?;
        let result = conn
            .execute_with(&command, &mut self.inner.state.tracker(), &mut NoLiterals)
            .await;
        session.settle().await;
        Ok(search_results(&result?))
    }

    /// Messages that arrived since `sync_point`, newest first.
    ///
    /// An unknown point is only initialised: it is set past the highest
    /// UID in the folder and nothing is returned. Otherwise the point is
    /// advanced past every UID returned.
    ///
    /// # Errors
    ///
    /// See [`Folder::search`].
    pub async fn messages_after(&self, sync_point: &mut SyncPoint) -> Result<Vec<Message>> {
        let Some(next) = sync_point.next_uid() else {
            let highest = self.search(SearchCriteria::HighestUid).await?;
            match highest.first() {
                Some(uid) => sync_point.advance_past(*uid),
                None => sync_point.update(self.inner.state.uid_next().unwrap_or(Uid::MIN)),
            }
            debug!(folder = %self.inner.name, %sync_point, "sync point initialised");
            return Ok(Vec::new());
        };

        let mut uids = self
            .search(SearchCriteria::And(vec![
                SearchCriteria::UidsFrom(next),
                SearchCriteria::Not(Box::new(SearchCriteria::Deleted)),
            ]))
            .await?;
        // `n:*` always matches the last message, even when it is below n.
        if let [only] = uids.as_slice()
            && *only < next
        {
            uids.clear();
        }
        for uid in &uids {
            sync_point.advance_past(*uid);
        }
        Ok(uids.into_iter().map(Message::new).collect())
    }

    /// UID of the message with the given Message-ID header, if any. With
    /// duplicates, the highest UID wins.
    ///
    /// # Errors
    ///
    /// See [`Folder::search`].
    pub async fn find_by_message_id(&self, message_id: &str) -> Result<Option<Uid>> {
        let uids = self
            .search(SearchCriteria::Header(
                "MESSAGE-ID".into(),
                message_id.to_string(),
            ))
            .await?;
        Ok(uids.first().copied())
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
    use proptest::prelude::*;

    use crate::folder::OpenMode;
    use crate::testing::{greeted, store};
    use crate::types::{SyncPoint, Uid};

    fn uid(n: u32) -> Uid {
        Uid::new(n).unwrap()
    }

    fn select(builder: &mut tokio_test::io::Builder) -> &mut tokio_test::io::Builder {
        builder
            .write(b"A0001 SELECT \"INBOX\"\r\n")
            .read(b"* 12 EXISTS\r\n* OK [UIDNEXT 31] next\r\nA0001 OK [READ-WRITE] done\r\n")
    }

    #[tokio::test]
    async fn test_first_sync_only_sets_watermark() {
        let mock = select(&mut greeted(""))
            .write(b"A0002 UID SEARCH UID *\r\n")
            .read(b"* SEARCH 27\r\nA0002 OK\r\n")
            .build();
        let store = store(mock);
        let inbox = store.folder("INBOX");
        inbox.open(OpenMode::ReadWrite).await.unwrap();

        let mut point = SyncPoint::unknown();
        let messages = inbox.messages_after(&mut point).await.unwrap();
        assert!(messages.is_empty());
        assert_eq!(point.next_uid(), Some(uid(28)));
    }

    #[tokio::test]
    async fn test_first_sync_of_empty_folder_uses_uidnext() {
        let mock = select(&mut greeted(""))
            .write(b"A0002 UID SEARCH UID *\r\n")
            .read(b"* SEARCH\r\nA0002 OK\r\n")
            .build();
        let store = store(mock);
        let inbox = store.folder("INBOX");
        inbox.open(OpenMode::ReadWrite).await.unwrap();

        let mut point = SyncPoint::unknown();
        inbox.messages_after(&mut point).await.unwrap();
        assert_eq!(point.next_uid(), Some(uid(31)));
    }

    #[tokio::test]
    async fn test_star_artifact_is_filtered() {
        let mock = select(&mut greeted(""))
            .write(b"A0002 UID SEARCH UID 28:* NOT DELETED\r\n")
            .read(b"* SEARCH 27\r\nA0002 OK\r\n")
            .build();
        let store = store(mock);
        let inbox = store.folder("INBOX");
        inbox.open(OpenMode::ReadWrite).await.unwrap();

        let mut point = SyncPoint::at(uid(28));
        assert!(inbox.messages_after(&mut point).await.unwrap().is_empty());
        assert_eq!(point.next_uid(), Some(uid(28)));
    }

    #[tokio::test]
    async fn test_new_messages_are_newest_first() {
        let mock = select(&mut greeted(""))
            .write(b"A0002 UID SEARCH UID 28:* NOT DELETED\r\n")
            .read(b"* SEARCH 28 30\r\n* SEARCH 29 30\r\nA0002 OK\r\n")
            .build();
        let store = store(mock);
        let inbox = store.folder("INBOX");
        inbox.open(OpenMode::ReadWrite).await.unwrap();

        let mut point = SyncPoint::at(uid(28));
        let messages = inbox.messages_after(&mut point).await.unwrap();
        let uids: Vec<u32> = messages.iter().map(|m| m.uid().get()).collect();
        assert_eq!(uids, vec![30, 29, 28]);
        assert_eq!(point.next_uid(), Some(uid(31)));
    }

    #[tokio::test]
    async fn test_find_by_message_id() {
        let mock = select(&mut greeted(""))
            .write(b"A0002 UID SEARCH HEADER MESSAGE-ID \"<a@b>\"\r\n")
            .read(b"* SEARCH 4\r\nA0002 OK\r\n")
            .build();
        let store = store(mock);
        let inbox = store.folder("INBOX");
        inbox.open(OpenMode::ReadWrite).await.unwrap();

        assert_eq!(inbox.find_by_message_id("<a@b>").await.unwrap(), Some(uid(4)));
    }

    proptest! {
        #[test]
        fn prop_sync_point_never_moves_back(seen in proptest::collection::vec(1u32..10_000, 0..50)) {
            let mut point = SyncPoint::unknown();
            let mut highest = 0;
            for n in seen {
                point.advance_past(uid(n));
                highest = highest.max(n);
                prop_assert_eq!(point.next_uid(), Some(uid(highest + 1)));
            }
            let restored = SyncPoint::parse(&point.save()).unwrap();
            prop_assert_eq!(restored, point);
        }
    }
}
