//! Copy, move, delete, append and flag updates.

use std::collections::HashMap;

use carteggio_mime::{CrlfFilter, Entity};
use tracing::{debug, info};

use super::Folder;
use super::Message;
use super::search::search_results;
use crate::command::{Command, SearchCriteria, StatusAttribute, StoreAction};
use crate::connection::{Connector, ImapConnection};
use crate::folder::FolderState;
use crate::parser::NoLiterals;
use crate::types::{AppendUid, CopyUid, Flag, Flags, Uid, UidSet};
use crate::{Error, Result};

/// Creates `path` unless STATUS shows it exists. A refused CREATE is left
/// for the following command to report.
async fn ensure_mailbox(conn: &mut ImapConnection, path: &str) -> Result<()> {
    let status = Command::Status {
        mailbox: path.to_string(),
        items: vec![StatusAttribute::UidNext],
    };
    match conn.execute(&status).await {
        Ok(_) => return Ok(()),
        Err(err) if err.is_protocol() => debug!(mailbox = path, "creating missing mailbox"),
        Err(err) => return Err(err),
    }
    match conn
        .execute(&Command::Create {
            mailbox: path.to_string(),
        })
        .await
    {
        Err(err) if err.is_protocol() => {
            debug!(mailbox = path, %err, "CREATE refused");
            Ok(())
        }
        other => other.map(drop),
    }
}

async fn copy_on(
    conn: &mut ImapConnection,
    state: &FolderState,
    uids: &[Uid],
    destination: &str,
) -> Result<HashMap<Uid, Uid>> {
    ensure_mailbox(conn, destination).await?;
    let responses = conn
        .execute_with(
            &Command::UidCopy {
                uids: UidSet::from_uids(uids),
                mailbox: destination.to_string(),
            },
            &mut state.tracker(),
            &mut NoLiterals,
        )
        .await?;
    let mapping = responses
        .last()
        .and_then(|completion| completion.response_code())
        .and_then(CopyUid::from_code)
        .map(|copy| copy.mapping(uids.len()).into_iter().collect())
        .unwrap_or_default();
    Ok(mapping)
}

async fn store_flags(
    conn: &mut ImapConnection,
    state: &FolderState,
    uids: &[Uid],
    flags: &Flags,
    add: bool,
) -> Result<()> {
    let action = if add {
        StoreAction::AddFlags(flags.clone())
    } else {
        StoreAction::RemoveFlags(flags.clone())
    };
    conn.execute_with(
        &Command::UidStore {
            uids: UidSet::from_uids(uids),
            action,
            silent: true,
        },
        &mut state.tracker(),
        &mut NoLiterals,
    )
    .await
    .map(drop)
}

async fn append_on(
    conn: &mut ImapConnection,
    state: &FolderState,
    mailbox: String,
    data: &[u8],
    flags: &Flags,
) -> Result<Option<Uid>> {
    let command = Command::Append {
        mailbox,
        flags: flags.clone(),
        length: data.len() as u64,
    };
    let tag = conn.send_command(&command).await?;
    loop {
        let response = conn.read_response().await?;
        if response.is_continuation() {
            break;
        }
        if response.is_tagged() {
            return Err(Error::protocol(format!(
                "APPEND completed without taking the message: {response}"
            )));
        }
        state.apply(&response);
    }
    conn.write_raw(data).await?;
    conn.write_raw(b"\r\n").await?;
    let responses = conn
        .read_until_tagged(&tag, &mut state.tracker(), &mut NoLiterals)
        .await?;
    Ok(responses
        .last()
        .and_then(|completion| completion.response_code())
        .and_then(AppendUid::from_code)
        .map(|append| append.uid))
}

impl<C: Connector> Folder<C> {
    /// Copies messages to `destination`, creating it if needed.
    ///
    /// Returns source to destination UIDs when the server reports
    /// COPYUID with matching set sizes; otherwise the map is empty.
    ///
    /// # Errors
    ///
    /// [`Error::NotOpen`], protocol or transport errors.
    pub async fn copy_messages(
        &self,
        uids: &[Uid],
        destination: &str,
    ) -> Result<HashMap<Uid, Uid>> {
        if uids.is_empty() {
            return Ok(HashMap::new());
        }
        let path = self.inner.pool.remote_path(destination);
        let mut session = self.inner.session.lock().await;
        let conn = session.connection(&self.inner.name).await?;
        let result = copy_on(conn, &self.inner.state, uids, &path).await;
        session.settle().await;
        let mapping = result?;
        info!(
            from = %self.inner.name,
            to = destination,
            count = uids.len(),
            mapped = mapping.len(),
            "copied messages"
        );
        Ok(mapping)
    }

    /// Copies messages to `destination` and marks the originals deleted.
    ///
    /// # Errors
    ///
    /// See [`Folder::copy_messages`].
    pub async fn move_messages(
        &self,
        uids: &[Uid],
        destination: &str,
    ) -> Result<HashMap<Uid, Uid>> {
        let mapping = self.copy_messages(uids, destination).await?;
        self.store_flags(uids, &deleted(), true).await?;
        Ok(mapping)
    }

    /// Moves messages to `trash`, or only flags them `\Deleted` when there
    /// is no trash folder or this folder is the trash.
    ///
    /// # Errors
    ///
    /// See [`Folder::copy_messages`].
    pub async fn delete_messages(&self, uids: &[Uid], trash: Option<&str>) -> Result<()> {
        match trash {
            Some(trash) if trash != self.inner.name => {
                self.move_messages(uids, trash).await.map(drop)
            }
            _ => self.store_flags(uids, &deleted(), true).await,
        }
    }

    /// Adds or removes flags, updating the handles on success.
    ///
    /// # Errors
    ///
    /// [`Error::NotOpen`], protocol or transport errors.
    pub async fn set_flags(&self, messages: &mut [Message], flags: &Flags, add: bool) -> Result<()> {
        let uids: Vec<Uid> = messages.iter().map(Message::uid).collect();
        self.store_flags(&uids, flags, add).await?;
        for message in messages {
            for flag in flags.iter() {
                if add {
                    message.flags.insert(flag.clone());
                } else {
                    message.flags.remove(flag);
                }
            }
        }
        Ok(())
    }

    async fn store_flags(&self, uids: &[Uid], flags: &Flags, add: bool) -> Result<()> {
        if uids.is_empty() || flags.is_empty() {
            return Ok(());
        }
        let mut session = self.inner.session.lock().await;
        let conn = session.connection(&self.inner.name).await?;
        let result = store_flags(conn, &self.inner.state, uids, flags, add).await;
        session.settle().await;
        result
    }

    /// Permanently removes every `\Deleted` message.
    ///
    /// # Errors
    ///
    /// [`Error::NotOpen`], protocol or transport errors.
    pub async fn expunge(&self) -> Result<()> {
        self.run(Command::Expunge).await
    }

    /// Removes only the given `\Deleted` messages where the server supports
    /// UIDPLUS; falls back to a plain EXPUNGE otherwise.
    ///
    /// # Errors
    ///
    /// See [`Folder::expunge`].
    pub async fn expunge_uids(&self, uids: &[Uid]) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let mut session = self.inner.session.lock().await;
        let conn = session.connection(&self.inner.name).await?;
        let command = if conn.has_capability("UIDPLUS") {
            Command::UidExpunge {
                uids: UidSet::from_uids(uids),
            }
        } else {
            debug!(folder = %self.inner.name, "no UIDPLUS, expunging everything deleted");
            Command::Expunge
        };
        let result = conn
            .execute_with(&command, &mut self.inner.state.tracker(), &mut NoLiterals)
            .await;
        session.settle().await;
        result.map(drop)
    }

    async fn run(&self, command: Command) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        let conn = session.connection(&self.inner.name).await?;
        let result = conn
            .execute_with(&command, &mut self.inner.state.tracker(), &mut NoLiterals)
            .await;
        session.settle().await;
        result.map(drop)
    }

    /// Uploads `message` to this folder and returns its new UID.
    ///
    /// The UID comes from APPENDUID or, failing that, from a search on the
    /// message's Message-ID. `None` if neither is available.
    ///
    /// # Errors
    ///
    /// [`Error::NotOpen`], protocol or transport errors.
    pub async fn append(&self, message: &Entity, flags: &Flags) -> Result<Option<Uid>> {
        let data = CrlfFilter::convert(&message.to_bytes());
        let mailbox = self.remote_path();
        let mut session = self.inner.session.lock().await;
        let conn = session.connection(&self.inner.name).await?;
        let result = append_on(conn, &self.inner.state, mailbox, &data, flags).await;
        if let Ok(None) = result
            && let Some(message_id) = message.message_id()
        {
            debug!(folder = %self.inner.name, message_id, "no APPENDUID, searching");
            let found = conn
                .execute(&Command::UidSearch {
                    criteria: SearchCriteria::Header("MESSAGE-ID".into(), message_id.to_string()),
                })
                .await;
            session.settle().await;
            return Ok(search_results(&found?).first().copied());
        }
        session.settle().await;
        result
    }
}

fn deleted() -> Flags {
    [Flag::Deleted].into_iter().collect()
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
    use carteggio_mime::{Entity, Headers};

    use super::*;
    use crate::folder::OpenMode;
    use crate::testing::{greeted, store};

    fn uid(n: u32) -> Uid {
        Uid::new(n).unwrap()
    }

    fn uids(ns: &[u32]) -> Vec<Uid> {
        ns.iter().map(|&n| uid(n)).collect()
    }

    fn select(builder: &mut tokio_test::io::Builder) -> &mut tokio_test::io::Builder {
        builder
            .write(b"A0001 SELECT \"INBOX\"\r\n")
            .read(b"* 400 EXISTS\r\nA0001 OK [READ-WRITE] done\r\n")
    }

    #[tokio::test]
    async fn test_copy_maps_copyuid() {
        let mock = select(&mut greeted("UIDPLUS"))
            .write(b"A0002 STATUS \"Archive\" (UIDNEXT)\r\n")
            .read(b"* STATUS \"Archive\" (UIDNEXT 3956)\r\nA0002 OK\r\n")
            .write(b"A0003 UID COPY 304,319:320 \"Archive\"\r\n")
            .read(b"A0003 OK [COPYUID 38505 304,319:320 3956:3958] Done\r\n")
            .build();
        let store = store(mock);
        let inbox = store.folder("INBOX");
        inbox.open(OpenMode::ReadWrite).await.unwrap();

        let mapping = inbox
            .copy_messages(&uids(&[304, 319, 320]), "Archive")
            .await
            .unwrap();
        assert_eq!(mapping.len(), 3);
        assert_eq!(mapping[&uid(304)], uid(3956));
        assert_eq!(mapping[&uid(319)], uid(3957));
        assert_eq!(mapping[&uid(320)], uid(3958));
    }

    #[tokio::test]
    async fn test_copy_creates_destination_and_ignores_mismatched_copyuid() {
        let mock = select(&mut greeted("UIDPLUS"))
            .write(b"A0002 STATUS \"Archive\" (UIDNEXT)\r\n")
            .read(b"A0002 NO [NONEXISTENT] no such mailbox\r\n")
            .write(b"A0003 CREATE \"Archive\"\r\n")
            .read(b"A0003 OK created\r\n")
            .write(b"A0004 UID COPY 1:2 \"Archive\"\r\n")
            .read(b"A0004 OK [COPYUID 7 1:2 5] Done\r\n")
            .build();
        let store = store(mock);
        let inbox = store.folder("INBOX");
        inbox.open(OpenMode::ReadWrite).await.unwrap();

        let mapping = inbox.copy_messages(&uids(&[1, 2]), "Archive").await.unwrap();
        assert!(mapping.is_empty());
    }

    #[tokio::test]
    async fn test_move_flags_originals_deleted() {
        let mock = select(&mut greeted(""))
            .write(b"A0002 STATUS \"Trash\" (UIDNEXT)\r\n")
            .read(b"A0002 OK\r\n")
            .write(b"A0003 UID COPY 9 \"Trash\"\r\n")
            .read(b"A0003 OK\r\n")
            .write(b"A0004 UID STORE 9 +FLAGS.SILENT (\\Deleted)\r\n")
            .read(b"A0004 OK\r\n")
            .build();
        let store = store(mock);
        let inbox = store.folder("INBOX");
        inbox.open(OpenMode::ReadWrite).await.unwrap();

        inbox.delete_messages(&uids(&[9]), Some("Trash")).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_without_trash_only_flags() {
        let mock = select(&mut greeted(""))
            .write(b"A0002 UID STORE 9 +FLAGS.SILENT (\\Deleted)\r\n")
            .read(b"A0002 OK\r\n")
            .build();
        let store = store(mock);
        let inbox = store.folder("INBOX");
        inbox.open(OpenMode::ReadWrite).await.unwrap();

        inbox.delete_messages(&uids(&[9]), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_set_flags_updates_handles() {
        let mock = select(&mut greeted(""))
            .write(b"A0002 UID STORE 3 -FLAGS.SILENT (\\Seen)\r\n")
            .read(b"A0002 OK\r\n")
            .build();
        let store = store(mock);
        let inbox = store.folder("INBOX");
        inbox.open(OpenMode::ReadWrite).await.unwrap();

        let mut messages = vec![Message::new(uid(3))];
        messages[0].flags.insert(Flag::Seen);
        let seen: Flags = [Flag::Seen].into_iter().collect();
        inbox.set_flags(&mut messages, &seen, false).await.unwrap();
        assert!(!messages[0].flags().is_seen());
    }

    #[tokio::test]
    async fn test_append_uses_appenduid() {
        let mut headers = Headers::new();
        headers.set("Message-ID", "<m1@example.com>");
        let entity = Entity::leaf(headers, b"hi\n".to_vec());
        let data = CrlfFilter::convert(&entity.to_bytes());
        let header = format!("A0002 APPEND \"INBOX\" (\\Seen) {{{}}}\r\n", data.len());
        let mut body = data.clone();
        body.extend_from_slice(b"\r\n");

        let mock = select(&mut greeted("UIDPLUS"))
            .write(header.as_bytes())
            .read(b"+ go ahead\r\n")
            .write(&body)
            .read(b"A0002 OK [APPENDUID 38505 3955] done\r\n")
            .build();
        let store = store(mock);
        let inbox = store.folder("INBOX");
        inbox.open(OpenMode::ReadWrite).await.unwrap();

        let seen: Flags = [Flag::Seen].into_iter().collect();
        let appended = inbox.append(&entity, &seen).await.unwrap();
        assert_eq!(appended, Some(uid(3955)));
    }

    #[tokio::test]
    async fn test_append_falls_back_to_message_id_search() {
        let mut headers = Headers::new();
        headers.set("Message-ID", "<m2@example.com>");
        let entity = Entity::leaf(headers, b"hi\r\n".to_vec());
        let data = CrlfFilter::convert(&entity.to_bytes());
        let header = format!("A0002 APPEND \"INBOX\" {{{}}}\r\n", data.len());
        let mut body = data.clone();
        body.extend_from_slice(b"\r\n");

        let mock = select(&mut greeted(""))
            .write(header.as_bytes())
            .read(b"+ go ahead\r\n")
            .write(&body)
            .read(b"* 401 EXISTS\r\nA0002 OK done\r\n")
            .write(b"A0003 UID SEARCH HEADER MESSAGE-ID \"<m2@example.com>\"\r\n")
            .read(b"* SEARCH 77\r\nA0003 OK\r\n")
            .build();
        let store = store(mock);
        let inbox = store.folder("INBOX");
        inbox.open(OpenMode::ReadWrite).await.unwrap();

        let appended = inbox.append(&entity, &Flags::new()).await.unwrap();
        assert_eq!(appended, Some(uid(77)));
        assert_eq!(inbox.message_count(), Some(401));
    }

    #[tokio::test]
    async fn test_expunge_uids_needs_uidplus() {
        let mock = select(&mut greeted("UIDPLUS"))
            .write(b"A0002 UID EXPUNGE 4\r\n")
            .read(b"* 3 EXPUNGE\r\nA0002 OK\r\n")
            .build();
        let store = store(mock);
        let inbox = store.folder("INBOX");
        inbox.open(OpenMode::ReadWrite).await.unwrap();

        inbox.expunge_uids(&uids(&[4])).await.unwrap();
        assert_eq!(inbox.message_count(), Some(399));
    }
}
