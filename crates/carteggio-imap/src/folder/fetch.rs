//! FETCH item selection and response mapping.

use std::collections::HashMap;

use carteggio_mime::{Body, Entity, Headers};
use chrono::{DateTime, FixedOffset};
use tracing::debug;

use super::message::{FetchItem, Message};
use super::structure::{ROOT_PART, apply_structure};
use crate::command::FetchAttribute;
use crate::connection::FixedLengthReader;
use crate::parser::{ImapList, ImapValue, LiteralHandler, PartialResponse};
use crate::types::{Flag, Flags, Uid};
use crate::Result;

/// Header fields fetched for [`FetchItem::Envelope`].
pub(crate) const ENVELOPE_FIELDS: &str = "HEADER.FIELDS (DATE SUBJECT FROM TO CC REPLY-TO \
     MESSAGE-ID REFERENCES IN-REPLY-TO CONTENT-TYPE)";

/// FETCH attributes for a profile. UID is always requested.
pub(crate) fn fetch_attributes(items: &[FetchItem], body_sane_limit: u32) -> Vec<FetchAttribute> {
    let mut attributes = vec![FetchAttribute::Uid];
    let mut push = |attribute: FetchAttribute| {
        if !attributes.contains(&attribute) {
            attributes.push(attribute);
        }
    };
    for item in items {
        match item {
            FetchItem::Flags => push(FetchAttribute::Flags),
            FetchItem::Envelope => {
                push(FetchAttribute::InternalDate);
                push(FetchAttribute::Rfc822Size);
                push(FetchAttribute::peek(ENVELOPE_FIELDS));
            }
            FetchItem::Structure => push(FetchAttribute::BodyStructure),
            FetchItem::Body => push(FetchAttribute::peek("")),
            FetchItem::BodySane if !items.contains(&FetchItem::Body) => {
                push(FetchAttribute::Body {
                    section: String::new(),
                    peek: true,
                    partial: Some((0, body_sane_limit)),
                });
            }
            FetchItem::BodySane => {}
        }
    }
    attributes
}

fn to_uid(value: i64) -> Option<Uid> {
    u32::try_from(value).ok().and_then(Uid::new)
}

/// Canonical text of a `[section]` list, as used for lookups.
pub(crate) fn section_name(section: &ImapList) -> String {
    section
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// The section a literal at the end of `fetch` belongs to, if the list
/// so far ends in `BODY[section]` or `BODY[section]<origin>`.
fn pending_section(fetch: &ImapList) -> Option<String> {
    let mut index = fetch.len().checked_sub(1)?;
    if fetch
        .get(index)
        .and_then(ImapValue::as_str)
        .is_some_and(|s| s.starts_with('<'))
    {
        index = index.checked_sub(1)?;
    }
    let section = fetch.list(index).filter(|l| l.is_bracketed())?;
    fetch
        .atom_is(index.checked_sub(1)?, "BODY")
        .then(|| section_name(section))
}

/// Moves BODY literals out of the response tree as they are read, keyed
/// by UID and section.
#[derive(Debug, Default)]
pub(crate) struct BodyCollector {
    bodies: HashMap<(Uid, String), Vec<u8>>,
}

impl BodyCollector {
    pub(crate) fn take(&mut self, uid: Uid, section: &str) -> Option<Vec<u8>> {
        self.bodies.remove(&(uid, section.to_string()))
    }
}

impl LiteralHandler for BodyCollector {
    async fn on_literal(
        &mut self,
        response: &PartialResponse<'_>,
        literal: &mut FixedLengthReader<'_>,
    ) -> Result<Option<ImapValue>> {
        if response.tag.is_some() || !response.root().is_some_and(|r| r.atom_is(1, "FETCH")) {
            return Ok(None);
        }
        let Some(fetch) = response.current() else {
            return Ok(None);
        };
        let (Some(section), Some(uid)) = (
            pending_section(fetch),
            fetch.keyed_number("UID").and_then(to_uid),
        ) else {
            // UID not seen yet; the literal stays in the tree.
            return Ok(None);
        };
        let data = literal.read_to_vec().await?;
        self.bodies.insert((uid, section), data);
        Ok(Some(ImapValue::Handled(literal.len())))
    }
}

/// UID and item list of a `* n FETCH (...)` response.
pub(crate) fn fetch_items(response: &crate::parser::ImapResponse) -> Option<(Uid, &ImapList)> {
    if !response.is_untagged() || !response.atom_is(1, "FETCH") {
        return None;
    }
    let items = response.list(2)?;
    let uid = items.keyed_number("UID").and_then(to_uid)?;
    Some((uid, items))
}

/// Parses INTERNALDATE (`17-Jul-1996 02:44:25 -0700`).
pub(crate) fn parse_internal_date(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(value.trim(), "%d-%b-%Y %H:%M:%S %z").ok()
}

fn literal_bytes(value: &ImapValue) -> Option<Vec<u8>> {
    match value {
        ImapValue::Literal(bytes) => Some(bytes.clone()),
        ImapValue::Quoted(text) | ImapValue::Atom(text) => Some(text.as_bytes().to_vec()),
        _ => None,
    }
}

/// Applies one FETCH item list to `message`.
///
/// # Errors
///
/// Fails if the body structure contains an unsupported part.
pub(crate) fn apply_fetch(
    message: &mut Message,
    items: &ImapList,
    bodies: &mut BodyCollector,
) -> Result<()> {
    let mut index = 0;
    while index < items.len() {
        let Some(key) = items.get(index).and_then(ImapValue::as_str) else {
            index += 1;
            continue;
        };
        match key.to_ascii_uppercase().as_str() {
            "FLAGS" => {
                if let Some(list) = items.list(index + 1) {
                    message.flags = list
                        .iter()
                        .filter_map(ImapValue::as_str)
                        .map(Flag::parse)
                        .collect::<Flags>();
                }
                index += 2;
            }
            "INTERNALDATE" => {
                message.internal_date = items
                    .string(index + 1)
                    .as_deref()
                    .and_then(parse_internal_date);
                index += 2;
            }
            "RFC822.SIZE" => {
                message.size = items.number(index + 1).and_then(|n| u32::try_from(n).ok());
                index += 2;
            }
            "BODYSTRUCTURE" => {
                if let Some(structure) = items.list(index + 1) {
                    apply_structure(&mut message.entity, structure, ROOT_PART)?;
                }
                index += 2;
            }
            "BODY" => {
                let Some(section) = items.list(index + 1).filter(|l| l.is_bracketed()) else {
                    // Non-extensible BODY structure; not requested.
                    index += 2;
                    continue;
                };
                let section = section_name(section);
                let mut value_index = index + 2;
                if items
                    .get(value_index)
                    .and_then(ImapValue::as_str)
                    .is_some_and(|s| s.starts_with('<'))
                {
                    value_index += 1;
                }
                let data = match items.get(value_index) {
                    Some(ImapValue::Handled(_)) => bodies.take(message.uid(), &section),
                    Some(value) => literal_bytes(value),
                    None => None,
                };
                if let Some(data) = data {
                    apply_section(message, &section, data);
                }
                index = value_index + 1;
            }
            _ => index += 1,
        }
    }
    Ok(())
}

/// Stores section data on the message: header fields, the whole message,
/// or one part.
pub(crate) fn apply_section(message: &mut Message, section: &str, data: Vec<u8>) {
    let upper = section.to_ascii_uppercase();
    if upper.starts_with("HEADER") {
        match Headers::parse(&String::from_utf8_lossy(&data)) {
            Ok(headers) => {
                for (name, value) in headers.iter() {
                    message.entity.headers.set(name, value);
                }
            }
            Err(err) => debug!(uid = %message.uid(), %err, "unparseable header fields"),
        }
    } else if section.is_empty() {
        match Entity::parse(&data) {
            Ok(entity) => message.entity = entity,
            Err(err) => {
                debug!(uid = %message.uid(), %err, "keeping unparsed body");
                message.entity.body = Body::Data(data);
            }
        }
    } else if let Some(part) = message
        .entity
        .find_by_header_mut(super::structure::STORE_DATA_HEADER, section)
    {
        part.body = Body::Data(data);
    } else if upper == ROOT_PART {
        message.entity.body = Body::Data(data);
    } else {
        debug!(uid = %message.uid(), section, "data for unknown part");
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
    use chrono::{Datelike, Timelike};
    use tokio_test::io::Builder;

    use super::*;
    use crate::connection::PeekableReader;
    use crate::parser::read_response;

    #[test]
    fn test_attributes_always_include_uid() {
        let attrs = fetch_attributes(&[FetchItem::Flags], 1024);
        assert_eq!(attrs, vec![FetchAttribute::Uid, FetchAttribute::Flags]);

        let attrs = fetch_attributes(&[FetchItem::Body, FetchItem::BodySane, FetchItem::Flags], 1024);
        assert_eq!(
            attrs,
            vec![
                FetchAttribute::Uid,
                FetchAttribute::peek(""),
                FetchAttribute::Flags
            ]
        );

        let attrs = fetch_attributes(&[FetchItem::BodySane], 2048);
        assert!(attrs.contains(&FetchAttribute::Body {
            section: String::new(),
            peek: true,
            partial: Some((0, 2048)),
        }));
    }

    #[test]
    fn test_internal_date() {
        let date = parse_internal_date(" 7-Jul-1996 02:44:25 -0700").unwrap();
        assert_eq!(date.day(), 7);
        assert_eq!(date.hour(), 2);
        assert_eq!(date.offset().local_minus_utc(), -7 * 3600);
        assert!(parse_internal_date("yesterday").is_none());
    }

    #[tokio::test]
    async fn test_collector_streams_body_out_of_tree() {
        let wire = b"* 3 FETCH (UID 42 FLAGS (\\Seen) RFC822.SIZE 58 INTERNALDATE \"17-Jul-1996 02:44:25 -0700\" BODY[] {45}\r\nSubject: hi\r\nMessage-ID: <x@y>\r\n\r\nhello there)\r\n";
        let mut reader = PeekableReader::new(Builder::new().read(wire).build());
        let mut collector = BodyCollector::default();
        let response = read_response(&mut reader, &mut collector).await.unwrap();

        let (uid, items) = fetch_items(&response).unwrap();
        assert_eq!(uid.get(), 42);
        assert!(matches!(items.get(10), Some(ImapValue::Handled(45))));

        let mut message = Message::new(uid);
        apply_fetch(&mut message, items, &mut collector).unwrap();
        assert!(message.flags().is_seen());
        assert_eq!(message.size(), Some(58));
        assert!(message.internal_date().is_some());
        assert_eq!(message.message_id(), Some("<x@y>"));
        assert_eq!(message.entity().body_text().unwrap(), "hello there");
    }

    #[tokio::test]
    async fn test_literal_before_uid_stays_in_tree() {
        let wire = b"* 3 FETCH (BODY[HEADER.FIELDS (SUBJECT)] {15}\r\nSubject: hi\r\n\r\n UID 9)\r\n";
        let mut reader = PeekableReader::new(Builder::new().read(wire).build());
        let mut collector = BodyCollector::default();
        let response = read_response(&mut reader, &mut collector).await.unwrap();

        let (uid, items) = fetch_items(&response).unwrap();
        let mut message = Message::new(uid);
        apply_fetch(&mut message, items, &mut collector).unwrap();
        assert_eq!(message.entity().subject(), Some("hi"));
    }
}
