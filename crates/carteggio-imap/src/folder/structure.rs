//! BODYSTRUCTURE to MIME entity tree.
//!
//! Every leaf gets Content-Type, Content-Disposition (with a `size`
//! parameter) and Content-Transfer-Encoding headers plus a
//! [`STORE_DATA_HEADER`] holding its part id, so the body can be fetched
//! later with `BODY.PEEK[<id>]`. Bodies are left deferred.
//!
//! Part ids follow RFC 3501: children of the top level are `1`, `2`, ...;
//! deeper levels append `.N`. A single-part message is part `TEXT`.

use carteggio_mime::{Body, ContentDisposition, ContentType, Entity};

use crate::parser::ImapList;
use crate::{Error, Result};

/// Header recording a leaf's part id.
pub const STORE_DATA_HEADER: &str = "X-Carteggio-Store-Data";

/// Part id of the top level.
pub const ROOT_PART: &str = "TEXT";

/// Fills `target` from a BODYSTRUCTURE list.
///
/// # Errors
///
/// Returns [`Error::UnsupportedContent`] if the structure contains a
/// `message/rfc822` part.
pub fn apply_structure(target: &mut Entity, structure: &ImapList, id: &str) -> Result<()> {
    if structure.list(0).is_some() {
        return apply_multipart(target, structure, id);
    }

    let main_type = lowercase(structure.string(0)).unwrap_or_else(|| "text".into());
    let sub_type = lowercase(structure.string(1)).unwrap_or_else(|| "plain".into());
    if main_type == "message" && sub_type == "rfc822" {
        return Err(Error::UnsupportedContent(format!(
            "message/rfc822 at part {id}"
        )));
    }

    let mut content_type = ContentType::new(&main_type, &sub_type);
    for (key, value) in parameters(structure.list(2)) {
        content_type = content_type.with_parameter(key, value);
    }
    target.headers.set("Content-Type", content_type.to_string());

    if let Some(content_id) = structure.string(3) {
        target.headers.set("Content-ID", content_id);
    }
    if let Some(encoding) = lowercase(structure.string(5)) {
        target.headers.set("Content-Transfer-Encoding", encoding);
    }

    let size = structure.number(6).unwrap_or(0);
    // Text parts carry a line count before the extension data.
    let disposition_index = if main_type == "text" { 9 } else { 8 };
    let mut disposition = match structure.list(disposition_index) {
        Some(list) if !list.is_empty() => {
            let mut disposition = ContentDisposition::new(
                lowercase(list.string(0)).unwrap_or_else(|| "attachment".into()),
            );
            for (key, value) in parameters(list.list(1)) {
                disposition = disposition.with_parameter(key, value);
            }
            disposition
        }
        _ => ContentDisposition::new("inline"),
    };
    if disposition.parameter("size").is_none() {
        disposition = disposition.with_parameter("size", size.to_string());
    }
    target
        .headers
        .set("Content-Disposition", disposition.to_string());
    target.headers.set(STORE_DATA_HEADER, id);
    target.body = Body::Deferred;
    Ok(())
}

fn apply_multipart(target: &mut Entity, structure: &ImapList, id: &str) -> Result<()> {
    let mut parts = Vec::new();
    let mut index = 0;
    while let Some(child) = structure.list(index) {
        let child_id = if id.eq_ignore_ascii_case(ROOT_PART) {
            (index + 1).to_string()
        } else {
            format!("{id}.{}", index + 1)
        };
        let mut part = Entity::default();
        apply_structure(&mut part, child, &child_id)?;
        parts.push(part);
        index += 1;
    }

    let sub_type = lowercase(structure.string(index)).unwrap_or_else(|| "mixed".into());
    let boundary = parameters(structure.list(index + 1))
        .find(|(key, _)| key == "boundary")
        .map_or_else(
            || format!("----=_carteggio_{}", id.replace('.', "_")),
            |(_, value)| value,
        );
    let headers = std::mem::take(&mut target.headers);
    *target = Entity::multipart(headers, &sub_type, &boundary, parts);
    Ok(())
}

fn lowercase(value: Option<String>) -> Option<String> {
    value.map(|v| v.to_ascii_lowercase())
}

/// Key/value pairs of a body parameter list; NIL yields nothing.
fn parameters(list: Option<&ImapList>) -> impl Iterator<Item = (String, String)> + '_ {
    list.into_iter().flat_map(|list| {
        (0..list.len() / 2).filter_map(move |i| {
            let key = list.string(2 * i)?.to_ascii_lowercase();
            let value = list.string(2 * i + 1)?;
            Some((key, value))
        })
    })
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

    async fn structure_of(line: &[u8]) -> ImapList {
        let mut reader = PeekableReader::new(Builder::new().read(line).build());
        let response = read_plain(&mut reader).await.unwrap();
        response
            .list(2)
            .unwrap()
            .keyed_list("BODYSTRUCTURE")
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn test_single_part_is_text() {
        let structure = structure_of(
            b"* 1 FETCH (BODYSTRUCTURE (\"TEXT\" \"PLAIN\" (\"CHARSET\" \"UTF-8\") NIL NIL \"QUOTED-PRINTABLE\" 1315 42 NIL NIL NIL))\r\n",
        )
        .await;
        let mut entity = Entity::default();
        apply_structure(&mut entity, &structure, ROOT_PART).unwrap();

        assert_eq!(entity.mime_type(), "text/plain");
        assert_eq!(entity.content_type().charset(), Some("UTF-8"));
        assert_eq!(entity.header(STORE_DATA_HEADER), Some("TEXT"));
        assert_eq!(
            entity.header("Content-Transfer-Encoding"),
            Some("quoted-printable")
        );
        let disposition = entity.disposition().unwrap();
        assert_eq!(disposition.to_string(), "inline; size=1315");
        assert!(!entity.is_loaded());
    }

    #[tokio::test]
    async fn test_nested_multipart_ids() {
        let structure = structure_of(
            b"* 1 FETCH (BODYSTRUCTURE (((\"TEXT\" \"PLAIN\" (\"CHARSET\" \"US-ASCII\") NIL NIL \"7BIT\" 10 1)(\"TEXT\" \"HTML\" (\"CHARSET\" \"US-ASCII\") NIL NIL \"7BIT\" 20 1) \"ALTERNATIVE\" (\"BOUNDARY\" \"alt\"))(\"IMAGE\" \"PNG\" (\"NAME\" \"a.png\") \"<img1>\" NIL \"BASE64\" 3000 NIL (\"ATTACHMENT\" (\"FILENAME\" \"a.png\")) NIL) \"MIXED\" (\"BOUNDARY\" \"mix\")))\r\n",
        )
        .await;
        let mut entity = Entity::default();
        entity.headers.set("Subject", "hello");
        apply_structure(&mut entity, &structure, ROOT_PART).unwrap();

        assert_eq!(entity.mime_type(), "multipart/mixed");
        assert_eq!(entity.content_type().boundary(), Some("mix"));
        assert_eq!(entity.subject(), Some("hello"));

        let alternative = &entity.parts()[0];
        assert_eq!(alternative.mime_type(), "multipart/alternative");
        let ids: Vec<_> = alternative
            .parts()
            .iter()
            .map(|p| p.header(STORE_DATA_HEADER).unwrap())
            .collect();
        assert_eq!(ids, vec!["1.1", "1.2"]);

        let image = &entity.parts()[1];
        assert_eq!(image.header(STORE_DATA_HEADER), Some("2"));
        assert_eq!(image.header("Content-ID"), Some("<img1>"));
        let disposition = image.disposition().unwrap();
        assert_eq!(disposition.filename(), Some("a.png"));
        assert_eq!(disposition.size(), Some(3000));
    }

    #[tokio::test]
    async fn test_embedded_message_is_unsupported() {
        let structure = structure_of(
            b"* 1 FETCH (BODYSTRUCTURE ((\"TEXT\" \"PLAIN\" NIL NIL NIL \"7BIT\" 5 1)(\"MESSAGE\" \"RFC822\" NIL NIL NIL \"7BIT\" 500 NIL (\"TEXT\" \"PLAIN\" NIL NIL NIL \"7BIT\" 5 1) 10) \"MIXED\"))\r\n",
        )
        .await;
        let mut entity = Entity::default();
        let err = apply_structure(&mut entity, &structure, ROOT_PART).unwrap_err();
        assert!(matches!(err, Error::UnsupportedContent(_)));
    }
}
