//! Streaming IMAP response parser.
//!
//! [`read_response`] reads exactly one response line (including any literals
//! embedded in it) from a [`PeekableReader`] and returns it as a generic
//! [`ImapResponse`] tree. Literals are offered to a [`LiteralHandler`] as
//! they arrive so large message bodies never have to be buffered whole.
//!
//! Nesting is tracked with an explicit stack of open lists rather than
//! recursion; the stack doubles as the [`PartialResponse`] view handed to
//! the literal handler.
//!
//! # Example
//!
//! ```
//! # tokio_test::block_on(async {
//! use carteggio_imap::connection::PeekableReader;
//! use carteggio_imap::parser::{NoLiterals, read_response};
//!
//! let mock = tokio_test::io::Builder::new()
//!     .read(b"* 3 FETCH (UID 17 FLAGS (\\Seen))\r\n")
//!     .build();
//! let mut reader = PeekableReader::new(mock);
//!
//! let response = read_response(&mut reader, &mut NoLiterals).await?;
//! let fetch = response.list(2).unwrap();
//! assert_eq!(fetch.keyed_number("UID"), Some(17));
//! # Ok::<(), carteggio_imap::Error>(())
//! # }).unwrap();
//! ```

mod value;

use std::future::Future;
use std::io;

use tokio::io::AsyncRead;

use crate::connection::{FixedLengthReader, PeekableReader};
use crate::error::{Error, Result};

pub use value::{ImapList, ImapResponse, ImapValue, Status};

/// Longest accepted literal length prefix.
const MAX_LITERAL_DIGITS: usize = 19;

/// The response read so far, as seen from inside a literal callback.
#[derive(Debug, Clone, Copy)]
pub struct PartialResponse<'a> {
    /// Tag of the response, `None` for untagged.
    pub tag: Option<&'a str>,
    /// Open lists, outermost first. `frames[0]` is the top level; the last
    /// frame is the list the literal will be appended to.
    pub frames: &'a [ImapList],
}

impl<'a> PartialResponse<'a> {
    /// Top-level items.
    #[must_use]
    pub fn root(&self) -> Option<&'a ImapList> {
        self.frames.first()
    }

    /// The list currently being filled.
    #[must_use]
    pub fn current(&self) -> Option<&'a ImapList> {
        self.frames.last()
    }

    /// The list enclosing the current one.
    #[must_use]
    pub fn parent(&self) -> Option<&'a ImapList> {
        self.frames
            .len()
            .checked_sub(2)
            .and_then(|i| self.frames.get(i))
    }
}

/// Receives literals as they are read.
pub trait LiteralHandler: Send {
    /// Called with the literal positioned at its first byte.
    ///
    /// Return `Ok(None)` without reading to let the parser store the bytes
    /// as [`ImapValue::Literal`]. Return `Ok(Some(value))` to have `value`
    /// stored instead; unread bytes are then skipped. An error is held
    /// until the rest of the line has been read and then returned from
    /// [`read_response`].
    fn on_literal(
        &mut self,
        response: &PartialResponse<'_>,
        literal: &mut FixedLengthReader<'_>,
    ) -> impl Future<Output = Result<Option<ImapValue>>> + Send;
}

/// Handler that keeps every literal in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLiterals;

impl LiteralHandler for NoLiterals {
    async fn on_literal(
        &mut self,
        _response: &PartialResponse<'_>,
        _literal: &mut FixedLengthReader<'_>,
    ) -> Result<Option<ImapValue>> {
        Ok(None)
    }
}

impl<L: LiteralHandler> LiteralHandler for &mut L {
    fn on_literal(
        &mut self,
        response: &PartialResponse<'_>,
        literal: &mut FixedLengthReader<'_>,
    ) -> impl Future<Output = Result<Option<ImapValue>>> + Send {
        (**self).on_literal(response, literal)
    }
}

const fn is_atom_delimiter(byte: u8) -> bool {
    matches!(byte, b' ' | b'(' | b')' | b'[' | b']' | b'"') || byte < 0x20 || byte == 0x7f
}

fn eof() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "connection closed",
    ))
}

/// Reads one response with literals kept in memory.
///
/// # Errors
///
/// See [`read_response`].
pub async fn read_plain<S>(reader: &mut PeekableReader<S>) -> Result<ImapResponse>
where
    S: AsyncRead + Unpin + Send,
{
    read_response(reader, &mut NoLiterals).await
}

/// Reads one complete response line.
///
/// The stream is always left at the start of the next line when this
/// returns, whether or not an error is reported, unless the error is an
/// I/O failure.
///
/// # Errors
///
/// - [`Error::Io`] if the stream fails, times out or closes.
/// - [`Error::Parse`] for malformed input.
/// - The handler's error, if a literal callback failed.
/// - [`Error::Protocol`] for a tagged response other than `OK`.
pub async fn read_response<S, L>(
    reader: &mut PeekableReader<S>,
    handler: &mut L,
) -> Result<ImapResponse>
where
    S: AsyncRead + Unpin + Send,
    L: LiteralHandler,
{
    let first = reader.peek().await?.ok_or_else(eof)?;
    let (tag, continuation) = match first {
        b'*' => {
            reader.next_byte().await?;
            (None, false)
        }
        b'+' => {
            reader.next_byte().await?;
            (None, true)
        }
        _ => (Some(read_tag(reader).await?), false),
    };

    let mut parser = LineParser {
        frames: vec![ImapList::new()],
        deferred: None,
        malformed: None,
        text_mode: continuation,
        code_allowed: continuation,
    };
    if !continuation && reader.peek().await? == Some(b' ') {
        reader.next_byte().await?;
    }
    parser.run(reader, handler, tag.as_deref()).await?;

    if let Some(err) = parser.deferred {
        return Err(err);
    }
    if let Some(reason) = parser.malformed {
        return Err(Error::Parse(reason));
    }

    let items = parser.frames.swap_remove(0);
    let response = ImapResponse::new(tag, continuation, items);
    if response.is_tagged() && !response.is_ok() {
        return Err(Error::Protocol {
            response: response.to_string(),
            alert: response.alert(),
        });
    }
    Ok(response)
}

async fn read_tag<S>(reader: &mut PeekableReader<S>) -> Result<String>
where
    S: AsyncRead + Unpin + Send,
{
    let mut tag = Vec::new();
    while let Some(byte) = reader.peek().await? {
        if byte == b' ' || byte == b'\r' || byte == b'\n' {
            break;
        }
        reader.next_byte().await?;
        tag.push(byte);
    }
    Ok(String::from_utf8_lossy(&tag).into_owned())
}

struct LineParser {
    frames: Vec<ImapList>,
    /// Literal handler failure, reported once the line is drained.
    deferred: Option<Error>,
    /// First grammar violation seen on the line.
    malformed: Option<String>,
    /// Reading resp-text after a status keyword.
    text_mode: bool,
    /// A `[code]` may still start.
    code_allowed: bool,
}

impl LineParser {
    fn current(&mut self) -> &mut ImapList {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    fn malformed(&mut self, reason: impl Into<String>) {
        if self.malformed.is_none() {
            self.malformed = Some(reason.into());
        }
    }

    async fn run<S, L>(
        &mut self,
        reader: &mut PeekableReader<S>,
        handler: &mut L,
        tag: Option<&str>,
    ) -> Result<()>
    where
        S: AsyncRead + Unpin + Send,
        L: LiteralHandler,
    {
        loop {
            if self.text_mode && self.frames.len() == 1 {
                while reader.peek().await? == Some(b' ') {
                    reader.next_byte().await?;
                }
                if self.code_allowed && reader.peek().await? == Some(b'[') {
                    reader.next_byte().await?;
                    self.code_allowed = false;
                    self.frames.push(ImapList::bracketed());
                    continue;
                }
                let text = read_line_rest(reader).await?;
                if !text.is_empty() {
                    self.current().push(ImapValue::Text(text));
                }
                return Ok(());
            }

            let byte = reader.peek().await?.ok_or_else(eof)?;
            match byte {
                b' ' => {
                    reader.next_byte().await?;
                }
                b'\r' | b'\n' => {
                    read_line_rest(reader).await?;
                    if self.frames.len() > 1 {
                        self.malformed("unterminated list");
                    }
                    return Ok(());
                }
                b'(' | b'[' => {
                    reader.next_byte().await?;
                    self.frames.push(if byte == b'(' {
                        ImapList::new()
                    } else {
                        ImapList::bracketed()
                    });
                }
                b')' | b']' => {
                    reader.next_byte().await?;
                    self.close_list(byte == b']');
                }
                b'"' => {
                    reader.next_byte().await?;
                    let value = self.read_quoted(reader).await?;
                    self.current().push(value);
                }
                b'{' => {
                    reader.next_byte().await?;
                    self.read_literal(reader, handler, tag).await?;
                }
                _ => {
                    let atom = read_atom(reader).await?;
                    if atom.is_empty() {
                        reader.next_byte().await?;
                        self.malformed(format!("unexpected byte 0x{byte:02x}"));
                        continue;
                    }
                    let value = if atom.eq_ignore_ascii_case("NIL") {
                        ImapValue::Nil
                    } else {
                        ImapValue::Atom(atom)
                    };
                    let enters_text = self.frames.len() == 1
                        && self.frames[0].is_empty()
                        && value.as_str().and_then(Status::parse).is_some();
                    self.current().push(value);
                    if enters_text {
                        self.text_mode = true;
                        self.code_allowed = true;
                    }
                }
            }
        }
    }

    fn close_list(&mut self, bracket: bool) {
        if self.frames.len() == 1 {
            self.malformed("unbalanced close");
            return;
        }
        let Some(list) = self.frames.pop() else {
            return;
        };
        if list.is_bracketed() != bracket {
            self.malformed("mismatched list delimiters");
        }
        self.current().push(ImapValue::List(list));
    }

    async fn read_quoted<S>(&mut self, reader: &mut PeekableReader<S>) -> Result<ImapValue>
    where
        S: AsyncRead + Unpin + Send,
    {
        let mut bytes = Vec::new();
        loop {
            match reader.peek().await?.ok_or_else(eof)? {
                b'"' => {
                    reader.next_byte().await?;
                    break;
                }
                b'\\' => {
                    reader.next_byte().await?;
                    bytes.push(reader.next_byte().await?);
                }
                b'\r' | b'\n' => {
                    // Leave the line end for the main loop.
                    self.malformed("unterminated quoted string");
                    break;
                }
                other => {
                    reader.next_byte().await?;
                    bytes.push(other);
                }
            }
        }
        Ok(ImapValue::Quoted(
            String::from_utf8(bytes)
                .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()),
        ))
    }

    async fn read_literal<S, L>(
        &mut self,
        reader: &mut PeekableReader<S>,
        handler: &mut L,
        tag: Option<&str>,
    ) -> Result<()>
    where
        S: AsyncRead + Unpin + Send,
        L: LiteralHandler,
    {
        let mut digits = String::new();
        loop {
            match reader.next_byte().await? {
                b'}' => break,
                b'+' => {}
                d if d.is_ascii_digit() && digits.len() < MAX_LITERAL_DIGITS => {
                    digits.push(char::from(d));
                }
                _ => {
                    return Err(Error::Parse(format!("invalid literal length {{{digits}")));
                }
            }
        }
        let length: u64 = digits
            .parse()
            .map_err(|_| Error::Parse(format!("invalid literal length {{{digits}}}")))?;
        if reader.next_byte().await? != b'\r' || reader.next_byte().await? != b'\n' {
            return Err(Error::Parse("literal length not followed by CRLF".into()));
        }

        if self.deferred.is_some() {
            reader.fixed_length(length).skip_remaining().await?;
            self.current().push(ImapValue::Handled(length));
            return Ok(());
        }

        let partial = PartialResponse {
            tag,
            frames: &self.frames,
        };
        let mut literal = reader.fixed_length(length);
        let value = match handler.on_literal(&partial, &mut literal).await {
            Ok(None) => ImapValue::Literal(literal.read_to_vec().await?),
            Ok(Some(value)) => {
                literal.skip_remaining().await?;
                value
            }
            Err(err) => {
                // A handler that hit an I/O error may have left the literal
                // half-read; skipping still realigns the stream.
                literal.skip_remaining().await?;
                self.deferred = Some(err);
                ImapValue::Handled(length)
            }
        };
        self.current().push(value);
        Ok(())
    }
}

async fn read_atom<S>(reader: &mut PeekableReader<S>) -> Result<String>
where
    S: AsyncRead + Unpin + Send,
{
    let mut bytes = Vec::new();
    while let Some(byte) = reader.peek().await? {
        if is_atom_delimiter(byte) {
            break;
        }
        reader.next_byte().await?;
        bytes.push(byte);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Reads to the end of the line, returning the text without CRLF.
async fn read_line_rest<S>(reader: &mut PeekableReader<S>) -> Result<String>
where
    S: AsyncRead + Unpin + Send,
{
    let mut bytes = Vec::new();
    loop {
        let byte = reader.next_byte().await?;
        if byte == b'\n' {
            break;
        }
        bytes.push(byte);
    }
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
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
    use tokio::io::AsyncReadExt;
    use tokio_test::io::Builder;

    async fn parse_all(input: &[u8]) -> Vec<Result<ImapResponse>> {
        let mock = Builder::new().read(input).build();
        let mut reader = PeekableReader::new(mock);
        let mut out = Vec::new();
        while reader.peek().await.unwrap().is_some() {
            out.push(read_plain(&mut reader).await);
        }
        out
    }

    async fn parse_one(input: &[u8]) -> ImapResponse {
        parse_all(input).await.remove(0).unwrap()
    }

    #[tokio::test]
    async fn test_untagged_exists() {
        let response = parse_one(b"* 23 EXISTS\r\n").await;
        assert!(response.is_untagged());
        assert_eq!(response.number(0), Some(23));
        assert!(response.atom_is(1, "exists"));
    }

    #[tokio::test]
    async fn test_status_with_code_and_text() {
        let response = parse_one(b"* OK [UIDVALIDITY 3857529045] UIDs valid\r\n").await;
        assert!(response.is_ok());
        let code = response.response_code().unwrap();
        assert_eq!(code.keyed_number("UIDVALIDITY"), Some(3857529045));
        assert_eq!(response.text(), Some("UIDs valid"));
    }

    #[tokio::test]
    async fn test_text_is_not_tokenized() {
        let response = parse_one(b"* OK Dovecot (Ubuntu) ready [really]\r\n").await;
        assert_eq!(response.len(), 2);
        assert_eq!(response.text(), Some("Dovecot (Ubuntu) ready [really]"));
    }

    #[tokio::test]
    async fn test_tagged_ok_without_text() {
        let response = parse_one(b"A1 OK\r\n").await;
        assert_eq!(response.tag(), Some("A1"));
        assert!(response.text().is_none());
    }

    #[tokio::test]
    async fn test_tagged_no_is_protocol_error() {
        let mut results = parse_all(b"A4 NO [ALERT] Mailbox is full\r\n* 1 EXISTS\r\n").await;
        match results.remove(0) {
            Err(Error::Protocol { response, alert }) => {
                assert_eq!(response, "A4 NO [ALERT] Mailbox is full");
                assert_eq!(alert.as_deref(), Some("Mailbox is full"));
            }
            other => panic!("unexpected {other:?}"),
        }
        // The stream is positioned on the following line.
        assert_eq!(results.remove(0).unwrap().number(0), Some(1));
    }

    #[tokio::test]
    async fn test_continuation() {
        let response = parse_one(b"+ idling\r\n").await;
        assert!(response.is_continuation());
        assert_eq!(response.text(), Some("idling"));

        let bare = parse_one(b"+\r\n").await;
        assert!(bare.is_continuation());
        assert!(bare.is_empty());
    }

    #[tokio::test]
    async fn test_list_response_atoms() {
        let response = parse_one(b"* LIST (\\HasNoChildren \\Trash) \"/\" \"Deleted Items\"\r\n").await;
        let attributes = response.list(1).unwrap();
        assert!(attributes.atom_is(1, "\\Trash"));
        assert_eq!(response.string(2).as_deref(), Some("/"));
        assert_eq!(response.string(3).as_deref(), Some("Deleted Items"));
    }

    #[tokio::test]
    async fn test_nil_and_quoted_escapes() {
        let response = parse_one(b"* LIST () NIL \"a\\\"b\"\r\n").await;
        assert!(response.get(2).unwrap().is_nil());
        assert_eq!(response.string(3).as_deref(), Some("a\"b"));
    }

    #[tokio::test]
    async fn test_fetch_with_section_and_literal() {
        let response = parse_one(
            b"* 12 FETCH (UID 7 BODY[HEADER.FIELDS (SUBJECT)] {15}\r\nSubject: hi\r\n\r\n FLAGS (\\Seen))\r\n",
        )
        .await;
        let fetch = response.list(2).unwrap();
        assert_eq!(fetch.keyed_number("UID"), Some(7));
        let section = fetch.keyed_list("BODY").unwrap();
        assert!(section.is_bracketed());
        assert!(section.atom_is(0, "HEADER.FIELDS"));
        assert_eq!(fetch.get(4).unwrap().as_str(), Some("Subject: hi\r\n\r\n"));
        assert!(fetch.keyed_list("FLAGS").unwrap().atom_is(0, "\\seen"));
    }

    #[tokio::test]
    async fn test_partial_fetch_origin_is_atom() {
        let response = parse_one(b"* 1 FETCH (BODY[]<0> {3}\r\nabc)\r\n").await;
        let fetch = response.list(2).unwrap();
        assert!(fetch.list(1).unwrap().is_empty());
        assert!(fetch.atom_is(2, "<0>"));
        assert_eq!(fetch.get(3), Some(&ImapValue::Literal(b"abc".to_vec())));
    }

    #[tokio::test]
    async fn test_permanent_flags_wildcard() {
        let response = parse_one(b"* OK [PERMANENTFLAGS (\\Deleted \\Seen \\*)] Limited\r\n").await;
        let flags = response.response_code().unwrap().keyed_list("PERMANENTFLAGS").unwrap();
        assert_eq!(flags.len(), 3);
        assert!(flags.atom_is(2, "\\*"));
    }

    #[tokio::test]
    async fn test_unbalanced_list_is_parse_error_and_drains() {
        let mut results = parse_all(b"* 1 FETCH (UID 4\r\n* 2 EXISTS\r\n").await;
        assert!(matches!(results.remove(0), Err(Error::Parse(_))));
        assert_eq!(results.remove(0).unwrap().number(0), Some(2));
    }

    #[tokio::test]
    async fn test_truncated_stream() {
        let mock = Builder::new().read(b"* 1 FETCH (BODY[] {10}\r\nabc").build();
        let mut reader = PeekableReader::new(mock);
        assert!(matches!(read_plain(&mut reader).await, Err(Error::Io(_))));
    }

    struct Capture {
        seen_uid: Option<i64>,
        data: Vec<u8>,
    }

    impl LiteralHandler for Capture {
        async fn on_literal(
            &mut self,
            response: &PartialResponse<'_>,
            literal: &mut FixedLengthReader<'_>,
        ) -> Result<Option<ImapValue>> {
            self.seen_uid = response.current().and_then(|l| l.keyed_number("UID"));
            let mut head = vec![0u8; 4];
            literal.read_exact(&mut head).await?;
            self.data = head;
            Ok(Some(ImapValue::Handled(literal.len())))
        }
    }

    #[tokio::test]
    async fn test_handler_sees_partial_response_and_rest_is_skipped() {
        let mock = Builder::new()
            .read(b"* 5 FETCH (UID 99 BODY[] {11}\r\nhello world)\r\n* 6 EXISTS\r\n")
            .build();
        let mut reader = PeekableReader::new(mock);
        let mut handler = Capture {
            seen_uid: None,
            data: Vec::new(),
        };

        let response = read_response(&mut reader, &mut handler).await.unwrap();
        assert_eq!(handler.seen_uid, Some(99));
        assert_eq!(handler.data, b"hell");
        assert_eq!(response.list(2).unwrap().get(4), Some(&ImapValue::Handled(11)));

        let next = read_plain(&mut reader).await.unwrap();
        assert_eq!(next.number(0), Some(6));
    }

    struct Failing;

    impl LiteralHandler for Failing {
        async fn on_literal(
            &mut self,
            _response: &PartialResponse<'_>,
            _literal: &mut FixedLengthReader<'_>,
        ) -> Result<Option<ImapValue>> {
            Err(Error::Callback("disk full".into()))
        }
    }

    #[tokio::test]
    async fn test_handler_error_deferred_until_line_end() {
        let mock = Builder::new()
            .read(b"* 1 FETCH (BODY[1] {3}\r\nabc BODY[2] {2}\r\nde)\r\n* 2 EXISTS\r\n")
            .build();
        let mut reader = PeekableReader::new(mock);

        let err = read_response(&mut reader, &mut Failing).await.unwrap_err();
        assert!(matches!(err, Error::Callback(ref m) if m == "disk full"));
        assert_eq!(read_plain(&mut reader).await.unwrap().number(0), Some(2));
    }

    struct Skim(usize);

    impl LiteralHandler for Skim {
        async fn on_literal(
            &mut self,
            _response: &PartialResponse<'_>,
            literal: &mut FixedLengthReader<'_>,
        ) -> Result<Option<ImapValue>> {
            let mut head = vec![0u8; self.0.min(literal.remaining() as usize)];
            literal.read_exact(&mut head).await?;
            Ok(Some(ImapValue::Handled(literal.len())))
        }
    }

    fn quote(text: &str) -> String {
        format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
    }

    proptest::proptest! {
        #[test]
        fn prop_quoted_strings_unescape(text in "[ -~]{0,40}") {
            let line = format!("* LIST () \"/\" {}\r\n", quote(&text));
            let response = tokio_test::block_on(parse_one(line.as_bytes()));
            proptest::prop_assert_eq!(response.string(3), Some(text));
        }

        #[test]
        fn prop_literal_framing_survives_short_reads(
            body in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..200),
            read in 0usize..200,
        ) {
            let mut input = format!("* 1 FETCH (BODY[] {{{}}}\r\n", body.len()).into_bytes();
            input.extend_from_slice(&body);
            input.extend_from_slice(b")\r\nA0001 OK done\r\n");

            let (first, second) = tokio_test::block_on(async {
                let mock = Builder::new().read(&input).build();
                let mut reader = PeekableReader::new(mock);
                let first = read_response(&mut reader, &mut Skim(read)).await.unwrap();
                let second = read_plain(&mut reader).await.unwrap();
                (first, second)
            });
            proptest::prop_assert_eq!(
                first.list(2).unwrap().get(2),
                Some(&ImapValue::Handled(body.len() as u64))
            );
            proptest::prop_assert_eq!(second.tag(), Some("A0001"));
        }
    }
}
