//! SMTP reply parser.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{Error, Result};
use crate::types::{Reply, ReplyCode};

/// Longest reply line accepted; RFC 5321 allows 512 octets.
const MAX_LINE: usize = 4096;

/// Parses an SMTP reply from response lines without their CRLF.
///
/// SMTP replies can be single-line or multi-line:
/// - Single: `250 OK`
/// - Multi: `250-First line`, `250-Second line`, `250 Last line`
///
/// Every line must carry the same code.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the reply is malformed.
pub fn parse_reply(lines: &[String]) -> Result<Reply> {
    let Some(first) = lines.first() else {
        return Err(Error::Protocol("Empty reply".into()));
    };
    let code = reply_code(first)?;

    let mut message = Vec::with_capacity(lines.len());
    for line in lines {
        if reply_code(line)? != code {
            return Err(Error::Protocol(format!(
                "Reply code changed mid-reply: {line}"
            )));
        }
        message.push(line.get(4..).unwrap_or_default().to_string());
    }

    Ok(Reply::new(ReplyCode::new(code), message))
}

fn reply_code(line: &str) -> Result<u16> {
    let digits = line
        .get(..3)
        .filter(|d| d.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| Error::Protocol(format!("Malformed reply line: {line}")))?;
    match line.as_bytes().get(3) {
        None | Some(b' ' | b'-') => digits
            .parse()
            .map_err(|_| Error::Protocol(format!("Invalid reply code: {digits}"))),
        Some(_) => Err(Error::Protocol(format!("Malformed reply line: {line}"))),
    }
}

/// Checks if a line is the last line of a multi-line reply.
///
/// Continuation lines have `-` after the code; the last has a space or
/// nothing.
#[must_use]
pub fn is_last_reply_line(line: &str) -> bool {
    line.as_bytes().get(3) != Some(&b'-')
}

/// Reads one complete reply, each line within `timeout`.
///
/// # Errors
///
/// [`Error::Timeout`], [`Error::Io`] (`UnexpectedEof` when the server
/// hangs up mid-reply) or [`Error::Protocol`].
pub async fn read_reply<R>(reader: &mut R, timeout: Duration) -> Result<Reply>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = Vec::new();
    loop {
        let mut raw = Vec::new();
        let read = tokio::time::timeout(timeout, reader.read_until(b'\n', &mut raw))
            .await
            .map_err(|_| Error::Timeout(timeout))??;
        if read == 0 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            )));
        }
        if raw.len() > MAX_LINE {
            return Err(Error::Protocol(format!("Reply line of {} bytes", raw.len())));
        }
        let line = String::from_utf8_lossy(&raw).trim_end().to_string();
        if line.is_empty() {
            continue;
        }
        let last = is_last_reply_line(&line);
        lines.push(line);
        if last {
            break;
        }
    }
    parse_reply(&lines)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use tokio::io::BufReader;
    use tokio_test::io::Builder;

    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_parse_single_line_reply() {
        let reply = parse_reply(&lines(&["250 OK"])).unwrap();
        assert_eq!(reply.code.as_u16(), 250);
        assert_eq!(reply.message, vec!["OK"]);
    }

    #[test]
    fn test_parse_multi_line_reply() {
        let reply =
            parse_reply(&lines(&["250-First line", "250-Second line", "250 Last line"])).unwrap();
        assert_eq!(reply.message, vec!["First line", "Second line", "Last line"]);
    }

    #[test]
    fn test_parse_code_only_line() {
        let reply = parse_reply(&lines(&["250"])).unwrap();
        assert_eq!(reply.message, vec![""]);
        assert!(is_last_reply_line("250"));
    }

    #[test]
    fn test_is_last_reply_line() {
        assert!(is_last_reply_line("250 OK"));
        assert!(!is_last_reply_line("250-Continuing"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_reply(&[]).is_err());
        assert!(parse_reply(&lines(&["25"])).is_err());
        assert!(parse_reply(&lines(&["ABC OK"])).is_err());
        assert!(parse_reply(&lines(&["250xOK"])).is_err());
        assert!(parse_reply(&lines(&["250-a", "251 b"])).is_err());
    }

    #[tokio::test]
    async fn test_read_reply_across_reads() {
        let mock = Builder::new()
            .read(b"250-smtp.example.com\r\n250-SIZE 10")
            .read(b"00\r\n250 8BITMIME\r\n")
            .build();
        let mut reader = BufReader::new(mock);
        let reply = read_reply(&mut reader, Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply.message, vec!["smtp.example.com", "SIZE 1000", "8BITMIME"]);
    }

    #[tokio::test]
    async fn test_read_reply_eof() {
        let mock = Builder::new().read(b"250-partial\r\n").build();
        let mut reader = BufReader::new(mock);
        let err = read_reply(&mut reader, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_reply_timeout() {
        let mock = Builder::new().wait(Duration::from_secs(10)).build();
        let mut reader = BufReader::new(mock);
        let err = read_reply(&mut reader, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
