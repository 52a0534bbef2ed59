//! Content-Transfer-Encoding and header encoded-word codecs.

use std::fmt::Write as _;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Error, Result};

/// Longest encoded line, excluding the CRLF.
const LINE_LIMIT: usize = 76;

/// Quoted-printable text with CRLF hard breaks.
///
/// Input line breaks, `\n` or `\r\n`, become CRLF. Trailing whitespace on a
/// line is escaped so transports cannot strip it, and long lines are folded
/// with soft breaks.
#[must_use]
pub fn encode_quoted_printable(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    for (n, line) in text.split('\n').enumerate() {
        if n > 0 {
            out.push_str("\r\n");
        }
        let line = line.trim_end_matches('\r').as_bytes();
        let mut column = 0;
        for (i, &byte) in line.iter().enumerate() {
            let literal = match byte {
                b'=' => false,
                b' ' | b'\t' => i + 1 < line.len(),
                _ => byte.is_ascii_graphic(),
            };
            let width = if literal { 1 } else { 3 };
            // Leave room for the `=` of a soft break.
            if column + width >= LINE_LIMIT {
                out.push_str("=\r\n");
                column = 0;
            }
            if literal {
                out.push(char::from(byte));
            } else {
                let _ = write!(out, "={byte:02X}");
            }
            column += width;
        }
    }
    out
}

fn hex_value(digit: u8) -> Option<u8> {
    char::from(digit).to_digit(16).and_then(|v| u8::try_from(v).ok())
}

/// Reverses quoted-printable, dropping soft line breaks.
///
/// # Errors
///
/// [`Error::InvalidEncoding`] for an `=` followed by anything other than
/// two hex digits or a line break.
pub fn decode_quoted_printable_bytes(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut rest = data;
    while let Some((&byte, tail)) = rest.split_first() {
        if byte != b'=' {
            out.push(byte);
            rest = tail;
            continue;
        }
        rest = match tail {
            [b'\r', b'\n', after @ ..] | [b'\n', after @ ..] => after,
            [high, low, after @ ..] => {
                let (Some(high), Some(low)) = (hex_value(*high), hex_value(*low)) else {
                    return Err(Error::InvalidEncoding(format!(
                        "bad escape ={}{}",
                        char::from(*high),
                        char::from(*low)
                    )));
                };
                out.push((high << 4) | low);
                after
            }
            _ => return Err(Error::InvalidEncoding("truncated escape".into())),
        };
    }
    Ok(out)
}

/// Base64 as found in message bodies: line breaks and stray whitespace are
/// ignored.
///
/// # Errors
///
/// [`Error::Base64Decode`] if what remains is not base64.
pub fn decode_base64_lenient(data: &[u8]) -> Result<Vec<u8>> {
    let compact: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    Ok(STANDARD.decode(compact)?)
}

fn needs_encoding(word: &str) -> bool {
    word.contains("=?") || word.bytes().any(|b| !(b.is_ascii_graphic() || b == b' '))
}

/// Header text with non-ASCII words turned into `=?charset?B?...?=`
/// encoded words. Runs of such words share one encoded word so the spaces
/// between them survive decoding.
///
/// # Errors
///
/// Currently infallible; kept fallible for charsets that cannot represent
/// the text.
pub fn encode_rfc2047(text: &str, charset: &str) -> Result<String> {
    if !needs_encoding(text) {
        return Ok(text.to_owned());
    }
    let mut out: Vec<String> = Vec::new();
    let mut run: Vec<&str> = Vec::new();
    let flush = |run: &mut Vec<&str>, out: &mut Vec<String>| {
        if !run.is_empty() {
            let joined = run.join(" ");
            out.push(format!("=?{charset}?B?{}?=", STANDARD.encode(joined)));
            run.clear();
        }
    };
    for word in text.split(' ') {
        if needs_encoding(word) {
            run.push(word);
        } else {
            flush(&mut run, &mut out);
            out.push(word.to_owned());
        }
    }
    flush(&mut run, &mut out);
    Ok(out.join(" "))
}

/// Bytes of an encoded word in `charset`. UTF-8 and US-ASCII must be valid;
/// anything else is read as Latin-1.
fn charset_to_string(charset: &str, bytes: Vec<u8>) -> Result<String> {
    let charset = charset.split('*').next().unwrap_or(charset);
    if charset.eq_ignore_ascii_case("utf-8") || charset.eq_ignore_ascii_case("us-ascii") {
        Ok(String::from_utf8(bytes)?)
    } else {
        Ok(bytes.into_iter().map(char::from).collect())
    }
}

/// Decodes one `charset?encoding?text` triple.
fn decode_word(inner: &str) -> Result<String> {
    let mut parts = inner.splitn(3, '?');
    let (Some(charset), Some(encoding), Some(payload)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::InvalidEncoding(format!("malformed encoded word {inner}")));
    };
    let bytes = match encoding {
        "B" | "b" => STANDARD.decode(payload)?,
        "Q" | "q" => decode_quoted_printable_bytes(payload.replace('_', " ").as_bytes())?,
        other => return Err(Error::InvalidEncoding(format!("unknown word encoding {other}"))),
    };
    charset_to_string(charset, bytes)
}

/// Replaces every encoded word in `text` with its decoded form.
///
/// Whitespace between two adjacent encoded words is dropped; all other text
/// is kept as is.
///
/// # Errors
///
/// [`Error::InvalidEncoding`] for a malformed word and the decode errors of
/// its payload.
pub fn decode_rfc2047(text: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut after_word = false;
    while let Some(start) = rest.find("=?") {
        let body = &rest[start + 2..];
        // charset?enc?payload?= has exactly three `?` before the `=`.
        let Some(end) = body
            .match_indices("?=")
            .map(|(i, _)| i)
            .find(|&i| body[..i].matches('?').count() == 2)
        else {
            break;
        };
        let gap = &rest[..start];
        if !(after_word && gap.chars().all(char::is_whitespace)) {
            out.push_str(gap);
        }
        out.push_str(&decode_word(&body[..end])?);
        rest = &body[end + 2..];
        after_word = true;
    }
    out.push_str(rest);
    Ok(out)
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

    fn qp_text(encoded: &str) -> String {
        String::from_utf8(decode_quoted_printable_bytes(encoded.as_bytes()).unwrap()).unwrap()
    }

    #[test]
    fn test_quoted_printable_escapes_non_ascii() {
        assert_eq!(encode_quoted_printable("Hello, World!"), "Hello, World!");
        assert_eq!(encode_quoted_printable("Héllo"), "H=C3=A9llo");
        assert_eq!(encode_quoted_printable("a=b"), "a=3Db");
        assert_eq!(qp_text("H=c3=a9llo"), "Héllo");
    }

    #[test]
    fn test_quoted_printable_hard_breaks() {
        let encoded = encode_quoted_printable("one \ntwo\r\nthree");
        assert_eq!(encoded, "one=20\r\ntwo\r\nthree");
    }

    #[test]
    fn test_quoted_printable_folds_long_lines() {
        let text = "é".repeat(60);
        let encoded = encode_quoted_printable(&text);
        assert!(encoded.split("\r\n").all(|line| line.len() <= LINE_LIMIT));
        assert_eq!(qp_text(&encoded), text);
        assert_eq!(qp_text("Hello=\r\nWorld=\nagain"), "HelloWorldagain");
    }

    #[test]
    fn test_quoted_printable_rejects_bad_escapes() {
        assert_eq!(
            decode_quoted_printable_bytes(b"=FF=00ok").unwrap(),
            vec![0xFF, 0x00, b'o', b'k']
        );
        assert!(decode_quoted_printable_bytes(b"bad=4").is_err());
        assert!(decode_quoted_printable_bytes(b"bad=zz").is_err());
    }

    #[test]
    fn test_base64_ignores_line_breaks() {
        let decoded = decode_base64_lenient(b"SGVs\r\nbG8s\r\n IFdvcmxkIQ==\r\n").unwrap();
        assert_eq!(decoded, b"Hello, World!");
        assert!(decode_base64_lenient(b"!!!").is_err());
    }

    #[test]
    fn test_encoded_words_only_where_needed() {
        assert_eq!(encode_rfc2047("Hello", "utf-8").unwrap(), "Hello");
        assert_eq!(
            encode_rfc2047("Zoë <zoe@example.com>", "utf-8").unwrap(),
            "=?utf-8?B?Wm/Dqw==?= <zoe@example.com>"
        );
        let both = encode_rfc2047("Héllo Wørld", "utf-8").unwrap();
        assert_eq!(both.matches("=?utf-8?B?").count(), 1);
        assert_eq!(decode_rfc2047(&both).unwrap(), "Héllo Wørld");
    }

    #[test]
    fn test_decode_words_inside_text() {
        assert_eq!(decode_rfc2047("Hello").unwrap(), "Hello");
        assert_eq!(decode_rfc2047("=?utf-8?B?SMOpbGxv?=").unwrap(), "Héllo");
        assert_eq!(
            decode_rfc2047("Re: =?UTF-8?Q?H=C3=A9llo_there?= (fwd)").unwrap(),
            "Re: Héllo there (fwd)"
        );
        assert_eq!(
            decode_rfc2047("=?utf-8?Q?a?= =?utf-8?Q?b?=").unwrap(),
            "ab"
        );
        assert_eq!(decode_rfc2047("=?iso-8859-1?Q?caf=E9?=").unwrap(), "café");
        assert_eq!(decode_rfc2047("a =? b").unwrap(), "a =? b");
        assert!(decode_rfc2047("=?utf-8?X?abc?=").is_err());
    }
}
