//! DATA transparency (RFC 5321 §4.5.2).

use carteggio_mime::CrlfFilter;

/// Doubles a `.` at the start of every line so no line of the message can
/// end the DATA phase early.
///
/// Input must already use CRLF line endings; [`DataEncoder`] chains this
/// after a [`CrlfFilter`]. Works across arbitrary chunk boundaries.
#[derive(Debug, Clone, Copy)]
pub struct DotStuffer {
    at_line_start: bool,
}

impl Default for DotStuffer {
    fn default() -> Self {
        Self {
            at_line_start: true,
        }
    }
}

impl DotStuffer {
    /// Creates a stuffer positioned at the start of a line.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the stuffed form of `input` to `out`.
    pub fn stuff(&mut self, input: &[u8], out: &mut Vec<u8>) {
        out.reserve(input.len());
        for &byte in input {
            if self.at_line_start && byte == b'.' {
                out.push(b'.');
            }
            out.push(byte);
            self.at_line_start = byte == b'\n';
        }
    }

    /// Appends the end-of-data marker, closing an unterminated last line
    /// first.
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        if !self.at_line_start {
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b".\r\n");
        self.at_line_start = true;
    }
}

/// Line-ending normalization followed by dot-stuffing.
#[derive(Debug, Default)]
pub struct DataEncoder {
    crlf: CrlfFilter,
    dots: DotStuffer,
    scratch: Vec<u8>,
}

impl DataEncoder {
    /// Creates an encoder at the start of a message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes one chunk of the message into `out`.
    pub fn encode(&mut self, chunk: &[u8], out: &mut Vec<u8>) {
        self.scratch.clear();
        self.crlf.filter(chunk, &mut self.scratch);
        self.dots.stuff(&self.scratch, out);
    }

    /// Flushes pending state and appends `CRLF.CRLF`.
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        self.scratch.clear();
        self.crlf.finish(&mut self.scratch);
        self.dots.stuff(&self.scratch, out);
        self.dots.finish(out);
    }

    /// Encodes a whole message in one go.
    #[must_use]
    pub fn encode_all(message: &[u8]) -> Vec<u8> {
        let mut encoder = Self::new();
        let mut out = Vec::with_capacity(message.len() + 16);
        encoder.encode(message, &mut out);
        encoder.finish(&mut out);
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_leading_dots_are_doubled() {
        let out = DataEncoder::encode_all(b".hidden\r\nok\r\n..two\r\n");
        assert_eq!(out, b"..hidden\r\nok\r\n...two\r\n.\r\n");
    }

    #[test]
    fn test_bare_newlines_and_missing_final_newline() {
        let out = DataEncoder::encode_all(b"a\n.\nb");
        assert_eq!(out, b"a\r\n..\r\nb\r\n.\r\n");
    }

    #[test]
    fn test_empty_message() {
        assert_eq!(DataEncoder::encode_all(b""), b".\r\n");
    }

    #[test]
    fn test_dot_after_split_crlf() {
        let mut encoder = DataEncoder::new();
        let mut out = Vec::new();
        encoder.encode(b"x\r", &mut out);
        encoder.encode(b"\n.y", &mut out);
        encoder.finish(&mut out);
        assert_eq!(out, b"x\r\n..y\r\n.\r\n");
    }

    proptest! {
        #[test]
        fn prop_chunking_does_not_change_output(
            message in proptest::collection::vec(prop_oneof![Just(b'.'), Just(b'\r'), Just(b'\n'), Just(b'a')], 0..64),
            split in 0usize..64,
        ) {
            let split = split.min(message.len());
            let mut encoder = DataEncoder::new();
            let mut out = Vec::new();
            encoder.encode(&message[..split], &mut out);
            encoder.encode(&message[split..], &mut out);
            encoder.finish(&mut out);
            prop_assert_eq!(out, DataEncoder::encode_all(&message));
        }

        #[test]
        fn prop_no_line_is_a_lone_dot(
            message in proptest::collection::vec(prop_oneof![Just(b'.'), Just(b'\n'), Just(b'x')], 0..64),
        ) {
            let out = DataEncoder::encode_all(&message);
            let body = &out[..out.len() - 3];
            prop_assert!(!body.windows(5).any(|w| w == b"\r\n.\r\n"));
            prop_assert!(!body.starts_with(b".\r\n"));
        }
    }
}
