//! Line-ending normalization.

/// Stateful CRLF normalizer.
///
/// Inserts `\r` before every bare `\n` and `\n` after every bare `\r`.
/// Input may arrive in arbitrary chunks: a `\r` at the end of one chunk is
/// only completed once the next byte (or [`CrlfFilter::finish`]) shows
/// whether it was already followed by `\n`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrlfFilter {
    last: Option<u8>,
}

impl CrlfFilter {
    /// Creates a filter with no lookback state.
    #[must_use]
    pub const fn new() -> Self {
        Self { last: None }
    }

    /// Appends the normalized form of `input` to `out`.
    pub fn filter(&mut self, input: &[u8], out: &mut Vec<u8>) {
        out.reserve(input.len() + input.len() / 32);
        for &byte in input {
            if byte == b'\n' {
                if self.last != Some(b'\r') {
                    out.push(b'\r');
                }
            } else if self.last == Some(b'\r') {
                out.push(b'\n');
            }
            out.push(byte);
            self.last = Some(byte);
        }
    }

    /// Completes a trailing bare `\r`.
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        if self.last == Some(b'\r') {
            out.push(b'\n');
            self.last = Some(b'\n');
        }
    }

    /// Normalizes a complete buffer in one call.
    #[must_use]
    pub fn convert(input: &[u8]) -> Vec<u8> {
        let mut filter = Self::new();
        let mut out = Vec::with_capacity(input.len());
        filter.filter(input, &mut out);
        filter.finish(&mut out);
        out
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
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bare_lf_and_cr() {
        assert_eq!(CrlfFilter::convert(b"a\nb\rc\r\nd"), b"a\r\nb\r\nc\r\nd");
    }

    #[test]
    fn test_trailing_cr_deferred() {
        let mut filter = CrlfFilter::new();
        let mut out = Vec::new();
        filter.filter(b"line\r", &mut out);
        assert_eq!(out, b"line\r");
        filter.filter(b"\nnext", &mut out);
        assert_eq!(out, b"line\r\nnext");
        filter.finish(&mut out);
        assert_eq!(out, b"line\r\nnext");
    }

    #[test]
    fn test_finish_completes_cr() {
        let mut filter = CrlfFilter::new();
        let mut out = Vec::new();
        filter.filter(b"x\r", &mut out);
        filter.finish(&mut out);
        assert_eq!(out, b"x\r\n");
    }

    proptest! {
        #[test]
        fn chunking_does_not_change_output(
            data in proptest::collection::vec(prop_oneof![Just(b'\r'), Just(b'\n'), Just(b'a')], 0..64),
            split in 0usize..64,
        ) {
            let split = split.min(data.len());
            let mut filter = CrlfFilter::new();
            let mut out = Vec::new();
            filter.filter(&data[..split], &mut out);
            filter.filter(&data[split..], &mut out);
            filter.finish(&mut out);
            prop_assert_eq!(&out, &CrlfFilter::convert(&data));

            // Every LF is preceded by CR and every CR followed by LF.
            for (i, b) in out.iter().enumerate() {
                if *b == b'\n' {
                    prop_assert!(i > 0 && out[i - 1] == b'\r');
                }
                if *b == b'\r' {
                    prop_assert!(out.get(i + 1) == Some(&b'\n'));
                }
            }
        }
    }
}
