//! Command tags.

/// Hands out `A0001`, `A0002`, ... for one connection.
///
/// Tags widen past four digits rather than wrap, so a tag is never reused
/// while the connection lives.
#[derive(Debug, Clone)]
pub struct TagGenerator {
    prefix: char,
    issued: u64,
}

impl TagGenerator {
    /// Tags starting with `prefix`.
    #[must_use]
    pub const fn new(prefix: char) -> Self {
        Self { prefix, issued: 0 }
    }

    /// A tag not handed out before.
    #[must_use]
    pub fn next(&mut self) -> String {
        self.issued += 1;
        format!("{}{:04}", self.prefix, self.issued)
    }

    /// How many tags this generator has produced.
    #[must_use]
    pub const fn issued(&self) -> u64 {
        self.issued
    }
}

impl Default for TagGenerator {
    fn default() -> Self {
        Self::new('A')
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

    #[test]
    fn test_first_tag_is_one() {
        let mut tags = TagGenerator::default();
        assert_eq!(tags.issued(), 0);
        assert_eq!(tags.next(), "A0001");
        assert_eq!(tags.next(), "A0002");
        assert_eq!(tags.issued(), 2);
    }

    #[test]
    fn test_widens_after_9999() {
        let mut tags = TagGenerator::new('C');
        let last = (0..10_000).map(|_| tags.next()).last().unwrap();
        assert_eq!(last, "C10000");
    }
}
