//! UID sets.

use super::Uid;

/// A set of UIDs in IMAP `sequence-set` syntax, e.g. `304,319:320`.
///
/// Ranges keep the order in which they were given; [`UidSet::expand`]
/// yields UIDs in that order, which UIDPLUS relies on when pairing source
/// and destination sets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UidSet {
    ranges: Vec<(u32, u32)>,
}

impl UidSet {
    /// Builds a compact set from UIDs, merging consecutive runs.
    ///
    /// Input order is kept; only adjacent ascending neighbours are merged.
    #[must_use]
    pub fn from_uids(uids: &[Uid]) -> Self {
        let mut ranges: Vec<(u32, u32)> = Vec::new();
        for uid in uids {
            let value = uid.get();
            match ranges.last_mut() {
                Some((_, end)) if end.checked_add(1) == Some(value) => *end = value,
                _ => ranges.push((value, value)),
            }
        }
        Self { ranges }
    }

    /// Parses `a,b:c,...`. Returns `None` on malformed input or `*`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let mut ranges = Vec::new();
        for part in s.split(',') {
            let (start, end) = match part.split_once(':') {
                Some((start, end)) => (start.parse().ok()?, end.parse().ok()?),
                None => {
                    let value = part.parse().ok()?;
                    (value, value)
                }
            };
            if start == 0 || end == 0 {
                return None;
            }
            ranges.push((start, end));
        }
        Some(Self { ranges })
    }

    /// UIDs in set order, produced lazily.
    ///
    /// A range written high-to-low (`5:3`) runs descending, as RFC 4315
    /// pairs positions rather than values.
    pub fn iter(&self) -> impl Iterator<Item = Uid> + '_ {
        self.ranges.iter().flat_map(|&(start, end)| {
            let (ascending, descending) = if start <= end {
                (Some(start..=end), None)
            } else {
                (None, Some((end..=start).rev()))
            };
            ascending
                .into_iter()
                .flatten()
                .chain(descending.into_iter().flatten())
                .filter_map(Uid::new)
        })
    }

    /// Collects [`UidSet::iter`]. Only for sets built locally; a set from
    /// the server may name billions of UIDs.
    #[must_use]
    pub fn expand(&self) -> Vec<Uid> {
        self.iter().collect()
    }

    /// Number of UIDs the set names, without expanding it.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.ranges
            .iter()
            .map(|&(start, end)| u64::from(start.abs_diff(end)) + 1)
            .sum()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl std::fmt::Display for UidSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, &(start, end)) in self.ranges.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}:{end}")?;
            }
        }
        Ok(())
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

    fn uids(values: &[u32]) -> Vec<Uid> {
        values.iter().map(|v| Uid::new(*v).unwrap()).collect()
    }

    #[test]
    fn test_from_uids_compresses_runs() {
        let set = UidSet::from_uids(&uids(&[1, 2, 3, 7, 9, 10]));
        assert_eq!(set.to_string(), "1:3,7,9:10");
    }

    #[test]
    fn test_parse_and_expand() {
        let set = UidSet::parse("304,319:320").unwrap();
        assert_eq!(set.expand(), uids(&[304, 319, 320]));
        assert_eq!(UidSet::parse("3956:3958").unwrap().expand().len(), 3);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(UidSet::parse("1:*").is_none());
        assert!(UidSet::parse("0").is_none());
        assert!(UidSet::parse("").is_none());
    }

    #[test]
    fn test_descending_range() {
        assert_eq!(UidSet::parse("5:3").unwrap().expand(), uids(&[5, 4, 3]));
    }

    #[test]
    fn test_len_counts_without_expanding() {
        assert_eq!(UidSet::parse("304,319:320,9:7").unwrap().len(), 6);
        assert_eq!(UidSet::parse("1:4294967295").unwrap().len(), 4_294_967_295);
        assert_eq!(UidSet::default().len(), 0);
    }
}
