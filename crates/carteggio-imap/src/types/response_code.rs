//! UIDPLUS response codes.

use super::{Uid, UidSet, UidValidity};
use crate::parser::ImapList;

/// `[COPYUID validity source dest]` from RFC 4315.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyUid {
    /// UIDVALIDITY of the destination mailbox.
    pub validity: Option<UidValidity>,
    /// UIDs in the source mailbox.
    pub source: UidSet,
    /// UIDs assigned in the destination mailbox, positionally paired.
    pub destination: UidSet,
}

impl CopyUid {
    /// Extracts the code from a tagged response's code list.
    #[must_use]
    pub fn from_code(code: &ImapList) -> Option<Self> {
        if !code.atom_is(0, "COPYUID") {
            return None;
        }
        let validity = code
            .number(1)
            .and_then(|v| u32::try_from(v).ok())
            .and_then(UidValidity::new);
        Some(Self {
            validity,
            source: UidSet::parse(code.get(2)?.as_str()?)?,
            destination: UidSet::parse(code.get(3)?.as_str()?)?,
        })
    }

    /// Pairs source and destination UIDs in order.
    ///
    /// `sent` is how many UIDs the COPY named; a reply claiming more is
    /// ignored. Sets of different lengths map nothing, since positions would
    /// no longer correspond.
    #[must_use]
    pub fn mapping(&self, sent: usize) -> Vec<(Uid, Uid)> {
        let count = self.source.len();
        if count != self.destination.len() || count > u64::try_from(sent).unwrap_or(u64::MAX) {
            return Vec::new();
        }
        self.source.iter().zip(self.destination.iter()).collect()
    }
}

/// `[APPENDUID validity uid]` from RFC 4315.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendUid {
    /// UIDVALIDITY of the destination mailbox.
    pub validity: Option<UidValidity>,
    /// UID assigned to the appended message.
    pub uid: Uid,
}

impl AppendUid {
    /// Extracts the code from a tagged response's code list.
    #[must_use]
    pub fn from_code(code: &ImapList) -> Option<Self> {
        if !code.atom_is(0, "APPENDUID") {
            return None;
        }
        let validity = code
            .number(1)
            .and_then(|v| u32::try_from(v).ok())
            .and_then(UidValidity::new);
        let uid = Uid::parse(code.get(2)?.as_str()?)?;
        Some(Self { validity, uid })
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
    use crate::parser::ImapValue;

    fn code(tokens: &[&str]) -> ImapList {
        tokens
            .iter()
            .map(|t| ImapValue::Atom((*t).to_string()))
            .collect()
    }

    fn uid(v: u32) -> Uid {
        Uid::new(v).unwrap()
    }

    #[test]
    fn test_copyuid_mapping() {
        let copy = CopyUid::from_code(&code(&["COPYUID", "38505", "304,319:320", "3956:3958"])).unwrap();
        assert_eq!(copy.validity.unwrap().get(), 38505);
        assert_eq!(
            copy.mapping(3),
            vec![(uid(304), uid(3956)), (uid(319), uid(3957)), (uid(320), uid(3958))]
        );
    }

    #[test]
    fn test_copyuid_length_mismatch_maps_nothing() {
        let copy = CopyUid::from_code(&code(&["COPYUID", "1", "1:3", "10:11"])).unwrap();
        assert!(copy.mapping(3).is_empty());
    }

    #[test]
    fn test_copyuid_oversized_ranges_map_nothing() {
        let huge = CopyUid::from_code(&code(&["COPYUID", "1", "1:2000000000", "5"])).unwrap();
        assert!(huge.mapping(1).is_empty());

        let both = CopyUid::from_code(&code(&["COPYUID", "1", "1:4000000000", "1:4000000000"]))
            .unwrap();
        assert!(both.mapping(2).is_empty());
    }

    #[test]
    fn test_appenduid() {
        let append = AppendUid::from_code(&code(&["APPENDUID", "38505", "3955"])).unwrap();
        assert_eq!(append.uid, uid(3955));
        assert!(AppendUid::from_code(&code(&["UIDNEXT", "3"])).is_none());
    }
}
