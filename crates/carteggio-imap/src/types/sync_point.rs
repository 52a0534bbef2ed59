//! Incremental synchronization watermark.

use std::fmt;
use std::str::FromStr;

use super::Uid;

/// The UID from which the next search for new messages starts.
///
/// A fresh point is unknown; the first search only establishes the
/// watermark and reports nothing. The watermark never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncPoint {
    next_uid: Option<Uid>,
}

impl SyncPoint {
    /// A point with no watermark yet.
    #[must_use]
    pub const fn unknown() -> Self {
        Self { next_uid: None }
    }

    /// A point starting at `next_uid`.
    #[must_use]
    pub const fn at(next_uid: Uid) -> Self {
        Self {
            next_uid: Some(next_uid),
        }
    }

    /// Returns true once a watermark has been established.
    #[must_use]
    pub const fn is_known(&self) -> bool {
        self.next_uid.is_some()
    }

    /// The next UID to look for.
    #[must_use]
    pub const fn next_uid(&self) -> Option<Uid> {
        self.next_uid
    }

    /// Raises the watermark to `next_uid` if that is higher.
    pub fn update(&mut self, next_uid: Uid) {
        if self.next_uid.is_none_or(|current| next_uid > current) {
            self.next_uid = Some(next_uid);
        }
    }

    /// Raises the watermark past `uid`.
    pub fn advance_past(&mut self, uid: Uid) {
        if let Some(next) = uid.get().checked_add(1).and_then(Uid::new) {
            self.update(next);
        }
    }

    /// Serialized form, stable across versions.
    #[must_use]
    pub fn save(&self) -> String {
        self.to_string()
    }

    /// Parses the output of [`SyncPoint::save`].
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSyncPoint`] for unrecognised input.
    pub fn parse(s: &str) -> Result<Self, InvalidSyncPoint> {
        s.parse()
    }
}

impl Default for SyncPoint {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for SyncPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.next_uid {
            Some(uid) => write!(f, "{uid}"),
            None => f.write_str("-1"),
        }
    }
}

/// A saved sync point could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid sync point: {0:?}")]
pub struct InvalidSyncPoint(pub String);

impl FromStr for SyncPoint {
    type Err = InvalidSyncPoint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed == "-1" {
            return Ok(Self::unknown());
        }
        Uid::parse(trimmed)
            .map(Self::at)
            .ok_or_else(|| InvalidSyncPoint(s.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn uid(v: u32) -> Uid {
        Uid::new(v).unwrap()
    }

    #[test]
    fn test_update_never_decreases() {
        let mut point = SyncPoint::unknown();
        point.update(uid(10));
        point.update(uid(4));
        assert_eq!(point.next_uid(), Some(uid(10)));
        point.advance_past(uid(12));
        assert_eq!(point.next_uid(), Some(uid(13)));
    }

    #[test]
    fn test_save_and_parse() {
        let point = SyncPoint::at(uid(4392));
        assert_eq!(SyncPoint::parse(&point.save()).unwrap(), point);
        assert_eq!(SyncPoint::parse("-1").unwrap(), SyncPoint::unknown());
        assert!(SyncPoint::parse("abc").is_err());
        assert!(SyncPoint::parse("0").is_err());
    }
}
