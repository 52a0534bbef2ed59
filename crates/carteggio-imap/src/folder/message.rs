//! Message handles.

use carteggio_mime::Entity;
use chrono::{DateTime, FixedOffset};

use super::structure::STORE_DATA_HEADER;
use crate::types::{Flag, Flags, Uid};

/// What a fetch should populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchItem {
    /// FLAGS.
    Flags,
    /// INTERNALDATE, RFC822.SIZE and the main header fields.
    Envelope,
    /// BODYSTRUCTURE, turned into a deferred entity tree.
    Structure,
    /// The whole message.
    Body,
    /// The first bytes of the message, up to the configured limit.
    BodySane,
}

/// A message in a folder, identified by UID and filled in by fetches.
///
/// Part bodies stay [`Body::Deferred`](carteggio_mime::Body::Deferred)
/// until fetched one by one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    uid: Uid,
    pub(crate) flags: Flags,
    pub(crate) internal_date: Option<DateTime<FixedOffset>>,
    pub(crate) size: Option<u32>,
    pub(crate) entity: Entity,
}

impl Message {
    /// A handle with nothing fetched yet.
    #[must_use]
    pub fn new(uid: Uid) -> Self {
        Self {
            uid,
            flags: Flags::new(),
            internal_date: None,
            size: None,
            entity: Entity::default(),
        }
    }

    /// Server-assigned UID.
    #[must_use]
    pub const fn uid(&self) -> Uid {
        self.uid
    }

    /// Flags as last fetched or stored.
    #[must_use]
    pub const fn flags(&self) -> &Flags {
        &self.flags
    }

    /// Returns true if `flag` is set.
    #[must_use]
    pub fn is_set(&self, flag: &Flag) -> bool {
        self.flags.contains(flag)
    }

    /// INTERNALDATE.
    #[must_use]
    pub const fn internal_date(&self) -> Option<DateTime<FixedOffset>> {
        self.internal_date
    }

    /// RFC822.SIZE.
    #[must_use]
    pub const fn size(&self) -> Option<u32> {
        self.size
    }

    /// Headers and MIME structure fetched so far.
    #[must_use]
    pub const fn entity(&self) -> &Entity {
        &self.entity
    }

    /// Mutable access to the entity tree.
    pub const fn entity_mut(&mut self) -> &mut Entity {
        &mut self.entity
    }

    /// Message-ID header, once the envelope was fetched.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.entity.message_id()
    }

    /// The part recorded under `part_id` by a structure fetch.
    #[must_use]
    pub fn part(&self, part_id: &str) -> Option<&Entity> {
        let mut stack = vec![&self.entity];
        while let Some(entity) = stack.pop() {
            if entity.header(STORE_DATA_HEADER) == Some(part_id) {
                return Some(entity);
            }
            stack.extend(entity.parts());
        }
        None
    }

    /// Part ids of every leaf, in depth-first order.
    #[must_use]
    pub fn part_ids(&self) -> Vec<String> {
        self.entity
            .leaves()
            .into_iter()
            .filter_map(|leaf| leaf.header(STORE_DATA_HEADER).map(str::to_string))
            .collect()
    }
}
