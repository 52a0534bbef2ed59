//! Non-zero 32-bit numbers the server hands out.

use std::fmt;
use std::num::NonZeroU32;

macro_rules! nonzero_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(NonZeroU32);

        impl $name {
            /// `None` for 0, which the protocol never assigns.
            #[must_use]
            pub const fn new(n: u32) -> Option<Self> {
                match NonZeroU32::new(n) {
                    Some(n) => Some(Self(n)),
                    None => None,
                }
            }

            /// The number itself.
            #[must_use]
            pub const fn get(self) -> u32 {
                self.0.get()
            }

            /// Reads a decimal number as it appears on the wire.
            #[must_use]
            pub fn parse(digits: &str) -> Option<Self> {
                digits.parse().ok().and_then(Self::new)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

nonzero_id!(
    /// A message's identity within one incarnation of a mailbox.
    ///
    /// Ascending in arrival order and stable across expunges, but only
    /// meaningful together with the mailbox's [`UidValidity`].
    Uid
);

nonzero_id!(
    /// Changes whenever the server renumbers a mailbox, invalidating every
    /// [`Uid`] seen before.
    UidValidity
);

impl Uid {
    /// `1`, the first UID a mailbox can assign.
    pub const MIN: Self = Self(NonZeroU32::MIN);
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
    fn test_zero_is_not_an_id() {
        assert!(Uid::new(0).is_none());
        assert!(Uid::parse("0").is_none());
        assert!(Uid::parse("-3").is_none());
        assert!(UidValidity::parse("").is_none());
        assert_eq!(Uid::parse("42").unwrap().get(), 42);
        assert_eq!(Uid::MIN.get(), 1);
    }

    #[test]
    fn test_numeric_order_and_display() {
        assert!(Uid::new(3).unwrap() < Uid::new(10).unwrap());
        assert_eq!(Uid::new(7).unwrap().to_string(), "7");
        assert_eq!(UidValidity::new(3857529045).unwrap().to_string(), "3857529045");
    }
}
