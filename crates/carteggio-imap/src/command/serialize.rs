//! Wire forms of command arguments.

use std::fmt::{self, Display, Write as _};

use super::types::{FetchAttribute, SearchCriteria, StatusAttribute, StoreAction};
use super::utf7;

/// `"..."` with `"` and `\` escaped.
pub(super) fn quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// An atom when every character allows it, otherwise [`quoted`].
fn astring(s: &str) -> String {
    let atom = !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_graphic() && !matches!(b, b'"' | b'\\' | b'(' | b')' | b'{' | b'%' | b'*' | b']')
        });
    if atom { s.to_owned() } else { quoted(s) }
}

/// Mailbox names go out in modified UTF-7 and always quoted, so names with
/// spaces or wildcards need no special casing.
pub(super) fn mailbox(name: &str) -> String {
    quoted(&utf7::encode(name))
}

/// Space-separated items in parentheses.
pub(super) fn parenthesized<T: Display>(items: impl IntoIterator<Item = T>) -> String {
    let mut out = String::from("(");
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{item}");
    }
    out.push(')');
    out
}

/// `+FLAGS.SILENT (\Deleted)` and friends.
pub(super) fn store_item(action: &StoreAction, silent: bool) -> String {
    let (item, flags) = match action {
        StoreAction::SetFlags(flags) => ("FLAGS", flags),
        StoreAction::AddFlags(flags) => ("+FLAGS", flags),
        StoreAction::RemoveFlags(flags) => ("-FLAGS", flags),
    };
    let suffix = if silent { ".SILENT" } else { "" };
    format!("{item}{suffix} {}", flags.to_list())
}

impl Display for StatusAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Display for FetchAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flags => f.write_str("FLAGS"),
            Self::InternalDate => f.write_str("INTERNALDATE"),
            Self::Rfc822Size => f.write_str("RFC822.SIZE"),
            Self::BodyStructure => f.write_str("BODYSTRUCTURE"),
            Self::Uid => f.write_str("UID"),
            Self::Body {
                section,
                peek,
                partial,
            } => {
                let item = if *peek { "BODY.PEEK" } else { "BODY" };
                write!(f, "{item}[{section}]")?;
                match partial {
                    Some((start, len)) => write!(f, "<{start}.{len}>"),
                    None => Ok(()),
                }
            }
        }
    }
}

impl Display for SearchCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("ALL"),
            Self::Deleted => f.write_str("DELETED"),
            Self::Unseen => f.write_str("UNSEEN"),
            Self::Uids(set) => write!(f, "UID {set}"),
            Self::UidsFrom(uid) => write!(f, "UID {uid}:*"),
            Self::HighestUid => f.write_str("UID *"),
            Self::Header(name, value) => write!(f, "HEADER {} {}", astring(name), quoted(value)),
            Self::And(all) => {
                for (i, criterion) in all.iter().enumerate() {
                    if i > 0 {
                        f.write_char(' ')?;
                    }
                    Display::fmt(criterion, f)?;
                }
                Ok(())
            }
            Self::Not(inner) => write!(f, "NOT {inner}"),
        }
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
    use crate::types::{Flag, Uid};

    #[test]
    fn test_quoting_escapes() {
        assert_eq!(quoted(r#"a "b" \c"#), r#""a \"b\" \\c""#);
        assert_eq!(quoted(""), "\"\"");
        assert_eq!(astring("Message-ID"), "Message-ID");
        assert_eq!(astring("X Spam"), "\"X Spam\"");
    }

    #[test]
    fn test_partial_body() {
        let attr = FetchAttribute::Body {
            section: "1.2".into(),
            peek: false,
            partial: Some((0, 1024)),
        };
        assert_eq!(attr.to_string(), "BODY[1.2]<0.1024>");
        assert_eq!(FetchAttribute::peek("").to_string(), "BODY.PEEK[]");
    }

    #[test]
    fn test_nested_criteria() {
        let criteria = SearchCriteria::And(vec![
            SearchCriteria::UidsFrom(Uid::new(7).unwrap()),
            SearchCriteria::Not(Box::new(SearchCriteria::Deleted)),
            SearchCriteria::Header("Message-ID".into(), "<x@y>".into()),
        ]);
        assert_eq!(
            criteria.to_string(),
            "UID 7:* NOT DELETED HEADER Message-ID \"<x@y>\""
        );
    }

    #[test]
    fn test_silent_store() {
        let action = StoreAction::RemoveFlags([Flag::Seen].into_iter().collect());
        assert_eq!(store_item(&action, true), "-FLAGS.SILENT (\\Seen)");
        assert_eq!(store_item(&action, false), "-FLAGS (\\Seen)");
    }
}
