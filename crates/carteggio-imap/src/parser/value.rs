//! Generic response tree.
//!
//! The parser does not interpret responses. It builds a tree of atoms,
//! strings and nested lists, and callers pick the parts they need through
//! the keyword accessors on [`ImapList`].

use std::fmt;
use std::ops::Deref;

/// One element of a response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImapValue {
    /// Bare token, e.g. `EXISTS`, `\Seen`, `42`.
    Atom(String),
    /// Quoted string with escapes resolved.
    Quoted(String),
    /// Literal read by the parser itself.
    Literal(Vec<u8>),
    /// `NIL`.
    Nil,
    /// Parenthesized or bracketed list.
    List(ImapList),
    /// Human-readable text following a status keyword or `+`.
    Text(String),
    /// Literal of the given length consumed by a literal handler.
    Handled(u64),
}

impl ImapValue {
    /// String content of an atom, quoted string or UTF-8 literal.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Atom(s) | Self::Quoted(s) | Self::Text(s) => Some(s),
            Self::Literal(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    /// Owned string content; literals are decoded lossily.
    #[must_use]
    pub fn to_string_lossy(&self) -> Option<String> {
        match self {
            Self::Literal(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            other => other.as_str().map(str::to_string),
        }
    }

    /// Numeric value of an atom.
    #[must_use]
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Atom(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Nested list.
    #[must_use]
    pub const fn as_list(&self) -> Option<&ImapList> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    /// Returns true if this is `NIL`.
    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Returns true if this is an atom equal to `keyword`, ignoring case.
    #[must_use]
    pub fn is_atom(&self, keyword: &str) -> bool {
        matches!(self, Self::Atom(s) if s.eq_ignore_ascii_case(keyword))
    }
}

impl fmt::Display for ImapValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atom(s) | Self::Text(s) => f.write_str(s),
            Self::Quoted(s) => {
                f.write_str("\"")?;
                for c in s.chars() {
                    if c == '"' || c == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{c}")?;
                }
                f.write_str("\"")
            }
            Self::Literal(bytes) => write!(f, "{{{}}}", bytes.len()),
            Self::Handled(len) => write!(f, "{{{len}}}"),
            Self::Nil => f.write_str("NIL"),
            Self::List(list) => fmt::Display::fmt(list, f),
        }
    }
}

/// Ordered list of values, either `(...)` or `[...]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImapList {
    items: Vec<ImapValue>,
    bracketed: bool,
}

impl ImapList {
    /// Creates an empty parenthesized list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            items: Vec::new(),
            bracketed: false,
        }
    }

    /// Creates an empty bracketed list.
    #[must_use]
    pub const fn bracketed() -> Self {
        Self {
            items: Vec::new(),
            bracketed: true,
        }
    }

    /// Returns true for a `[...]` list.
    #[must_use]
    pub const fn is_bracketed(&self) -> bool {
        self.bracketed
    }

    /// Appends a value.
    pub fn push(&mut self, value: ImapValue) {
        self.items.push(value);
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the list has no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Item at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ImapValue> {
        self.items.get(index)
    }

    /// Iterates over the items.
    pub fn iter(&self) -> std::slice::Iter<'_, ImapValue> {
        self.items.iter()
    }

    /// Consumes the list into its items.
    #[must_use]
    pub fn into_items(self) -> Vec<ImapValue> {
        self.items
    }

    /// String at `index`; `NIL` and lists yield `None`.
    #[must_use]
    pub fn string(&self, index: usize) -> Option<String> {
        self.get(index).and_then(ImapValue::to_string_lossy)
    }

    /// Number at `index`.
    #[must_use]
    pub fn number(&self, index: usize) -> Option<i64> {
        self.get(index).and_then(ImapValue::as_number)
    }

    /// Nested list at `index`.
    #[must_use]
    pub fn list(&self, index: usize) -> Option<&ImapList> {
        self.get(index).and_then(ImapValue::as_list)
    }

    /// Returns true if the item at `index` is the atom `keyword`.
    #[must_use]
    pub fn atom_is(&self, index: usize, keyword: &str) -> bool {
        self.get(index).is_some_and(|v| v.is_atom(keyword))
    }

    fn key_position(&self, key: &str) -> Option<usize> {
        self.items.iter().position(|v| v.is_atom(key))
    }

    /// Returns true if `key` occurs as an atom.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.key_position(key).is_some()
    }

    /// Value following the atom `key`.
    #[must_use]
    pub fn keyed_value(&self, key: &str) -> Option<&ImapValue> {
        self.key_position(key).and_then(|i| self.get(i + 1))
    }

    /// String following the atom `key`.
    #[must_use]
    pub fn keyed_string(&self, key: &str) -> Option<String> {
        self.keyed_value(key).and_then(ImapValue::to_string_lossy)
    }

    /// List following the atom `key`.
    #[must_use]
    pub fn keyed_list(&self, key: &str) -> Option<&ImapList> {
        self.keyed_value(key).and_then(ImapValue::as_list)
    }

    /// Number following the atom `key`.
    #[must_use]
    pub fn keyed_number(&self, key: &str) -> Option<i64> {
        self.keyed_value(key).and_then(ImapValue::as_number)
    }
}

impl<'a> IntoIterator for &'a ImapList {
    type Item = &'a ImapValue;
    type IntoIter = std::slice::Iter<'a, ImapValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl FromIterator<ImapValue> for ImapList {
    fn from_iter<I: IntoIterator<Item = ImapValue>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
            bracketed: false,
        }
    }
}

impl fmt::Display for ImapList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (open, close) = if self.bracketed { ("[", "]") } else { ("(", ")") };
        f.write_str(open)?;
        write_items(f, &self.items)?;
        f.write_str(close)
    }
}

fn write_items(f: &mut fmt::Formatter<'_>, items: &[ImapValue]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        fmt::Display::fmt(item, f)?;
    }
    Ok(())
}

/// Status keyword of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// `OK`
    Ok,
    /// `NO`
    No,
    /// `BAD`
    Bad,
    /// `PREAUTH`
    PreAuth,
    /// `BYE`
    Bye,
}

impl Status {
    /// Parses a status keyword, ignoring case.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "OK" => Some(Self::Ok),
            "NO" => Some(Self::No),
            "BAD" => Some(Self::Bad),
            "PREAUTH" => Some(Self::PreAuth),
            "BYE" => Some(Self::Bye),
            _ => None,
        }
    }
}

/// One complete response line.
///
/// Dereferences to the top-level [`ImapList`], so `response.number(0)` reads
/// the first token after the tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapResponse {
    tag: Option<String>,
    continuation: bool,
    items: ImapList,
}

impl ImapResponse {
    pub(crate) const fn new(tag: Option<String>, continuation: bool, items: ImapList) -> Self {
        Self {
            tag,
            continuation,
            items,
        }
    }

    /// Tag of a tagged response.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Returns true for a tagged response.
    #[must_use]
    pub const fn is_tagged(&self) -> bool {
        self.tag.is_some()
    }

    /// Returns true for a `+` continuation request.
    #[must_use]
    pub const fn is_continuation(&self) -> bool {
        self.continuation
    }

    /// Returns true for a `*` response.
    #[must_use]
    pub const fn is_untagged(&self) -> bool {
        self.tag.is_none() && !self.continuation
    }

    /// Status keyword, when the first token is one.
    #[must_use]
    pub fn status(&self) -> Option<Status> {
        match self.items.get(0) {
            Some(ImapValue::Atom(s)) => Status::parse(s),
            _ => None,
        }
    }

    /// Returns true when the first token is `OK`.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status() == Some(Status::Ok)
    }

    /// Bracketed response code, e.g. `[UIDNEXT 42]`.
    #[must_use]
    pub fn response_code(&self) -> Option<&ImapList> {
        let index = usize::from(!self.continuation);
        self.items.list(index).filter(|l| l.is_bracketed())
    }

    /// Trailing human-readable text.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self.items.iter().last() {
            Some(ImapValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Text of an `[ALERT]` response.
    #[must_use]
    pub fn alert(&self) -> Option<String> {
        self.response_code()
            .filter(|code| code.atom_is(0, "ALERT"))
            .map(|_| self.text().unwrap_or_default().to_string())
    }

    /// Top-level items.
    #[must_use]
    pub const fn items(&self) -> &ImapList {
        &self.items
    }
}

impl Deref for ImapResponse {
    type Target = ImapList;

    fn deref(&self) -> &ImapList {
        &self.items
    }
}

impl fmt::Display for ImapResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.tag, self.continuation) {
            (Some(tag), _) => write!(f, "{tag} ")?,
            (None, true) => f.write_str("+ ")?,
            (None, false) => f.write_str("* ")?,
        }
        write_items(f, &self.items.items)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn atom(s: &str) -> ImapValue {
        ImapValue::Atom(s.to_string())
    }

    #[test]
    fn test_keyed_accessors_ignore_case() {
        let list: ImapList = [
            atom("MESSAGES"),
            atom("17"),
            atom("uidnext"),
            atom("4392"),
        ]
        .into_iter()
        .collect();

        assert_eq!(list.keyed_number("messages"), Some(17));
        assert_eq!(list.keyed_number("UIDNEXT"), Some(4392));
        assert!(list.contains_key("UidNext"));
        assert!(list.keyed_value("UNSEEN").is_none());
    }

    #[test]
    fn test_response_code_and_alert() {
        let mut code = ImapList::bracketed();
        code.push(atom("ALERT"));
        let items: ImapList = [
            atom("NO"),
            ImapValue::List(code),
            ImapValue::Text("quota exceeded".to_string()),
        ]
        .into_iter()
        .collect();
        let response = ImapResponse::new(Some("A3".to_string()), false, items);

        assert_eq!(response.status(), Some(Status::No));
        assert_eq!(response.alert().as_deref(), Some("quota exceeded"));
        assert_eq!(response.to_string(), "A3 NO [ALERT] quota exceeded");
    }

    #[test]
    fn test_nested_lists_display() {
        let flags: ImapList = [atom("\\Seen"), ImapValue::Quoted("a \"b\"".into())]
            .into_iter()
            .collect();
        let outer: ImapList = [atom("FLAGS"), ImapValue::List(flags), ImapValue::Nil]
            .into_iter()
            .collect();
        assert_eq!(outer.to_string(), r#"(FLAGS (\Seen "a \"b\"") NIL)"#);
    }

    #[test]
    fn test_literal_strings() {
        let value = ImapValue::Literal(b"caf\xc3\xa9".to_vec());
        assert_eq!(value.as_str(), Some("café"));
        assert_eq!(value.to_string(), "{5}");
        assert!(ImapValue::Literal(vec![0xff]).as_str().is_none());
    }
}
