//! Envelope addresses.

use crate::error::{Error, Result};

/// Email address for the SMTP envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates a new address from a bare `local@domain` string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if the address is empty, lacks a
    /// single `@` with text on both sides, or contains characters that
    /// would break the command line.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        Self::validate(&addr)?;
        Ok(Self(addr))
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Every address in an address-list header value such as
    /// `"Doe, Jane" <jane@example.com>, bob@example.net`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] for the first malformed entry.
    pub fn parse_list(header: &str) -> Result<Vec<Self>> {
        split_list(header)
            .into_iter()
            .map(|entry| {
                let bare = match (entry.rfind('<'), entry.rfind('>')) {
                    (Some(open), Some(close)) if open < close => &entry[open + 1..close],
                    _ => entry,
                };
                Self::new(bare.trim())
            })
            .collect()
    }

    fn validate(addr: &str) -> Result<()> {
        if addr.is_empty() {
            return Err(Error::InvalidAddress("Address cannot be empty".into()));
        }
        if addr
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '<' || c == '>')
        {
            return Err(Error::InvalidAddress(format!("{addr:?} contains illegal characters")));
        }
        match addr.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
                Ok(())
            }
            _ => Err(Error::InvalidAddress(format!(
                "{addr:?} is not of the form local@domain"
            ))),
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Splits on commas outside quotes and angle brackets; empty entries are
/// dropped.
fn split_list(header: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let (mut quoted, mut angle, mut start) = (false, false, 0);
    let mut escaped = false;
    for (i, c) in header.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            '<' if !quoted => angle = true,
            '>' if !quoted => angle = false,
            ',' if !quoted && !angle => {
                entries.push(&header[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    entries.push(&header[start..]);
    entries
        .into_iter()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_address() {
        let addr = Address::new("user@example.com").unwrap();
        assert_eq!(addr.as_str(), "user@example.com");
    }

    #[test]
    fn test_invalid_addresses() {
        for bad in ["", "userexample.com", "@example.com", "user@", "a@b@c", "a b@c", "a@b\r\nRSET"] {
            assert!(Address::new(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn test_parse_list() {
        let list = Address::parse_list(
            "\"Doe, Jane\" <jane@example.com>, bob@example.net,, Ada <ada@example.org>",
        )
        .unwrap();
        let bare: Vec<&str> = list.iter().map(Address::as_str).collect();
        assert_eq!(bare, vec!["jane@example.com", "bob@example.net", "ada@example.org"]);
    }

    #[test]
    fn test_parse_list_rejects_garbage() {
        assert!(Address::parse_list("Jane <not an address>").is_err());
        assert!(Address::parse_list("").unwrap().is_empty());
    }
}
