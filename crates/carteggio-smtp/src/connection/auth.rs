//! SASL responses for AUTH.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use md5::Md5;

use crate::error::{Error, Result};

/// `AUTH PLAIN` initial response: base64 of `\0user\0password`.
pub(crate) fn plain(username: &str, password: &str) -> String {
    STANDARD.encode(format!("\0{username}\0{password}"))
}

/// One `AUTH LOGIN` answer.
pub(crate) fn login(value: &str) -> String {
    STANDARD.encode(value)
}

/// CRAM-MD5 answer (RFC 2195) to a base64 challenge.
pub(crate) fn cram_md5(username: &str, password: &str, challenge: &str) -> Result<String> {
    let challenge = STANDARD
        .decode(challenge.trim())
        .map_err(|e| Error::Authentication(format!("invalid CRAM-MD5 challenge: {e}")))?;
    let mut mac = Hmac::<Md5>::new_from_slice(password.as_bytes())
        .map_err(|e| Error::Authentication(e.to_string()))?;
    mac.update(&challenge);
    let hex: String = mac
        .finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    Ok(STANDARD.encode(format!("{username} {hex}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_and_login() {
        assert_eq!(plain("tim", "tanstaaf"), "AHRpbQB0YW5zdGFhZg==");
        assert_eq!(login("user"), "dXNlcg==");
    }

    #[test]
    fn test_cram_md5_rfc2195_example() {
        let response = cram_md5(
            "tim",
            "tanstaaftanstaaf",
            "PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+",
        )
        .unwrap();
        assert_eq!(response, "dGltIGI5MTNhNjAyYzdlZGE3YTQ5NWI0ZTZlNzMzNGQzODkw");
    }
}
