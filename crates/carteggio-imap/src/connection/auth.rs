//! SASL client responses.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use md5::Md5;

use crate::error::{Error, Result};

/// `AUTHENTICATE PLAIN` response: base64 of `\0user\0password`.
#[must_use]
pub fn plain_response(username: &str, password: &str) -> String {
    STANDARD.encode(format!("\0{username}\0{password}"))
}

/// CRAM-MD5 response (RFC 2195) to a base64 server challenge.
///
/// The password keys HMAC-MD5; keys longer than the 64-byte block are
/// hashed first and shorter ones zero-padded, per RFC 2104.
///
/// # Errors
///
/// Returns [`Error::Authentication`] if the challenge is not valid base64.
pub fn cram_md5_response(username: &str, password: &str, challenge: &str) -> Result<String> {
    let challenge = STANDARD
        .decode(challenge.trim())
        .map_err(|e| Error::Authentication(format!("invalid CRAM-MD5 challenge: {e}")))?;
    let mut mac = Hmac::<Md5>::new_from_slice(password.as_bytes())
        .map_err(|e| Error::Authentication(e.to_string()))?;
    mac.update(&challenge);
    let digest = mac.finalize().into_bytes();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    Ok(STANDARD.encode(format!("{username} {hex}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_response() {
        assert_eq!(plain_response("tim", "tanstaaf"), "AHRpbQB0YW5zdGFhZg==");
    }

    #[test]
    fn test_cram_md5_rfc2195_example() {
        let response = cram_md5_response(
            "tim",
            "tanstaaftanstaaf",
            "PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+",
        )
        .unwrap();
        assert_eq!(response, "dGltIGI5MTNhNjAyYzdlZGE3YTQ5NWI0ZTZlNzMzNGQzODkw");
    }

    #[test]
    fn test_cram_md5_bad_challenge() {
        assert!(matches!(
            cram_md5_response("a", "b", "%%%"),
            Err(Error::Authentication(_))
        ));
    }
}
