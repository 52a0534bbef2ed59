//! Server URIs.
//!
//! An account names its servers with URIs of the form
//! `scheme://AUTHTYPE:user:password@host:port/prefix`. Each user-info
//! component is percent-encoded on its own, so a literal `:` only ever
//! separates components.
//!
//! | scheme | security | default port |
//! |---|---|---|
//! | `imap` | none | 143 |
//! | `imap+tls+` | STARTTLS | 143 |
//! | `imap+ssl+` | implicit TLS | 993 |
//! | `smtp` | none | 25 |
//! | `smtp+tls+` | STARTTLS | 587 |
//! | `smtp+ssl+` | implicit TLS | 465 |

use std::borrow::Cow;
use std::fmt;

use carteggio_imap::ServerSettings;
use carteggio_smtp::SmtpSettings;
use url::Url;

use crate::error::{Error, Result};

/// Protocol named by a URI scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// IMAP4rev1 message store.
    Imap,
    /// SMTP submission.
    Smtp,
}

/// Transport security named by a URI scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// Plaintext.
    None,
    /// `+tls+`: upgrade with STARTTLS.
    StartTls,
    /// `+ssl+`: TLS from the first byte.
    Implicit,
}

/// A URI scheme understood by the factories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheme {
    /// What the server speaks.
    pub protocol: Protocol,
    /// How the connection is protected.
    pub security: Security,
}

impl Scheme {
    /// Parses a scheme such as `imap+ssl+`.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedScheme`] for anything else.
    pub fn parse(scheme: &str) -> Result<Self> {
        let (protocol, security) = match scheme.to_ascii_lowercase().as_str() {
            "imap" => (Protocol::Imap, Security::None),
            "imap+tls+" => (Protocol::Imap, Security::StartTls),
            "imap+ssl+" => (Protocol::Imap, Security::Implicit),
            "smtp" => (Protocol::Smtp, Security::None),
            "smtp+tls+" => (Protocol::Smtp, Security::StartTls),
            "smtp+ssl+" => (Protocol::Smtp, Security::Implicit),
            _ => return Err(Error::UnsupportedScheme(scheme.to_string())),
        };
        Ok(Self { protocol, security })
    }

    /// Port used when the URI has none.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match (self.protocol, self.security) {
            (Protocol::Imap, Security::None | Security::StartTls) => 143,
            (Protocol::Imap, Security::Implicit) => 993,
            (Protocol::Smtp, Security::None) => 25,
            (Protocol::Smtp, Security::StartTls) => 587,
            (Protocol::Smtp, Security::Implicit) => 465,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let protocol = match self.protocol {
            Protocol::Imap => "imap",
            Protocol::Smtp => "smtp",
        };
        let suffix = match self.security {
            Security::None => "",
            Security::StartTls => "+tls+",
            Security::Implicit => "+ssl+",
        };
        write!(f, "{protocol}{suffix}")
    }
}

/// A parsed server URI.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerUri {
    /// Scheme.
    pub scheme: Scheme,
    /// Authentication type token, e.g. `PLAIN` or `CRAM_MD5`.
    pub auth_type: Option<String>,
    /// Login name.
    pub username: String,
    /// Password.
    pub password: String,
    /// Host name or address literal.
    pub host: String,
    /// Port, with the scheme default filled in.
    pub port: u16,
    /// Folder path prefix (IMAP only).
    pub path_prefix: Option<String>,
}

impl fmt::Debug for ServerUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerUri")
            .field("scheme", &self.scheme)
            .field("auth_type", &self.auth_type)
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("path_prefix", &self.path_prefix)
            .finish()
    }
}

impl ServerUri {
    /// Parses a server URI.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidUri`] if the text is not a URI with a host,
    /// [`Error::UnsupportedScheme`] for unknown schemes.
    pub fn parse(uri: &str) -> Result<Self> {
        let url = Url::parse(uri).map_err(|e| Error::InvalidUri(format!("{uri:?}: {e}")))?;
        let scheme = Scheme::parse(url.scheme())?;
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| Error::InvalidUri(format!("{uri:?}: missing host")))?;

        // The url crate re-encodes `:` inside the password, so the user
        // info is split from the original text instead.
        let (auth_type, username, password) = match raw_userinfo(uri) {
            Some(info) => {
                let mut parts = info.splitn(3, ':');
                let auth = parts.next().map(decode).transpose()?;
                let user = parts.next().map(decode).transpose()?.unwrap_or_default();
                let pass = parts.next().map(decode).transpose()?.unwrap_or_default();
                (auth.filter(|a| !a.is_empty()), user, pass)
            }
            None => (None, String::new(), String::new()),
        };

        let path_prefix = match url.path().trim_start_matches('/') {
            "" => None,
            prefix => Some(decode(prefix)?),
        };

        Ok(Self {
            scheme,
            auth_type,
            username,
            password,
            host: host.to_string(),
            port: url.port().unwrap_or_else(|| scheme.default_port()),
            path_prefix,
        })
    }

    /// IMAP settings for this URI.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedScheme`] if the URI is not an IMAP URI,
    /// [`Error::InvalidUri`] for an unknown authentication type.
    pub fn imap_settings(&self) -> Result<ServerSettings> {
        if self.scheme.protocol != Protocol::Imap {
            return Err(Error::UnsupportedScheme(self.scheme.to_string()));
        }
        let auth_type = match self.auth_type.as_deref().map(str::to_ascii_uppercase).as_deref() {
            None | Some("PLAIN") => carteggio_imap::AuthType::Plain,
            Some("CRAM_MD5" | "CRAM-MD5") => carteggio_imap::AuthType::CramMd5,
            Some(other) => return Err(Error::InvalidUri(format!("unknown IMAP auth type {other}"))),
        };
        let security = match self.scheme.security {
            Security::None => carteggio_imap::Security::None,
            Security::StartTls => carteggio_imap::Security::StartTls,
            Security::Implicit => carteggio_imap::Security::Implicit,
        };
        let mut builder = ServerSettings::builder(self.host.clone())
            .port(self.port)
            .security(security)
            .auth_type(auth_type)
            .credentials(self.username.clone(), self.password.clone());
        if let Some(prefix) = &self.path_prefix {
            builder = builder.path_prefix(prefix.clone());
        }
        Ok(builder.build())
    }

    /// SMTP settings for this URI. A URI without user info means no
    /// authentication.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedScheme`] if the URI is not an SMTP URI,
    /// [`Error::InvalidUri`] for an unknown authentication type.
    pub fn smtp_settings(&self) -> Result<SmtpSettings> {
        if self.scheme.protocol != Protocol::Smtp {
            return Err(Error::UnsupportedScheme(self.scheme.to_string()));
        }
        let auth_type = match self.auth_type.as_deref().map(str::to_ascii_uppercase).as_deref() {
            None | Some("NONE") => carteggio_smtp::AuthType::None,
            Some("PLAIN") => carteggio_smtp::AuthType::Plain,
            Some("LOGIN") => carteggio_smtp::AuthType::Login,
            Some("CRAM_MD5" | "CRAM-MD5") => carteggio_smtp::AuthType::CramMd5,
            Some(other) => return Err(Error::InvalidUri(format!("unknown SMTP auth type {other}"))),
        };
        let security = match self.scheme.security {
            Security::None => carteggio_smtp::Security::None,
            Security::StartTls => carteggio_smtp::Security::StartTls,
            Security::Implicit => carteggio_smtp::Security::Implicit,
        };
        Ok(SmtpSettings::builder(self.host.clone())
            .port(self.port)
            .security(security)
            .auth_type(auth_type)
            .credentials(self.username.clone(), self.password.clone())
            .build())
    }

    /// The URI describing `settings`.
    #[must_use]
    pub fn from_imap(settings: &ServerSettings) -> Self {
        let security = match settings.security {
            carteggio_imap::Security::None => Security::None,
            carteggio_imap::Security::StartTls => Security::StartTls,
            carteggio_imap::Security::Implicit => Security::Implicit,
        };
        let auth_type = match settings.auth_type {
            carteggio_imap::AuthType::Plain => "PLAIN",
            carteggio_imap::AuthType::CramMd5 => "CRAM_MD5",
        };
        Self {
            scheme: Scheme {
                protocol: Protocol::Imap,
                security,
            },
            auth_type: Some(auth_type.to_string()),
            username: settings.username.clone(),
            password: settings.password.clone(),
            host: settings.host.clone(),
            port: settings.port,
            path_prefix: settings.path_prefix.clone().filter(|p| !p.is_empty()),
        }
    }

    /// The URI describing `settings`.
    #[must_use]
    pub fn from_smtp(settings: &SmtpSettings) -> Self {
        let security = match settings.security {
            carteggio_smtp::Security::None => Security::None,
            carteggio_smtp::Security::StartTls => Security::StartTls,
            carteggio_smtp::Security::Implicit => Security::Implicit,
        };
        let auth_type = match settings.auth_type {
            carteggio_smtp::AuthType::None => None,
            carteggio_smtp::AuthType::Plain => Some("PLAIN"),
            carteggio_smtp::AuthType::Login => Some("LOGIN"),
            carteggio_smtp::AuthType::CramMd5 => Some("CRAM_MD5"),
        };
        Self {
            scheme: Scheme {
                protocol: Protocol::Smtp,
                security,
            },
            auth_type: auth_type.map(str::to_string),
            username: settings.username.clone(),
            password: settings.password.clone(),
            host: settings.host.clone(),
            port: settings.port,
            path_prefix: None,
        }
    }
}

impl fmt::Display for ServerUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme)?;
        if let Some(auth) = &self.auth_type {
            write!(
                f,
                "{}:{}:{}@",
                urlencoding::encode(auth),
                urlencoding::encode(&self.username),
                urlencoding::encode(&self.password)
            )?;
        }
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]", self.host)?;
        } else {
            f.write_str(&self.host)?;
        }
        write!(f, ":{}", self.port)?;
        if let Some(prefix) = &self.path_prefix {
            write!(f, "/{}", urlencoding::encode(prefix))?;
        }
        Ok(())
    }
}

/// The user info exactly as written in `uri`.
fn raw_userinfo(uri: &str) -> Option<&str> {
    let (_, rest) = uri.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next()?;
    authority.rsplit_once('@').map(|(info, _)| info)
}

fn decode(component: &str) -> Result<String> {
    urlencoding::decode(component)
        .map(Cow::into_owned)
        .map_err(|e| Error::InvalidUri(e.to_string()))
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
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_parse_imap_uri() {
        let uri = ServerUri::parse("imap+ssl+://PLAIN:alice%40example.com:p%3Ass%40w@mail.example.com/INBOX.").unwrap();
        assert_eq!(uri.scheme.security, Security::Implicit);
        assert_eq!(uri.auth_type.as_deref(), Some("PLAIN"));
        assert_eq!(uri.username, "alice@example.com");
        assert_eq!(uri.password, "p:ss@w");
        assert_eq!(uri.host, "mail.example.com");
        assert_eq!(uri.port, 993);
        assert_eq!(uri.path_prefix.as_deref(), Some("INBOX."));

        let settings = uri.imap_settings().unwrap();
        assert_eq!(settings.security, carteggio_imap::Security::Implicit);
        assert_eq!(settings.port, 993);
        assert_eq!(settings.path_prefix.as_deref(), Some("INBOX."));
    }

    #[test]
    fn test_default_ports() {
        let port = |uri: &str| ServerUri::parse(uri).unwrap().port;
        assert_eq!(port("imap://h"), 143);
        assert_eq!(port("imap+tls+://h"), 143);
        assert_eq!(port("smtp://h"), 25);
        assert_eq!(port("smtp+tls+://h"), 587);
        assert_eq!(port("smtp+ssl+://h"), 465);
        assert_eq!(port("smtp+ssl+://h:2465"), 2465);
    }

    #[test]
    fn test_unknown_scheme_and_missing_host() {
        assert!(matches!(
            ServerUri::parse("pop3://h"),
            Err(Error::UnsupportedScheme(s)) if s == "pop3"
        ));
        assert!(matches!(
            ServerUri::parse("not a uri"),
            Err(Error::InvalidUri(_))
        ));
    }

    #[test]
    fn test_smtp_without_userinfo_has_no_auth() {
        let settings = ServerUri::parse("smtp+tls+://smtp.example.com")
            .unwrap()
            .smtp_settings()
            .unwrap();
        assert_eq!(settings.auth_type, carteggio_smtp::AuthType::None);
        assert_eq!(settings.port, 587);
    }

    #[test]
    fn test_wrong_protocol_is_rejected() {
        let uri = ServerUri::parse("smtp://h").unwrap();
        assert!(matches!(uri.imap_settings(), Err(Error::UnsupportedScheme(_))));
    }

    #[test]
    fn test_settings_round_trip() {
        let settings = ServerSettings::builder("imap.example.com")
            .security(carteggio_imap::Security::StartTls)
            .auth_type(carteggio_imap::AuthType::CramMd5)
            .credentials("bob:smith", "pa/ss word%")
            .build();
        let text = ServerUri::from_imap(&settings).to_string();
        let back = ServerUri::parse(&text).unwrap().imap_settings().unwrap();
        assert_eq!(back.username, "bob:smith");
        assert_eq!(back.password, "pa/ss word%");
        assert_eq!(back.auth_type, carteggio_imap::AuthType::CramMd5);
        assert_eq!(back.security, carteggio_imap::Security::StartTls);
        assert_eq!(back.port, 143);

        let smtp = SmtpSettings::builder("smtp.example.com")
            .security(carteggio_smtp::Security::Implicit)
            .auth_type(carteggio_smtp::AuthType::Login)
            .credentials("u", "p")
            .build();
        let text = ServerUri::from_smtp(&smtp).to_string();
        assert_eq!(text, "smtp+ssl+://LOGIN:u:p@smtp.example.com:465");
        let back = ServerUri::parse(&text).unwrap().smtp_settings().unwrap();
        assert_eq!(back.auth_type, carteggio_smtp::AuthType::Login);
    }

    #[test]
    fn test_debug_redacts_password() {
        let uri = ServerUri::parse("imap://PLAIN:u:hunter2@h").unwrap();
        assert!(!format!("{uri:?}").contains("hunter2"));
    }

    proptest! {
        #[test]
        fn prop_credentials_survive_round_trip(user in "\\PC{0,24}", password in "\\PC{0,24}") {
            let settings = SmtpSettings::builder("smtp.example.com")
                .auth_type(carteggio_smtp::AuthType::Plain)
                .credentials(user.clone(), password.clone())
                .build();
            let text = ServerUri::from_smtp(&settings).to_string();
            let back = ServerUri::parse(&text).unwrap();
            prop_assert_eq!(back.username, user);
            prop_assert_eq!(back.password, password);
        }
    }
}
