//! TLS setup with a pluggable per-host trust override.
//!
//! Certificates are first checked against the webpki root set. A chain the
//! roots reject is accepted only if the configured [`TrustStore`] holds the
//! exact leaf certificate for the host. Otherwise the chain is kept so the
//! caller can show it to the user and decide whether to trust it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use super::stream::AsyncStream;
use crate::error::{Error, Result};

/// Per-host certificate overrides.
pub trait TrustStore: Send + Sync + fmt::Debug {
    /// Returns true if `certificate` was explicitly accepted for `host`.
    fn is_trusted(&self, host: &str, certificate: &[u8]) -> bool;
}

/// In-memory [`TrustStore`].
#[derive(Debug, Default)]
pub struct MemoryTrustStore {
    accepted: RwLock<HashMap<String, Vec<Vec<u8>>>>,
}

impl MemoryTrustStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts a DER certificate for `host`.
    pub fn accept(&self, host: &str, certificate: Vec<u8>) {
        if let Ok(mut accepted) = self.accepted.write() {
            accepted
                .entry(host.to_ascii_lowercase())
                .or_default()
                .push(certificate);
        }
    }

    /// Forgets every certificate accepted for `host`.
    pub fn revoke(&self, host: &str) {
        if let Ok(mut accepted) = self.accepted.write() {
            accepted.remove(&host.to_ascii_lowercase());
        }
    }
}

impl TrustStore for MemoryTrustStore {
    fn is_trusted(&self, host: &str, certificate: &[u8]) -> bool {
        self.accepted.read().is_ok_and(|accepted| {
            accepted
                .get(&host.to_ascii_lowercase())
                .is_some_and(|certs| certs.iter().any(|c| c == certificate))
        })
    }
}

type RejectedChain = Arc<Mutex<Option<Vec<Vec<u8>>>>>;

#[derive(Debug)]
struct OverridableVerifier {
    host: String,
    roots: Arc<WebPkiServerVerifier>,
    overrides: Option<Arc<dyn TrustStore>>,
    rejected: RejectedChain,
}

impl ServerCertVerifier for OverridableVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self
            .roots
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Ok(verified) => Ok(verified),
            Err(err) => {
                if let Some(overrides) = &self.overrides {
                    if overrides.is_trusted(&self.host, end_entity.as_ref()) {
                        tracing::debug!(host = %self.host, "accepting certificate from trust override");
                        return Ok(ServerCertVerified::assertion());
                    }
                }
                let chain = std::iter::once(end_entity)
                    .chain(intermediates)
                    .map(|c| c.as_ref().to_vec())
                    .collect();
                if let Ok(mut slot) = self.rejected.lock() {
                    *slot = Some(chain);
                }
                Err(err)
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.roots.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.roots.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.roots.supported_verify_schemes()
    }
}

/// Runs a client TLS handshake over `stream`.
///
/// # Errors
///
/// Returns [`Error::Certificate`] with the presented chain when the server
/// certificate is not trusted, [`Error::Io`] for other handshake failures.
pub async fn handshake(
    stream: Box<dyn AsyncStream>,
    host: &str,
    overrides: Option<Arc<dyn TrustStore>>,
) -> Result<TlsStream<Box<dyn AsyncStream>>> {
    let root_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let roots = WebPkiServerVerifier::builder(Arc::new(root_store))
        .build()
        .map_err(|e| Error::Config(format!("TLS verifier: {e}")))?;
    let rejected = RejectedChain::default();
    let verifier = OverridableVerifier {
        host: host.to_string(),
        roots,
        overrides,
        rejected: Arc::clone(&rejected),
    };

    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));
    let server_name = ServerName::try_from(host.to_string())?;

    match connector.connect(server_name, stream).await {
        Ok(tls) => {
            tracing::debug!(host, "TLS established");
            Ok(tls)
        }
        Err(err) => {
            let chain = rejected.lock().ok().and_then(|mut slot| slot.take());
            match chain {
                Some(chain) => Err(Error::Certificate {
                    host: host.to_string(),
                    chain,
                }),
                None => Err(Error::Io(err)),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_trust_store() {
        let store = MemoryTrustStore::new();
        assert!(!store.is_trusted("mail.example.org", b"cert"));

        store.accept("Mail.Example.org", b"cert".to_vec());
        assert!(store.is_trusted("mail.example.org", b"cert"));
        assert!(!store.is_trusted("mail.example.org", b"other"));
        assert!(!store.is_trusted("imap.example.org", b"cert"));

        store.revoke("mail.example.org");
        assert!(!store.is_trusted("mail.example.org", b"cert"));
    }
}
