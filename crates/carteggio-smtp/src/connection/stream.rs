//! Low-level SMTP stream handling.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::{
    TlsConnector,
    rustls::{ClientConfig, RootCertStore},
};
use tracing::debug;

use crate::error::{Error, Result};
use crate::settings::{Security, SmtpSettings};

/// Byte stream a client can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// SMTP stream, plaintext or TLS.
pub enum SmtpStream {
    /// Plaintext connection.
    Plain(Box<dyn AsyncStream>),
    /// TLS-encrypted connection.
    Tls(Box<TlsStream<Box<dyn AsyncStream>>>),
}

impl SmtpStream {
    /// Wraps any stream as plaintext.
    pub fn plain(stream: impl AsyncStream + 'static) -> Self {
        Self::Plain(Box::new(stream))
    }

    /// Returns true if the stream is TLS-encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

impl std::fmt::Debug for SmtpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("SmtpStream::Plain"),
            Self::Tls(_) => f.write_str("SmtpStream::Tls"),
        }
    }
}

impl AsyncRead for SmtpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SmtpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Opens streams for a transport; tests substitute scripted streams.
pub trait Connector: Send + Sync {
    /// Opens a stream to the configured server, with TLS already
    /// established for [`Security::Implicit`].
    fn connect(&self, settings: &SmtpSettings) -> impl Future<Output = Result<SmtpStream>> + Send;

    /// Upgrades a plaintext stream after the server accepted STARTTLS.
    fn start_tls(
        &self,
        stream: SmtpStream,
        host: &str,
    ) -> impl Future<Output = Result<SmtpStream>> + Send;
}

/// Connector that dials TCP and verifies TLS against the webpki roots.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    async fn connect(&self, settings: &SmtpSettings) -> Result<SmtpStream> {
        let address = (settings.host.as_str(), settings.port);
        let tcp = tokio::time::timeout(settings.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| Error::Timeout(settings.connect_timeout))??;
        tcp.set_nodelay(true)?;
        debug!(host = %settings.host, port = settings.port, "connected");

        match settings.security {
            Security::Implicit => upgrade(Box::new(tcp), &settings.host).await,
            Security::None | Security::StartTls => Ok(SmtpStream::plain(tcp)),
        }
    }

    async fn start_tls(&self, stream: SmtpStream, host: &str) -> Result<SmtpStream> {
        match stream {
            SmtpStream::Plain(inner) => upgrade(inner, host).await,
            SmtpStream::Tls(_) => Err(Error::Protocol("Already using TLS".into())),
        }
    }
}

async fn upgrade(stream: Box<dyn AsyncStream>, host: &str) -> Result<SmtpStream> {
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| Error::Config(format!("Invalid hostname: {host}")))?;
    let tls = create_tls_connector().connect(server_name, stream).await?;
    debug!(host, "TLS established");
    Ok(SmtpStream::Tls(Box::new(tls)))
}

/// Creates a TLS connector with the webpki root certificates.
fn create_tls_connector() -> TlsConnector {
    let root_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_tls_rejects_invalid_hostname() {
        let (a, _b) = tokio::io::duplex(64);
        let plain = SmtpStream::plain(a);
        assert!(!plain.is_tls());

        let err = TcpConnector
            .start_tls(plain, "not a hostname")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
