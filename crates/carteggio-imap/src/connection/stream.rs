//! Stream types for IMAP connections.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use super::compress::DeflateStream;
use super::config::{Security, ServerSettings};
use super::tls::{TrustStore, handshake};
use crate::{Error, Result};

/// Byte stream a connection can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// A stream that can be plaintext, TLS, or compressed on top of either.
pub enum ImapStream {
    /// Plaintext stream.
    Plain(Box<dyn AsyncStream>),
    /// TLS-encrypted stream.
    Tls(Box<TlsStream<Box<dyn AsyncStream>>>),
    /// DEFLATE on top of another stream.
    Compressed(Box<DeflateStream<ImapStream>>),
}

impl ImapStream {
    /// Wraps any stream as plaintext.
    pub fn plain(stream: impl AsyncStream + 'static) -> Self {
        Self::Plain(Box::new(stream))
    }

    /// Returns true if the stream is TLS-encrypted.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        match self {
            Self::Plain(_) => false,
            Self::Tls(_) => true,
            Self::Compressed(inner) => inner.get_ref().is_tls(),
        }
    }

    /// Returns true if DEFLATE is active.
    #[must_use]
    pub const fn is_compressed(&self) -> bool {
        matches!(self, Self::Compressed(_))
    }

    /// Starts compressing in both directions.
    #[must_use]
    pub fn compress(self) -> Self {
        Self::Compressed(Box::new(DeflateStream::new(self)))
    }
}

impl std::fmt::Debug for ImapStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("ImapStream::Plain"),
            Self::Tls(_) => f.write_str("ImapStream::Tls"),
            Self::Compressed(inner) => f.debug_tuple("ImapStream::Compressed").field(inner).finish(),
        }
    }
}

impl AsyncRead for ImapStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Compressed(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ImapStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Compressed(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
            Self::Compressed(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Compressed(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Opens transport streams for connections.
///
/// The default [`TcpConnector`] dials the network; tests substitute scripted
/// streams.
pub trait Connector: Send + Sync {
    /// Opens a stream to the configured server, with TLS already
    /// established for [`Security::Implicit`].
    fn connect(&self, settings: &ServerSettings) -> impl Future<Output = Result<ImapStream>> + Send;

    /// Upgrades a plaintext stream after a successful STARTTLS.
    fn start_tls(
        &self,
        stream: ImapStream,
        host: &str,
    ) -> impl Future<Output = Result<ImapStream>> + Send;
}

/// Connector that dials TCP and verifies TLS against webpki roots plus an
/// optional per-host override store.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    trust: Option<Arc<dyn TrustStore>>,
}

impl TcpConnector {
    /// Creates a connector trusting only the webpki roots.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a per-host certificate override store.
    #[must_use]
    pub fn with_trust_store(mut self, trust: Arc<dyn TrustStore>) -> Self {
        self.trust = Some(trust);
        self
    }
}

impl Connector for TcpConnector {
    async fn connect(&self, settings: &ServerSettings) -> Result<ImapStream> {
        let addresses = tokio::net::lookup_host((settings.host.as_str(), settings.port)).await?;
        let mut last_error = None;

        for address in addresses {
            tracing::debug!(%address, "connecting");
            let attempt = tokio::time::timeout(settings.connect_timeout, TcpStream::connect(address)).await;
            let tcp = match attempt {
                Ok(Ok(tcp)) => tcp,
                Ok(Err(err)) => {
                    tracing::debug!(%address, error = %err, "connect failed");
                    last_error = Some(Error::Io(err));
                    continue;
                }
                Err(_) => {
                    last_error = Some(Error::Timeout(settings.connect_timeout));
                    continue;
                }
            };
            tcp.set_nodelay(true)?;

            return match settings.security {
                Security::Implicit => {
                    let tls = handshake(Box::new(tcp), &settings.host, self.trust.clone()).await?;
                    Ok(ImapStream::Tls(Box::new(tls)))
                }
                Security::None | Security::StartTls => Ok(ImapStream::plain(tcp)),
            };
        }

        Err(last_error.unwrap_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses for {}", settings.host),
            ))
        }))
    }

    async fn start_tls(&self, stream: ImapStream, host: &str) -> Result<ImapStream> {
        match stream {
            ImapStream::Plain(inner) => {
                let tls = handshake(inner, host, self.trust.clone()).await?;
                Ok(ImapStream::Tls(Box::new(tls)))
            }
            ImapStream::Tls(_) | ImapStream::Compressed(_) => {
                Err(Error::Config("STARTTLS on a stream that is not plaintext".to_string()))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_compressed_stream_round_trip() {
        let (a, b) = tokio::io::duplex(1024);
        let mut client = ImapStream::plain(a).compress();
        let mut server = ImapStream::plain(b).compress();
        assert!(client.is_compressed());
        assert!(!client.is_tls());

        client.write_all(b"A0001 NOOP\r\n").await.unwrap();
        client.flush().await.unwrap();
        let mut buf = [0u8; 12];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"A0001 NOOP\r\n");
    }

    #[tokio::test]
    async fn test_start_tls_rejects_tls_stream() {
        let (a, _b) = tokio::io::duplex(64);
        let stream = ImapStream::plain(a).compress();
        let err = TcpConnector::new().start_tls(stream, "localhost").await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
