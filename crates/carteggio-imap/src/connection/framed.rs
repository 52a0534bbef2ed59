//! Framed reading primitives for the IMAP wire.
//!
//! [`PeekableReader`] buffers the socket so the parser can look one byte
//! ahead without consuming it. [`FixedLengthReader`] exposes exactly the
//! bytes of one literal to a callback and guarantees that whatever the
//! callback leaves unread is skipped, so the stream stays positioned on
//! the next response.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf, Take,
};

/// Read buffer size.
const BUFFER_SIZE: usize = 16 * 1024;

/// Buffered reader with one-byte lookahead and an optional read timeout.
///
/// Writes pass straight through to the wrapped stream.
#[derive(Debug)]
pub struct PeekableReader<S> {
    inner: BufReader<S>,
    read_timeout: Option<Duration>,
}

impl<S: AsyncRead + Unpin> PeekableReader<S> {
    /// Wraps a stream.
    pub fn new(stream: S) -> Self {
        Self {
            inner: BufReader::with_capacity(BUFFER_SIZE, stream),
            read_timeout: None,
        }
    }

    /// Sets the timeout applied to every socket read.
    pub const fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    /// Current read timeout.
    #[must_use]
    pub const fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    async fn fill(&mut self) -> io::Result<&[u8]> {
        match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.inner.fill_buf())
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))?,
            None => self.inner.fill_buf().await,
        }
    }

    /// Returns the next byte without consuming it, `None` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or times out.
    pub async fn peek(&mut self) -> io::Result<Option<u8>> {
        Ok(self.fill().await?.first().copied())
    }

    /// Consumes and returns the next byte, `None` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or times out.
    pub async fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let byte = self.peek().await?;
        if byte.is_some() {
            self.inner.consume(1);
        }
        Ok(byte)
    }

    /// Consumes the next byte, failing at end of stream.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedEof` if the stream ended.
    pub async fn next_byte(&mut self) -> io::Result<u8> {
        self.read_byte()
            .await?
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"))
    }

    /// Waits until at least one byte is buffered.
    ///
    /// Safe to cancel: buffered data is kept for the next read.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedEof` if the stream ended.
    pub async fn wait_readable(&mut self) -> io::Result<()> {
        match self.inner.fill_buf().await?.first() {
            Some(_) => Ok(()),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed",
            )),
        }
    }

    /// Returns true if no bytes are buffered.
    #[must_use]
    pub fn buffer_is_empty(&self) -> bool {
        self.inner.buffer().is_empty()
    }

    /// Bounded view of the next `length` bytes.
    pub fn fixed_length(&mut self, length: u64) -> FixedLengthReader<'_>
    where
        S: Send,
    {
        FixedLengthReader::new(&mut self.inner, length)
    }

    /// Unwraps the stream, discarding the (empty) read buffer.
    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }

    /// Shared access to the underlying stream.
    pub fn get_ref(&self) -> &S {
        self.inner.get_ref()
    }

    /// Mutable access to the underlying stream.
    pub fn get_mut(&mut self) -> &mut S {
        self.inner.get_mut()
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> PeekableReader<S> {
    /// Writes all bytes and flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn write_all_flush(&mut self, data: &[u8]) -> io::Result<()> {
        let stream = self.inner.get_mut();
        stream.write_all(data).await?;
        stream.flush().await
    }
}

/// Reader over exactly one literal's bytes.
///
/// Reading past the literal is impossible; [`FixedLengthReader::skip_remaining`]
/// discards whatever the consumer did not read.
pub struct FixedLengthReader<'a> {
    inner: Take<&'a mut (dyn AsyncRead + Unpin + Send)>,
    length: u64,
}

impl<'a> FixedLengthReader<'a> {
    /// Bounds `inner` to `length` bytes.
    pub fn new(inner: &'a mut (dyn AsyncRead + Unpin + Send), length: u64) -> Self {
        Self {
            inner: inner.take(length),
            length,
        }
    }

    /// Total literal length.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.length
    }

    /// Returns true for a zero-length literal.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Bytes not yet read.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.inner.limit()
    }

    /// Reads all remaining bytes.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedEof` if the stream ends before the literal does.
    pub async fn read_to_vec(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(usize::try_from(self.remaining()).unwrap_or(0));
        self.inner.read_to_end(&mut out).await?;
        self.check_complete()?;
        Ok(out)
    }

    /// Discards all remaining bytes.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedEof` if the stream ends before the literal does.
    pub async fn skip_remaining(&mut self) -> io::Result<()> {
        tokio::io::copy(&mut self.inner, &mut tokio::io::sink()).await?;
        self.check_complete()
    }

    fn check_complete(&self) -> io::Result<()> {
        if self.inner.limit() == 0 {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside literal",
            ))
        }
    }
}

impl std::fmt::Debug for FixedLengthReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedLengthReader")
            .field("length", &self.length)
            .field("remaining", &self.remaining())
            .finish()
    }
}

impl AsyncRead for FixedLengthReader<'_> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
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
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_peek_does_not_consume() {
        let mock = Builder::new().read(b"ab").build();
        let mut reader = PeekableReader::new(mock);

        assert_eq!(reader.peek().await.unwrap(), Some(b'a'));
        assert_eq!(reader.peek().await.unwrap(), Some(b'a'));
        assert_eq!(reader.read_byte().await.unwrap(), Some(b'a'));
        assert_eq!(reader.read_byte().await.unwrap(), Some(b'b'));
        assert_eq!(reader.read_byte().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fixed_length_skips_unread() {
        let mock = Builder::new().read(b"hello world!rest").build();
        let mut reader = PeekableReader::new(mock);

        {
            let mut literal = reader.fixed_length(12);
            let mut head = [0u8; 5];
            literal.read_exact(&mut head).await.unwrap();
            assert_eq!(&head, b"hello");
            assert_eq!(literal.remaining(), 7);
            literal.skip_remaining().await.unwrap();
        }

        assert_eq!(reader.next_byte().await.unwrap(), b'r');
    }

    #[tokio::test]
    async fn test_fixed_length_cannot_over_read() {
        let mock = Builder::new().read(b"abcXYZ").build();
        let mut reader = PeekableReader::new(mock);

        let data = reader.fixed_length(3).read_to_vec().await.unwrap();
        assert_eq!(data, b"abc");
        assert_eq!(reader.next_byte().await.unwrap(), b'X');
    }

    #[tokio::test]
    async fn test_fixed_length_truncated_stream() {
        let mock = Builder::new().read(b"ab").build();
        let mut reader = PeekableReader::new(mock);

        let err = reader.fixed_length(5).read_to_vec().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let mock = Builder::new().wait(Duration::from_secs(5)).build();
        let mut reader = PeekableReader::new(mock);
        reader.set_read_timeout(Some(Duration::from_millis(10)));

        let err = reader.peek().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
