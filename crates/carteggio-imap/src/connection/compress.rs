//! COMPRESS=DEFLATE stream wrapper (RFC 4978).
//!
//! Both directions use raw DEFLATE without zlib headers. Writes are
//! buffered in the compressor and pushed out with a sync flush whenever the
//! stream is flushed, so each command reaches the server as soon as it is
//! complete.

use std::io;
use std::ops::Range;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

const INPUT_BUFFER: usize = 8 * 1024;

/// Stream that deflates writes and inflates reads.
pub struct DeflateStream<S> {
    inner: S,
    decompress: Decompress,
    compress: Compress,
    compressed: Box<[u8]>,
    compressed_range: Range<usize>,
    reader_eof: bool,
    pending: Vec<u8>,
    pending_pos: usize,
    needs_sync: bool,
}

impl<S> DeflateStream<S> {
    /// Wraps a stream on which compression has just been negotiated.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            decompress: Decompress::new(false),
            compress: Compress::new(Compression::new(3), false),
            compressed: vec![0; INPUT_BUFFER].into_boxed_slice(),
            compressed_range: 0..0,
            reader_eof: false,
            pending: Vec::new(),
            pending_pos: 0,
            needs_sync: false,
        }
    }

    /// Returns the wrapped stream.
    pub const fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S> std::fmt::Debug for DeflateStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeflateStream")
            .field("total_in", &self.decompress.total_in())
            .field("total_out", &self.compress.total_out())
            .finish_non_exhaustive()
    }
}

fn delta(after: u64, before: u64) -> usize {
    usize::try_from(after - before).unwrap_or(usize::MAX)
}

fn zlib_error(err: impl std::error::Error + Send + Sync + 'static) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

impl<S: AsyncRead + Unpin> AsyncRead for DeflateStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        dst: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if dst.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        loop {
            // Squeeze out whatever the decompressor can produce first.
            let before_in = this.decompress.total_in();
            let before_out = this.decompress.total_out();
            let flush = if this.reader_eof {
                FlushDecompress::Finish
            } else {
                FlushDecompress::Sync
            };
            this.decompress
                .decompress(
                    &this.compressed[this.compressed_range.clone()],
                    dst.initialize_unfilled(),
                    flush,
                )
                .map_err(zlib_error)?;
            let after_in = this.decompress.total_in();
            let after_out = this.decompress.total_out();

            this.compressed_range.start += delta(after_in, before_in);
            if after_out != before_out || this.reader_eof {
                dst.advance(delta(after_out, before_out));
                return Poll::Ready(Ok(()));
            }

            if this.compressed_range.is_empty() {
                let mut buf = ReadBuf::new(&mut this.compressed);
                ready!(Pin::new(&mut this.inner).poll_read(cx, &mut buf))?;
                let filled = buf.filled().len();
                this.compressed_range = 0..filled;
                this.reader_eof = filled == 0;
            } else if after_in == before_in {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "deflate stream stalled",
                )));
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> DeflateStream<S> {
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while self.pending_pos < self.pending.len() {
            let written =
                ready!(Pin::new(&mut self.inner).poll_write(cx, &self.pending[self.pending_pos..]))?;
            if written == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.pending_pos += written;
        }
        self.pending.clear();
        self.pending_pos = 0;
        Poll::Ready(Ok(()))
    }

    /// Ends the current deflate block with an empty stored block so the
    /// peer can inflate everything written so far. Repeating the flush only
    /// continues output that did not fit; it never starts another block.
    fn sync_flush(&mut self) -> io::Result<()> {
        loop {
            self.pending.reserve(INPUT_BUFFER);
            self.compress
                .compress_vec(&[], &mut self.pending, FlushCompress::Sync)
                .map_err(zlib_error)?;
            if self.pending.len() < self.pending.capacity() {
                return Ok(());
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for DeflateStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        loop {
            let before_in = this.compress.total_in();
            this.pending.reserve(buf.len() + 64);
            this.compress
                .compress_vec(buf, &mut this.pending, FlushCompress::None)
                .map_err(zlib_error)?;
            let consumed = delta(this.compress.total_in(), before_in);
            if consumed > 0 {
                this.needs_sync = true;
                return Poll::Ready(Ok(consumed));
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.needs_sync {
            this.sync_flush()?;
            this.needs_sync = false;
        }
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        ready!(self.as_mut().poll_flush(cx))?;
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
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
    use std::io::{Read, Write};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_write_side_is_raw_deflate() {
        let mut stream = DeflateStream::new(Vec::new());
        stream.write_all(b"A0005 NOOP\r\n").await.unwrap();
        stream.flush().await.unwrap();

        let mut decoder = flate2::read::DeflateDecoder::new(stream.get_ref().as_slice());
        let mut out = Vec::new();
        // A sync-flushed stream has no final block; read what is there.
        let _ = decoder.read_to_end(&mut out);
        assert_eq!(out, b"A0005 NOOP\r\n");
    }

    #[tokio::test]
    async fn test_read_side_inflates() {
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"* 3 EXISTS\r\n").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut stream = DeflateStream::new(compressed.as_slice());
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"* 3 EXISTS\r\n");
    }

    #[tokio::test]
    async fn test_duplex_exchange() {
        let (a, b) = tokio::io::duplex(1024);
        let mut client = DeflateStream::new(a);
        let mut server = DeflateStream::new(b);

        client.write_all(b"A0001 IDLE\r\n").await.unwrap();
        client.flush().await.unwrap();
        let mut line = [0u8; 12];
        server.read_exact(&mut line).await.unwrap();
        assert_eq!(&line, b"A0001 IDLE\r\n");

        server.write_all(b"+ idling\r\n").await.unwrap();
        server.flush().await.unwrap();
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"+ idling\r\n");
    }

    #[test]
    fn test_sync_flush_writes_one_marker() {
        let mut stream = DeflateStream::new(Vec::<u8>::new());
        stream
            .compress
            .compress_vec(b"A0005 NOOP\r\n", &mut stream.pending, FlushCompress::None)
            .unwrap();
        stream.sync_flush().unwrap();
        assert!(stream.pending.ends_with(&[0x00, 0x00, 0xff, 0xff]));
        let mut decoder = flate2::read::DeflateDecoder::new(stream.pending.as_slice());
        let mut out = Vec::new();
        let _ = decoder.read_to_end(&mut out);
        assert_eq!(out, b"A0005 NOOP\r\n");
    }

    #[tokio::test]
    async fn test_flush_larger_than_output_reserve() {
        let body: Vec<u8> = (0..200_000u32)
            .map(|i| u8::try_from(i.wrapping_mul(2_654_435_761) >> 24).unwrap())
            .collect();
        let mut stream = DeflateStream::new(Vec::new());
        stream.write_all(&body).await.unwrap();
        stream.flush().await.unwrap();

        let mut decoder = flate2::read::DeflateDecoder::new(stream.get_ref().as_slice());
        let mut out = Vec::new();
        let _ = decoder.read_to_end(&mut out);
        assert_eq!(out, body);
    }
}
