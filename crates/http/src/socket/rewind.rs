use std::fmt;
use std::io::{self, Read, Write};

use bytes::{Buf, Bytes};
use mio::event::Source;
use mio::{Interest, Registry, Token};

/// A stream handed out by a detached connection, together with the bytes the connection
/// had already read from it but not consumed.
///
/// Reads return those bytes first and only then reach the stream. A new owner waiting
/// for readiness must drain [`buffered`](Self::buffered) bytes before it waits, since
/// the selector will not report them again.
pub struct Rewind<T> {
    prefix: Bytes,
    inner: T,
}

impl<T> Rewind<T> {
    pub fn new(inner: T, prefix: Bytes) -> Self {
        Self { prefix, inner }
    }

    /// The read-ahead bytes not returned by `read` yet.
    #[inline]
    pub fn buffered(&self) -> &[u8] {
        &self.prefix
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_parts(self) -> (T, Bytes) {
        (self.inner, self.prefix)
    }
}

impl<T: Read> Read for Rewind<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.prefix.is_empty() {
            return self.inner.read(buf);
        }
        let n = self.prefix.len().min(buf.len());
        buf[..n].copy_from_slice(&self.prefix[..n]);
        self.prefix.advance(n);
        Ok(n)
    }
}

impl<T: Write> Write for Rewind<T> {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<T: Source> Source for Rewind<T> {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.inner.register(registry, token, interests)
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.inner.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.inner.deregister(registry)
    }
}

impl<T> fmt::Debug for Rewind<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rewind").field("buffered", &self.prefix.len()).finish_non_exhaustive()
    }
}
