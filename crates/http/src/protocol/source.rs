use std::fmt;
use std::io::{self, Read};

/// A readable byte source streamed as response content.
///
/// The connection calls [`close`](ByteSource::close) exactly once: after the last read,
/// when the response ends early, or right away if the request was `HEAD`.
#[cfg_attr(test, mockall::automock)]
pub trait ByteSource {
    /// Reads into `buf`, returning 0 at the end of the source.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn close(&mut self);
}

/// Adapts any [`Read`] into a [`ByteSource`]; closing drops the reader.
pub struct ReadSource<R> {
    reader: Option<R>,
}

impl<R: Read> ReadSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader: Some(reader) }
    }
}

impl<R: Read> ByteSource for ReadSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reader.as_mut() {
            Some(reader) => reader.read(buf),
            None => Ok(0),
        }
    }

    fn close(&mut self) {
        self.reader = None;
    }
}

impl<R> fmt::Debug for ReadSource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadSource").field("open", &self.reader.is_some()).finish()
    }
}
