use std::io::{self, Read, Write};

use mio::event::Source;

/// A non-blocking byte stream that can be registered with the selector.
///
/// Implemented for every `Read + Write + Source`, which covers `mio::net::TcpStream`
/// and boxed transports handed to protocol upgrade callbacks.
pub trait Transport: Read + Write + Source {}

impl<T: Read + Write + Source> Transport for T {}

/// Result of a single non-blocking read or write attempt.
#[derive(Debug)]
pub enum IoOutcome {
    /// `n` bytes were transferred. For reads, zero means the peer closed its side.
    Progressed(usize),
    /// The stream has no data or no room right now. Wait for the next readiness event.
    WouldBlock,
    Failed(io::Error),
}

impl IoOutcome {
    pub(crate) fn read<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Self {
        loop {
            match reader.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                result => return Self::from(result),
            }
        }
    }

    pub(crate) fn write<W: Write + ?Sized>(writer: &mut W, buf: &[u8]) -> Self {
        loop {
            match writer.write(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Ok(0) => return Self::Failed(io::ErrorKind::WriteZero.into()),
                result => return Self::from(result),
            }
        }
    }
}

impl From<io::Result<usize>> for IoOutcome {
    fn from(result: io::Result<usize>) -> Self {
        match result {
            Ok(n) => Self::Progressed(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Self::WouldBlock,
            Err(e) => Self::Failed(e),
        }
    }
}
