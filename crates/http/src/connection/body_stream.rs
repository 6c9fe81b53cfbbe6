use std::fmt;

use tracing::warn;

use crate::codec::{CHUNK_HEAD_ROOM, ChunkedEncoder, LAST_CHUNK};
use crate::protocol::ByteSource;
use crate::socket::{TcpConnection, Transport};

/// What the connection does after a piece of streamed content was queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// A piece was queued; call again once it is sent.
    Sent,
    /// The content is complete and sent.
    Finished,
    /// The source or the connection failed.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delimiting {
    Length { remaining: u64 },
    Chunked,
}

/// Streams a [`ByteSource`] through the send slot of a connection.
///
/// The source is closed exactly once: at its end, on failure, or when the stream is
/// dropped early because the connection went away.
pub(crate) struct BodyStream {
    source: Option<Box<dyn ByteSource>>,
    delimiting: Delimiting,
    finished: bool,
}

impl BodyStream {
    /// A stream announced with `content_length`, or chunked if the length is unknown or zero.
    pub(crate) fn new(source: Box<dyn ByteSource>, content_length: Option<u64>) -> Self {
        let delimiting = match content_length {
            Some(remaining) if remaining > 0 => Delimiting::Length { remaining },
            _ => Delimiting::Chunked,
        };
        Self { source: Some(source), delimiting, finished: false }
    }

    #[inline]
    pub(crate) fn is_chunked(&self) -> bool {
        self.delimiting == Delimiting::Chunked
    }

    /// Reads the next piece of content and queues it on `tcp`.
    pub(crate) fn advance<T: Transport>(&mut self, tcp: &mut TcpConnection<T>) -> Step {
        if self.finished {
            return Step::Finished;
        }
        let Some(source) = self.source.as_mut() else {
            return Step::Finished;
        };
        let Some(slot) = tcp.send_slot_mut() else {
            return Step::Failed;
        };

        let queued = match &mut self.delimiting {
            Delimiting::Chunked => {
                let window = ChunkedEncoder::payload_window(slot.len());
                if window.is_empty() {
                    return Step::Failed;
                }
                match source.read(&mut slot[window]) {
                    Ok(0) => {
                        self.finish();
                        tcp.send_bytes(LAST_CHUNK)
                    }
                    Ok(n) => {
                        let framed = ChunkedEncoder.frame(slot, n);
                        tcp.send_slot_range(framed)
                    }
                    Err(e) => {
                        warn!(cause = %e, "failed to read streamed content");
                        self.close_source();
                        return Step::Failed;
                    }
                }
            }
            Delimiting::Length { remaining } => {
                let limit = usize::try_from(*remaining).map_or(slot.len(), |remaining| remaining.min(slot.len()));
                match source.read(&mut slot[..limit]) {
                    Ok(0) => {
                        warn!(missing = *remaining, "streamed content ended before its announced length");
                        self.close_source();
                        return Step::Failed;
                    }
                    Ok(n) => {
                        *remaining -= n as u64;
                        if *remaining == 0 {
                            self.finish();
                        }
                        tcp.send_from_slot(Some(n))
                    }
                    Err(e) => {
                        warn!(cause = %e, "failed to read streamed content");
                        self.close_source();
                        return Step::Failed;
                    }
                }
            }
        };

        match queued {
            Ok(()) => Step::Sent,
            Err(e) => {
                warn!(cause = %e, "failed to queue streamed content");
                self.close_source();
                Step::Failed
            }
        }
    }

    /// Closes the source without reading from it.
    pub(crate) fn close_source(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.close_source();
    }
}

impl Drop for BodyStream {
    fn drop(&mut self) {
        self.close_source();
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyStream")
            .field("delimiting", &self.delimiting)
            .field("finished", &self.finished)
            .field("source_open", &self.source.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::buffer::SlotPool;
    use crate::protocol::{MockByteSource, ReadSource};
    use crate::socket::{Completion, TcpConnection};
    use crate::testing::{ScriptedStream, peer};

    fn connection(slot_size: usize) -> (TcpConnection<ScriptedStream>, std::rc::Rc<std::cell::RefCell<Vec<u8>>>) {
        let stream = ScriptedStream::new();
        let written = stream.written();
        let slots = SlotPool::new(1, slot_size).acquire().unwrap();
        (TcpConnection::new(stream, peer(), slots), written)
    }

    fn pump(stream: &mut BodyStream, tcp: &mut TcpConnection<ScriptedStream>) -> Step {
        loop {
            match stream.advance(tcp) {
                Step::Sent => assert_eq!(tcp.poll_write(), Some(Completion::Sent)),
                step => return step,
            }
        }
    }

    #[test]
    fn chunked_stream_frames_each_read() {
        let (mut tcp, written) = connection(64);
        let mut stream = BodyStream::new(Box::new(ReadSource::new(&b"hello"[..])), None);
        assert!(stream.is_chunked());

        assert_eq!(pump(&mut stream, &mut tcp), Step::Finished);
        assert_eq!(written.borrow().as_slice(), b"5\r\nhello\r\n0\r\n\r\n");
    }

    #[test]
    fn chunked_stream_splits_at_slot_size() {
        let (mut tcp, written) = connection(24);
        let content = b"0123456789";
        let mut stream = BodyStream::new(Box::new(ReadSource::new(&content[..])), Some(0));

        assert_eq!(pump(&mut stream, &mut tcp), Step::Finished);
        assert_eq!(written.borrow().as_slice(), b"4\r\n0123\r\n4\r\n4567\r\n2\r\n89\r\n0\r\n\r\n");
    }

    #[test]
    fn known_length_stream_is_sent_raw() {
        let (mut tcp, written) = connection(64);
        let mut stream = BodyStream::new(Box::new(ReadSource::new(&b"hello world"[..])), Some(5));

        assert_eq!(pump(&mut stream, &mut tcp), Step::Finished);
        assert_eq!(written.borrow().as_slice(), b"hello");
    }

    #[test]
    fn read_error_closes_source_once() {
        let (mut tcp, _written) = connection(64);
        let mut source = MockByteSource::new();
        source.expect_read().times(1).returning(|_| Err(io::ErrorKind::Other.into()));
        source.expect_close().times(1).return_const(());

        let mut stream = BodyStream::new(Box::new(source), None);
        assert_eq!(stream.advance(&mut tcp), Step::Failed);
        drop(stream);
    }

    #[test]
    fn dropping_unfinished_stream_closes_source() {
        let mut source = MockByteSource::new();
        source.expect_read().never();
        source.expect_close().times(1).return_const(());

        drop(BodyStream::new(Box::new(source), Some(10)));
    }

    #[test]
    fn short_source_fails_known_length_stream() {
        let (mut tcp, _written) = connection(64);
        let mut stream = BodyStream::new(Box::new(ReadSource::new(&b"abc"[..])), Some(10));

        assert_eq!(pump(&mut stream, &mut tcp), Step::Failed);
    }
}
