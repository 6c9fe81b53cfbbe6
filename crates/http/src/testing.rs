//! In-memory transports for unit tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::rc::Rc;

use mio::event::Source;
use mio::{Interest, Registry, Token};

pub(crate) fn peer() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 40000))
}

enum Step {
    Data(Vec<u8>),
    WouldBlock,
    Eof,
}

/// A non-blocking stream that replays a script of reads and records writes.
///
/// Once the script is exhausted every read reports `WouldBlock`.
pub(crate) struct ScriptedStream {
    reads: VecDeque<Step>,
    written: Rc<RefCell<Vec<u8>>>,
    dropped: Rc<Cell<bool>>,
    write_limit: usize,
    blocked_writes: usize,
    failing_writes: bool,
}

impl ScriptedStream {
    pub(crate) fn new() -> Self {
        Self {
            reads: VecDeque::new(),
            written: Rc::default(),
            dropped: Rc::default(),
            write_limit: usize::MAX,
            blocked_writes: 0,
            failing_writes: false,
        }
    }

    pub(crate) fn with_read(mut self, data: &[u8]) -> Self {
        self.reads.push_back(Step::Data(data.to_vec()));
        self
    }

    pub(crate) fn with_would_block(mut self) -> Self {
        self.reads.push_back(Step::WouldBlock);
        self
    }

    pub(crate) fn with_eof(mut self) -> Self {
        self.reads.push_back(Step::Eof);
        self
    }

    pub(crate) fn with_write_limit(mut self, limit: usize) -> Self {
        self.write_limit = limit;
        self
    }

    pub(crate) fn with_blocked_writes(mut self, count: usize) -> Self {
        self.blocked_writes = count;
        self
    }

    pub(crate) fn with_failing_writes(mut self) -> Self {
        self.failing_writes = true;
        self
    }

    pub(crate) fn written(&self) -> Rc<RefCell<Vec<u8>>> {
        Rc::clone(&self.written)
    }

    pub(crate) fn dropped(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.dropped)
    }
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reads.pop_front() {
            Some(Step::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.reads.push_front(Step::Data(data.split_off(n)));
                }
                Ok(n)
            }
            Some(Step::Eof) => {
                self.reads.push_front(Step::Eof);
                Ok(0)
            }
            Some(Step::WouldBlock) | None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.failing_writes {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        if self.blocked_writes > 0 {
            self.blocked_writes -= 1;
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(self.write_limit);
        self.written.borrow_mut().extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Source for ScriptedStream {
    fn register(&mut self, _registry: &Registry, _token: Token, _interests: Interest) -> io::Result<()> {
        Ok(())
    }

    fn reregister(&mut self, _registry: &Registry, _token: Token, _interests: Interest) -> io::Result<()> {
        Ok(())
    }

    fn deregister(&mut self, _registry: &Registry) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        self.dropped.set(true);
    }
}
