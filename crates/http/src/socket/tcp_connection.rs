//! Buffered TCP connection with readiness-driven receive and send operations.
//!
//! A [`TcpConnection`] owns a non-blocking stream and the [`SlotPair`] loaned to it.
//! The receive slot doubles as a read-ahead buffer: bytes that arrive beyond the end of
//! the current line stay in the slot and feed the next receive operation, so a client
//! that pipelines its request line and headers in one segment costs a single `read`.
//!
//! At most one receive and one send may be in flight at a time. Starting a second one
//! fails with [`SocketError::AlreadyReceiving`] or [`SocketError::AlreadySending`] and
//! leaves the pending operation untouched.
//!
//! A line may be as long as the slot. When the slot fills up before the terminator
//! shows, up to two more bytes are read aside so that a `\n` or `\r\n` right after a
//! full slot still completes the line.
//!
//! Detaching keeps the unconsumed read-ahead: [`release`](AsyncSocket::release) hands out a
//! [`Rewind`] that returns those bytes before reading from the stream again.
//!
//! Operations complete in [`poll_read`](TcpConnection::poll_read) and
//! [`poll_write`](TcpConnection::poll_write), which move as many bytes as the stream
//! accepts and stop on `WouldBlock`. The connection remembers that it was blocked and
//! does not touch the stream again until the registry reports new readiness.

use std::fmt;
use std::net::SocketAddr;
use std::ops::Range;
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use mio::Interest;
use mio::event::Source;
use tracing::{debug, trace, warn};

use crate::buffer::{BufferSlot, SlotPair};
use crate::ensure;
use crate::registry::interest_of;
use crate::socket::{AsyncSocket, ClosedReason, IoOutcome, LineEncoding, Released, Rewind, SocketError, Transport};

type ClosedHook = Box<dyn FnOnce(ClosedReason)>;

/// A finished receive or send operation.
#[derive(Debug, PartialEq, Eq)]
pub enum Completion {
    /// A line without its terminator, or `None` if it could not be decoded.
    Line(Option<String>),
    /// `n` bytes are available through [`TcpConnection::received`].
    Data(usize),
    /// Everything queued for sending was handed to the stream.
    Sent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Open,
    Closed(ClosedReason),
    Detached,
}

enum ReadState {
    Idle,
    /// `scanned` bytes of the buffered data are known not to contain a line feed.
    Line { encoding: LineEncoding, scanned: usize, tail: LineTail },
    Fixed { size: usize, target: Target },
}

/// Bytes read past a full receive slot while looking for the end of the line.
#[derive(Clone, Copy, Default)]
struct LineTail {
    bytes: [u8; 2],
    len: usize,
}

impl LineTail {
    fn is_full(&self) -> bool {
        self.len == self.bytes.len()
    }

    fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Decides a line that fills the whole slot. Its content may keep every byte of
    /// `line` but nothing more.
    fn scan(&self, line: &[u8]) -> LineScan {
        match self.as_slice() {
            [] | [b'\r'] => LineScan::Incomplete,
            [b'\n', ..] => LineScan::Complete { content: strip_cr(line).len(), consumed: line.len(), rest: 1 },
            [b'\r', b'\n'] => LineScan::Complete { content: line.len(), consumed: line.len(), rest: 2 },
            _ => LineScan::TooLong,
        }
    }
}

enum LineScan {
    Incomplete,
    TooLong,
    /// `content` bytes form the line, `consumed` bytes leave the slot and the tail bytes
    /// from `rest` on are read-ahead of what follows.
    Complete { content: usize, consumed: usize, rest: usize },
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line {
        [line @ .., b'\r'] => line,
        line => line,
    }
}

enum Target {
    Slot,
    Overflow { buf: Vec<u8>, filled: usize },
}

enum Received {
    Slot(Range<usize>),
    Overflow(Vec<u8>),
}

enum WriteState {
    Idle,
    Bytes(BytesMut),
    Slot { start: usize, end: usize },
}

struct RecvBuffer {
    slot: BufferSlot,
    start: usize,
    end: usize,
}

impl RecvBuffer {
    fn new(slot: BufferSlot) -> Self {
        Self { slot, start: 0, end: 0 }
    }

    fn buffered(&self) -> &[u8] {
        &self.slot.as_slice()[self.start..self.end]
    }

    fn len(&self) -> usize {
        self.end - self.start
    }

    fn is_full(&self) -> bool {
        self.len() == self.slot.capacity()
    }

    fn consume(&mut self, n: usize) {
        self.start += n;
        if self.start == self.end {
            self.clear();
        }
    }

    fn compact(&mut self) {
        if self.start > 0 {
            self.slot.as_mut_slice().copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
    }

    fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    /// Appends `bytes` behind the buffered data. The caller makes sure they fit.
    fn push(&mut self, bytes: &[u8]) {
        self.compact();
        let end = self.end + bytes.len();
        self.slot.as_mut_slice()[self.end..end].copy_from_slice(bytes);
        self.end = end;
    }
}

pub struct TcpConnection<T> {
    stream: Option<T>,
    peer: SocketAddr,
    recv: RecvBuffer,
    send: BufferSlot,
    read: ReadState,
    write: WriteState,
    received: Option<Received>,
    read_ahead: Bytes,
    read_ready: bool,
    write_ready: bool,
    deadline: Option<Instant>,
    lifecycle: Lifecycle,
    on_closed: Option<ClosedHook>,
}

impl<T: Transport> TcpConnection<T> {
    pub fn new(stream: T, peer: SocketAddr, slots: SlotPair) -> Self {
        let SlotPair { recv, send } = slots;
        Self {
            stream: Some(stream),
            peer,
            recv: RecvBuffer::new(recv),
            send,
            read: ReadState::Idle,
            write: WriteState::Idle,
            received: None,
            read_ahead: Bytes::new(),
            read_ready: true,
            write_ready: true,
            deadline: None,
            lifecycle: Lifecycle::Open,
            on_closed: None,
        }
    }

    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.lifecycle == Lifecycle::Open
    }

    pub fn closed_reason(&self) -> Option<ClosedReason> {
        match self.lifecycle {
            Lifecycle::Open => None,
            Lifecycle::Closed(reason) => Some(reason),
            Lifecycle::Detached => Some(ClosedReason::Detached),
        }
    }

    /// Registers a hook that runs exactly once when the connection is closed or detached.
    pub fn set_on_closed<F>(&mut self, on_closed: F)
    where
        F: FnOnce(ClosedReason) + 'static,
    {
        self.on_closed = Some(Box::new(on_closed));
    }

    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Arms the expiry deadline `timeout` from now.
    pub fn expire_after(&mut self, timeout: Duration) {
        self.deadline = Instant::now().checked_add(timeout);
    }

    pub fn clear_deadline(&mut self) {
        self.deadline = None;
    }

    #[inline]
    pub fn is_receiving(&self) -> bool {
        !matches!(self.read, ReadState::Idle)
    }

    #[inline]
    pub fn is_sending(&self) -> bool {
        !matches!(self.write, WriteState::Idle)
    }

    /// Size of the send slot, which bounds [`send_from_slot`](Self::send_from_slot).
    #[inline]
    pub fn slot_size(&self) -> usize {
        self.send.capacity()
    }

    /// Starts receiving one line terminated by `\n`.
    ///
    /// The line is delivered without the `\n` and without a `\r` directly in front of it.
    /// A line whose content is longer than the receive slot closes the connection with
    /// [`ClosedReason::Error`].
    pub fn recv_line(&mut self, encoding: LineEncoding, timeout: Option<Duration>) -> Result<(), SocketError> {
        ensure!(self.is_open(), SocketError::NotConnected);
        ensure!(!self.is_receiving(), SocketError::AlreadyReceiving);

        self.received = None;
        self.read = ReadState::Line { encoding, scanned: 0, tail: LineTail::default() };
        if let Some(timeout) = timeout {
            self.expire_after(timeout);
        }
        Ok(())
    }

    /// Starts receiving exactly `size` bytes, or a full slot if `size` is `None`.
    ///
    /// Sizes up to the slot capacity are received into the slot. Larger sizes get a
    /// dedicated buffer; [`SocketError::OutOfMemory`] is returned if it cannot be allocated.
    pub fn recv_data(&mut self, size: Option<usize>, timeout: Option<Duration>) -> Result<(), SocketError> {
        ensure!(self.is_open(), SocketError::NotConnected);
        ensure!(!self.is_receiving(), SocketError::AlreadyReceiving);
        let size = size.unwrap_or_else(|| self.recv.slot.capacity());
        ensure!(size > 0, SocketError::invalid_size(size));

        self.received = None;
        let target = if self.recv.slot.fits(size) {
            self.recv.compact();
            Target::Slot
        } else {
            let mut buf = BufferSlot::overflow(size).map_err(|e| {
                debug!(size, cause = %e, "failed to allocate receive buffer");
                SocketError::out_of_memory(size)
            })?;
            let filled = self.recv.len().min(size);
            buf[..filled].copy_from_slice(&self.recv.buffered()[..filled]);
            self.recv.consume(filled);
            Target::Overflow { buf, filled }
        };

        self.read = ReadState::Fixed { size, target };
        if let Some(timeout) = timeout {
            self.expire_after(timeout);
        }
        Ok(())
    }

    /// The bytes delivered by the last [`Completion::Data`].
    ///
    /// The view stays valid until the next receive operation is started.
    pub fn received(&self) -> &[u8] {
        match &self.received {
            Some(Received::Slot(range)) => &self.recv.slot.as_slice()[range.clone()],
            Some(Received::Overflow(buf)) => buf,
            None => &[],
        }
    }

    /// Queues `data` for sending, appending to bytes that are still pending.
    pub fn send_bytes(&mut self, data: &[u8]) -> Result<(), SocketError> {
        ensure!(self.is_open(), SocketError::NotConnected);
        ensure!(!data.is_empty(), SocketError::invalid_size(0));

        self.write = match std::mem::replace(&mut self.write, WriteState::Idle) {
            WriteState::Idle => WriteState::Bytes(BytesMut::from(data)),
            WriteState::Bytes(mut pending) => {
                pending.extend_from_slice(data);
                WriteState::Bytes(pending)
            }
            WriteState::Slot { start, end } => {
                let mut pending = BytesMut::with_capacity(end - start + data.len());
                pending.extend_from_slice(&self.send.as_slice()[start..end]);
                pending.extend_from_slice(data);
                WriteState::Bytes(pending)
            }
        };
        Ok(())
    }

    /// Grants write access to the send slot, or `None` while a send is pending.
    pub fn send_slot_mut(&mut self) -> Option<&mut [u8]> {
        if self.is_sending() { None } else { Some(self.send.as_mut_slice()) }
    }

    /// Sends the first `size` bytes of the send slot, or all of it if `size` is `None`.
    pub fn send_from_slot(&mut self, size: Option<usize>) -> Result<(), SocketError> {
        let size = size.unwrap_or_else(|| self.send.capacity());
        self.send_slot_range(0..size)
    }

    /// Sends `range` of the send slot.
    pub fn send_slot_range(&mut self, range: Range<usize>) -> Result<(), SocketError> {
        ensure!(self.is_open(), SocketError::NotConnected);
        ensure!(!self.is_sending(), SocketError::AlreadySending);
        ensure!(!range.is_empty() && range.end <= self.send.capacity(), SocketError::invalid_size(range.len()));

        self.write = WriteState::Slot { start: range.start, end: range.end };
        Ok(())
    }

    /// Records that the stream reported read readiness.
    #[inline]
    pub fn readable(&mut self) {
        self.read_ready = true;
    }

    /// Records that the stream reported write readiness.
    #[inline]
    pub fn writable(&mut self) {
        self.write_ready = true;
    }

    /// Advances the pending receive operation.
    ///
    /// Returns the completion once the operation finished, or `None` if it needs more
    /// bytes, nothing is pending, or the connection closed while reading.
    pub fn poll_read(&mut self) -> Option<Completion> {
        loop {
            let completion = match self.read {
                ReadState::Idle => return None,
                ReadState::Line { .. } => self.take_line(),
                ReadState::Fixed { .. } => self.take_data(),
            };
            if completion.is_some() {
                return completion;
            }
            if !self.read_ready || !self.fill() {
                return None;
            }
        }
    }

    /// Advances the pending send operation.
    ///
    /// A failed write abandons the pending bytes without a completion; the owner learns
    /// about the broken connection from its deadline or from the next read.
    pub fn poll_write(&mut self) -> Option<Completion> {
        if !self.write_ready {
            return None;
        }
        let stream = self.stream.as_mut()?;
        loop {
            let pending = match &self.write {
                WriteState::Idle => return None,
                WriteState::Bytes(pending) => &pending[..],
                WriteState::Slot { start, end } => &self.send.as_slice()[*start..*end],
            };
            let remaining = pending.len();

            match IoOutcome::write(stream, pending) {
                IoOutcome::Progressed(n) if n >= remaining => {
                    self.write = WriteState::Idle;
                    return Some(Completion::Sent);
                }
                IoOutcome::Progressed(n) => match &mut self.write {
                    WriteState::Bytes(pending) => pending.advance(n),
                    WriteState::Slot { start, .. } => *start += n,
                    WriteState::Idle => return None,
                },
                IoOutcome::WouldBlock => {
                    self.write_ready = false;
                    return None;
                }
                IoOutcome::Failed(e) => {
                    debug!(peer = %self.peer, cause = %e, "send failed, dropping pending bytes");
                    self.write = WriteState::Idle;
                    return None;
                }
            }
        }
    }

    /// Closes the connection and runs the close hook.
    pub fn close(&mut self, reason: ClosedReason) -> bool {
        self.shutdown(reason, true)
    }

    /// Closes the connection without running the close hook.
    pub fn close_quietly(&mut self, reason: ClosedReason) -> bool {
        self.shutdown(reason, false)
    }

    /// Stops managing the stream but keeps it open.
    ///
    /// Pending operations are dropped and the close hook runs with
    /// [`ClosedReason::Detached`]. The stream is handed out by [`AsyncSocket::release`],
    /// wrapped in a [`Rewind`] that keeps the bytes read ahead but not consumed.
    pub fn detach(&mut self) -> bool {
        if !self.is_open() {
            return false;
        }
        self.read_ahead = self.unconsumed();
        self.reset();
        self.lifecycle = Lifecycle::Detached;
        trace!(peer = %self.peer, "connection detached");
        if let Some(on_closed) = self.on_closed.take() {
            on_closed(ClosedReason::Detached);
        }
        true
    }

    /// The readiness the pending operations are waiting for.
    pub fn interest(&self) -> Option<Interest> {
        if self.is_open() { interest_of(self.is_receiving(), self.is_sending()) } else { None }
    }

    fn shutdown(&mut self, reason: ClosedReason, notify: bool) -> bool {
        if !self.is_open() {
            return false;
        }
        self.flush_once();
        self.reset();
        // dropping the stream closes the descriptor
        self.stream = None;
        self.lifecycle = Lifecycle::Closed(reason);
        trace!(peer = %self.peer, %reason, "connection closed");
        if let Some(on_closed) = self.on_closed.take()
            && notify
        {
            on_closed(reason);
        }
        true
    }

    /// Makes one best-effort attempt to hand pending bytes to the stream.
    fn flush_once(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        let pending = match &self.write {
            WriteState::Idle => return,
            WriteState::Bytes(pending) => &pending[..],
            WriteState::Slot { start, end } => &self.send.as_slice()[*start..*end],
        };
        if let IoOutcome::Failed(e) = IoOutcome::write(stream, pending) {
            debug!(peer = %self.peer, cause = %e, "failed to flush before close");
        }
    }

    fn unconsumed(&self) -> Bytes {
        let mut unconsumed = BytesMut::from(self.recv.buffered());
        match &self.read {
            ReadState::Line { tail, .. } => unconsumed.extend_from_slice(tail.as_slice()),
            ReadState::Fixed { target: Target::Overflow { buf, filled }, .. } => {
                unconsumed.extend_from_slice(&buf[..*filled]);
            }
            ReadState::Idle | ReadState::Fixed { target: Target::Slot, .. } => {}
        }
        unconsumed.freeze()
    }

    fn reset(&mut self) {
        self.read = ReadState::Idle;
        self.write = WriteState::Idle;
        self.received = None;
        self.recv.clear();
        self.deadline = None;
    }

    fn take_line(&mut self) -> Option<Completion> {
        let ReadState::Line { encoding, scanned, tail } = &mut self.read else {
            return None;
        };
        let buffered = self.recv.buffered();
        let scan = match buffered[*scanned..].iter().position(|&b| b == b'\n') {
            Some(offset) => {
                let end = *scanned + offset;
                LineScan::Complete { content: strip_cr(&buffered[..end]).len(), consumed: end + 1, rest: 0 }
            }
            None => {
                *scanned = buffered.len();
                if self.recv.is_full() { tail.scan(buffered) } else { LineScan::Incomplete }
            }
        };

        match scan {
            LineScan::Incomplete => None,
            LineScan::TooLong => {
                warn!(peer = %self.peer, limit = self.recv.slot.capacity(), "line exceeds receive buffer");
                self.close(ClosedReason::Error);
                None
            }
            LineScan::Complete { content, consumed, rest } => {
                let line = encoding.decode(&buffered[..content]);
                let tail = *tail;
                self.recv.consume(consumed);
                if let Some(rest) = tail.as_slice().get(rest..) {
                    self.recv.push(rest);
                }
                self.read = ReadState::Idle;
                self.deadline = None;
                Some(Completion::Line(line))
            }
        }
    }

    fn take_data(&mut self) -> Option<Completion> {
        let received = match std::mem::replace(&mut self.read, ReadState::Idle) {
            ReadState::Fixed { size, target: Target::Slot } if self.recv.len() >= size => {
                let start = self.recv.start;
                self.recv.consume(size);
                Received::Slot(start..start + size)
            }
            ReadState::Fixed { size, target: Target::Overflow { buf, filled } } if filled >= size => {
                Received::Overflow(buf)
            }
            pending => {
                self.read = pending;
                return None;
            }
        };

        let size = match &received {
            Received::Slot(range) => range.len(),
            Received::Overflow(buf) => buf.len(),
        };
        self.received = Some(received);
        self.deadline = None;
        Some(Completion::Data(size))
    }

    /// Reads once from the stream. Returns true if new bytes arrived.
    fn fill(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };

        let outcome = match &mut self.read {
            ReadState::Idle => return false,
            ReadState::Line { tail, .. } if self.recv.is_full() => {
                if tail.is_full() {
                    return false;
                }
                let len = tail.len;
                let outcome = IoOutcome::read(stream, &mut tail.bytes[len..]);
                if let IoOutcome::Progressed(n) = outcome {
                    tail.len += n;
                }
                outcome
            }
            ReadState::Fixed { size, target: Target::Overflow { buf, filled } } => {
                let outcome = IoOutcome::read(stream, &mut buf[*filled..*size]);
                if let IoOutcome::Progressed(n) = outcome {
                    *filled += n;
                }
                outcome
            }
            ReadState::Line { .. } | ReadState::Fixed { target: Target::Slot, .. } => {
                self.recv.compact();
                let end = self.recv.end;
                let tail = &mut self.recv.slot.as_mut_slice()[end..];
                if tail.is_empty() {
                    return false;
                }
                let outcome = IoOutcome::read(stream, tail);
                if let IoOutcome::Progressed(n) = outcome {
                    self.recv.end += n;
                }
                outcome
            }
        };

        match outcome {
            IoOutcome::Progressed(0) => {
                self.close(ClosedReason::ClosedByPeer);
                false
            }
            IoOutcome::Progressed(_) => true,
            IoOutcome::WouldBlock => {
                self.read_ready = false;
                false
            }
            IoOutcome::Failed(e) => {
                debug!(peer = %self.peer, cause = %e, "receive failed");
                self.close(ClosedReason::Error);
                false
            }
        }
    }
}

impl<T> fmt::Debug for TcpConnection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpConnection")
            .field("peer", &self.peer)
            .field("lifecycle", &self.lifecycle)
            .field("buffered", &(self.recv.end - self.recv.start))
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// A bare connection reports its completions into a caller supplied list.
impl<T: Transport> AsyncSocket for TcpConnection<T> {
    type Context = Vec<Completion>;
    type Stream = Rewind<T>;

    fn on_readable(&mut self, cx: &mut Self::Context) {
        self.readable();
        while let Some(completion) = self.poll_read() {
            cx.push(completion);
        }
    }

    fn on_writable(&mut self, cx: &mut Self::Context) {
        self.writable();
        while let Some(completion) = self.poll_write() {
            cx.push(completion);
        }
    }

    fn interest(&self) -> Option<Interest> {
        Self::interest(self)
    }

    fn source(&mut self) -> Option<&mut dyn Source> {
        self.stream.as_mut().map(|stream| stream as &mut dyn Source)
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn expired(&mut self) {
        debug!(peer = %self.peer, "connection expired");
    }

    fn close(&mut self, reason: ClosedReason) -> bool {
        Self::close(self, reason)
    }

    fn detach(&mut self) -> bool {
        Self::detach(self)
    }

    fn is_open(&self) -> bool {
        Self::is_open(self)
    }

    fn release(self) -> Released<Rewind<T>> {
        let Self { stream, recv, send, read_ahead, .. } = self;
        Released { slots: SlotPair { recv: recv.slot, send }, stream: stream.map(|stream| Rewind::new(stream, read_ahead)) }
    }
}
