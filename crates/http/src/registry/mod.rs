//! Ownership of live sockets and dispatch of readiness events.
//!
//! The [`Registry`] is the single owner of every [`AsyncSocket`] the server serves. It
//! loans each socket a [`SlotPair`](crate::buffer::SlotPair) on admission, forwards the
//! readiness reported by the selector and keeps the selector registration of every
//! socket in line with what the socket is waiting for.
//!
//! After each event the registry *settles* the socket that received it:
//!
//! - a socket that is still open gets its selector interest updated (registered,
//!   re-registered or deregistered)
//! - a socket that closed or detached is deregistered, removed, released and its slot
//!   pair goes back to the pool
//!
//! so a closed socket never receives another event and its buffers are reusable before
//! the next wakeup.

mod readiness;

use std::fmt;
use std::time::Instant;

use mio::{Interest, Token};
use slab::Slab;
use tracing::{debug, trace, warn};

use crate::buffer::{SlotPair, SlotPool};
use crate::socket::{AsyncSocket, ClosedReason, Released};

pub use readiness::Readiness;
pub use readiness::interest_of;

struct Entry<S> {
    socket: S,
    registered: Option<Interest>,
}

pub struct Registry<S> {
    selector: mio::Registry,
    entries: Slab<Entry<S>>,
    slots: SlotPool,
}

impl<S: AsyncSocket> Registry<S> {
    pub fn new(selector: mio::Registry, slots: SlotPool) -> Self {
        let entries = Slab::with_capacity(slots.capacity());
        Self { selector, entries, slots }
    }

    /// Maximum number of sockets, equal to the number of slot pairs.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True while another socket can be admitted.
    #[inline]
    pub fn has_capacity(&self) -> bool {
        self.slots.available() > 0
    }

    #[inline]
    pub fn contains(&self, token: Token) -> bool {
        self.entries.contains(token.0)
    }

    pub fn get(&self, token: Token) -> Option<&S> {
        self.entries.get(token.0).map(|entry| &entry.socket)
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut S> {
        self.entries.get_mut(token.0).map(|entry| &mut entry.socket)
    }

    /// Admits a socket built by `make` from a freshly loaned slot pair.
    ///
    /// # Panics
    ///
    /// Panics if the registry is full. Check [`has_capacity`](Self::has_capacity) before
    /// accepting a connection.
    pub fn add<F>(&mut self, make: F) -> Token
    where
        F: FnOnce(SlotPair) -> S,
    {
        let Some(slots) = self.slots.acquire() else {
            panic!("registry is full: all {} slot pairs are in use", self.slots.capacity());
        };
        let token = Token(self.entries.insert(Entry { socket: make(slots), registered: None }));
        trace!(token = token.0, "socket added");
        self.settle(token);
        token
    }

    /// Sets which readiness conditions are reported for `token`.
    ///
    /// The registration is left untouched when it already matches. The next event
    /// dispatched to the socket overrides this with the socket's own interest.
    ///
    /// # Panics
    ///
    /// Panics if `token` does not belong to this registry.
    pub fn set_interest(&mut self, token: Token, readable: bool, writable: bool) -> std::io::Result<()> {
        assert!(self.contains(token), "socket {} is not owned by this registry", token.0);
        self.apply_interest(token, interest_of(readable, writable))
    }

    /// Delivers `readiness` to the socket behind `token`.
    ///
    /// Read readiness is handled before write readiness; error and hang-up conditions are
    /// handed to the exceptional handler if the socket is still open afterwards. Events
    /// for tokens that were removed in the meantime are ignored.
    pub fn dispatch(&mut self, token: Token, readiness: Readiness, cx: &mut S::Context) {
        let Some(entry) = self.entries.get_mut(token.0) else {
            trace!(token = token.0, "event for removed socket");
            return;
        };

        let socket = &mut entry.socket;
        if readiness.is_readable() && socket.is_open() {
            socket.on_readable(cx);
        }
        if readiness.is_writable() && socket.is_open() {
            socket.on_writable(cx);
        }
        if readiness.is_exceptional() && socket.is_open() {
            socket.on_exceptional(cx);
        }
        self.settle(token);
    }

    /// Closes the socket and removes it.
    ///
    /// Returns false if `token` was not registered, which makes repeated removal harmless.
    pub fn remove(&mut self, token: Token) -> bool {
        let Some(entry) = self.entries.get_mut(token.0) else {
            return false;
        };
        entry.socket.close(ClosedReason::ClosedByHost);
        self.reap(token);
        true
    }

    /// Closes the socket with `reason`. Returns false if it was already closed or unknown.
    pub fn close(&mut self, token: Token, reason: ClosedReason) -> bool {
        let Some(entry) = self.entries.get_mut(token.0) else {
            return false;
        };
        let closed = entry.socket.close(reason);
        self.settle(token);
        closed
    }

    /// Detaches the socket, removes it and hands its still open stream to the caller.
    pub fn detach(&mut self, token: Token) -> Option<S::Stream> {
        let entry = self.entries.get_mut(token.0)?;
        if !entry.socket.detach() {
            self.settle(token);
            return None;
        }
        self.reap(token)
    }

    /// Closes every socket whose deadline lies before `now` with [`ClosedReason::Timeout`].
    pub fn pump_expire(&mut self, now: Instant) {
        let expired: Vec<usize> = self
            .entries
            .iter_mut()
            .filter_map(|(key, entry)| entry.socket.pump_expire(now).then_some(key))
            .collect();
        for key in expired {
            debug!(token = key, "socket expired");
            self.reap(Token(key));
        }
    }

    /// Closes and removes every socket.
    pub fn close_all(&mut self, reason: ClosedReason) {
        let keys: Vec<usize> = self.entries.iter().map(|(key, _)| key).collect();
        for key in keys {
            if let Some(entry) = self.entries.get_mut(key) {
                entry.socket.close(reason);
            }
            self.reap(Token(key));
        }
    }

    /// The earliest deadline among all sockets.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().filter_map(|(_, entry)| entry.socket.deadline()).min()
    }

    fn settle(&mut self, token: Token) {
        let Some(entry) = self.entries.get(token.0) else {
            return;
        };
        if !entry.socket.is_open() {
            self.reap(token);
            return;
        }

        let interest = entry.socket.interest();
        if let Err(e) = self.apply_interest(token, interest) {
            warn!(token = token.0, cause = %e, "failed to update readiness interest");
            if let Some(entry) = self.entries.get_mut(token.0) {
                entry.socket.close(ClosedReason::Error);
            }
            self.reap(token);
        }
    }

    fn apply_interest(&mut self, token: Token, wanted: Option<Interest>) -> std::io::Result<()> {
        let Some(entry) = self.entries.get_mut(token.0) else {
            return Ok(());
        };
        if entry.registered == wanted {
            return Ok(());
        }
        let Some(source) = entry.socket.source() else {
            entry.registered = None;
            return Ok(());
        };

        match (entry.registered, wanted) {
            (None, Some(interest)) => self.selector.register(source, token, interest)?,
            (Some(_), Some(interest)) => self.selector.reregister(source, token, interest)?,
            (Some(_), None) => self.selector.deregister(source)?,
            (None, None) => {}
        }
        entry.registered = wanted;
        Ok(())
    }

    /// Removes the entry, returns its slot pair to the pool and yields a detached stream.
    fn reap(&mut self, token: Token) -> Option<S::Stream> {
        let mut entry = self.entries.try_remove(token.0)?;
        if entry.registered.is_some()
            && let Some(source) = entry.socket.source()
            && let Err(e) = self.selector.deregister(source)
        {
            debug!(token = token.0, cause = %e, "failed to deregister socket");
        }

        let Released { slots, stream } = entry.socket.release();
        self.slots.release(slots);
        trace!(token = token.0, "socket removed");
        stream
    }
}

impl<S> fmt::Debug for Registry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("sockets", &self.entries.len())
            .field("capacity", &self.slots.capacity())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mio::Poll;

    use super::*;
    use crate::socket::{Completion, LineEncoding, TcpConnection};
    use crate::testing::{ScriptedStream, peer};

    fn registry(capacity: usize) -> (Poll, Registry<TcpConnection<ScriptedStream>>) {
        let poll = Poll::new().unwrap();
        let selector = poll.registry().try_clone().unwrap();
        (poll, Registry::new(selector, SlotPool::new(capacity, 64)))
    }

    fn add(registry: &mut Registry<TcpConnection<ScriptedStream>>, stream: ScriptedStream) -> Token {
        registry.add(|slots| TcpConnection::new(stream, peer(), slots))
    }

    #[test]
    fn admits_up_to_capacity() {
        let (_poll, mut registry) = registry(2);
        let first = add(&mut registry, ScriptedStream::new());
        add(&mut registry, ScriptedStream::new());
        assert!(!registry.has_capacity());
        assert_eq!(registry.len(), 2);

        assert!(registry.remove(first));
        assert!(!registry.remove(first));
        assert!(registry.has_capacity());
    }

    #[test]
    #[should_panic(expected = "registry is full")]
    fn adding_beyond_capacity_panics() {
        let (_poll, mut registry) = registry(1);
        add(&mut registry, ScriptedStream::new());
        add(&mut registry, ScriptedStream::new());
    }

    #[test]
    fn dispatch_reads_before_writes() {
        let (_poll, mut registry) = registry(1);
        let token = add(&mut registry, ScriptedStream::new().with_read(b"ping\n"));
        let conn = registry.get_mut(token).unwrap();
        conn.recv_line(LineEncoding::Utf8, None).unwrap();
        conn.send_bytes(b"pong").unwrap();

        let mut completions = Vec::new();
        registry.dispatch(token, Readiness::READABLE | Readiness::WRITABLE, &mut completions);
        assert_eq!(completions, vec![Completion::Line(Some("ping".to_owned())), Completion::Sent]);
        assert!(registry.contains(token));
    }

    #[test]
    fn exceptional_condition_closes_and_frees_the_slot() {
        let (_poll, mut registry) = registry(1);
        let stream = ScriptedStream::new();
        let dropped = stream.dropped();
        let token = add(&mut registry, stream);

        registry.dispatch(token, Readiness::HANG_UP, &mut Vec::new());
        assert!(!registry.contains(token));
        assert!(registry.has_capacity());
        assert!(dropped.get());

        // a late event for the same token is ignored
        registry.dispatch(token, Readiness::READABLE, &mut Vec::new());
    }

    #[test]
    fn peer_close_during_read_removes_socket() {
        let (_poll, mut registry) = registry(1);
        let token = add(&mut registry, ScriptedStream::new().with_eof());
        registry.get_mut(token).unwrap().recv_line(LineEncoding::Utf8, None).unwrap();

        registry.dispatch(token, Readiness::READABLE, &mut Vec::new());
        assert!(registry.is_empty());
    }

    #[test]
    fn expiry_reaps_only_late_sockets() {
        let (_poll, mut registry) = registry(2);
        let late = add(&mut registry, ScriptedStream::new());
        let fresh = add(&mut registry, ScriptedStream::new());
        registry.get_mut(late).unwrap().expire_after(Duration::ZERO);
        registry.get_mut(fresh).unwrap().expire_after(Duration::from_secs(60));

        let now = Instant::now() + Duration::from_millis(1);
        assert!(registry.next_deadline().is_some_and(|deadline| deadline <= now));
        registry.pump_expire(now);
        assert!(!registry.contains(late));
        assert!(registry.contains(fresh));

        registry.pump_expire(now);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn detach_hands_out_the_open_stream() {
        let (_poll, mut registry) = registry(1);
        let stream = ScriptedStream::new();
        let dropped = stream.dropped();
        let token = add(&mut registry, stream);

        let stream = registry.detach(token);
        assert!(stream.is_some());
        assert!(!dropped.get());
        assert!(registry.has_capacity());
        assert!(registry.detach(token).is_none());
    }

    #[test]
    fn close_reports_first_close_only() {
        let (_poll, mut registry) = registry(1);
        let token = add(&mut registry, ScriptedStream::new());
        assert!(registry.close(token, ClosedReason::Timeout));
        assert!(!registry.close(token, ClosedReason::Timeout));
        assert!(registry.is_empty());
    }

    #[test]
    fn close_all_returns_every_slot() {
        let (_poll, mut registry) = registry(2);
        let first = ScriptedStream::new();
        let dropped = first.dropped();
        add(&mut registry, first);
        add(&mut registry, ScriptedStream::new());

        registry.close_all(ClosedReason::ClosedByHost);
        assert!(registry.is_empty());
        assert!(registry.has_capacity());
        assert!(dropped.get());
    }

    #[test]
    fn explicit_interest_is_accepted_for_owned_sockets() {
        let (_poll, mut registry) = registry(1);
        let token = add(&mut registry, ScriptedStream::new());
        assert!(registry.set_interest(token, true, false).is_ok());
        assert!(registry.set_interest(token, false, false).is_ok());
    }
}
