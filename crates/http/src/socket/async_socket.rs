use std::fmt;
use std::time::Instant;

use mio::Interest;
use mio::event::Source;

use crate::buffer::SlotPair;

/// Why a socket stopped being open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedReason {
    Error,
    ClosedByHost,
    ClosedByPeer,
    Timeout,
    /// The stream was handed over to another owner and left open.
    Detached,
}

impl fmt::Display for ClosedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Error => "error",
            Self::ClosedByHost => "closed by host",
            Self::ClosedByPeer => "closed by peer",
            Self::Timeout => "timeout",
            Self::Detached => "detached",
        };
        f.write_str(reason)
    }
}

/// What a socket gives back when the registry drops it.
#[derive(Debug)]
pub struct Released<T> {
    /// The slot pair loaned at creation, returned to the pool.
    pub slots: SlotPair,
    /// The stream, still present only if the socket was detached and nobody claimed it.
    pub stream: Option<T>,
}

/// A socket whose progress is driven by readiness events.
///
/// The [`Registry`](crate::registry::Registry) owns every `AsyncSocket`, forwards the
/// readiness reported by the selector to the handlers below and, after each call,
/// reconciles the selector registration with [`interest`](Self::interest).
/// A socket that is no longer [open](Self::is_open) is removed and
/// [released](Self::release) right after the call that closed it.
pub trait AsyncSocket {
    /// State shared by all sockets of a registry and lent to each event handler.
    type Context: ?Sized;
    /// The underlying stream, surfaced when a detached socket is released.
    type Stream;

    fn on_readable(&mut self, cx: &mut Self::Context);

    fn on_writable(&mut self, cx: &mut Self::Context);

    /// Called for error and hang-up conditions that neither read nor write absorbed.
    fn on_exceptional(&mut self, _cx: &mut Self::Context) {
        self.close(ClosedReason::Error);
    }

    /// The readiness this socket currently waits for, `None` when it waits for nothing.
    fn interest(&self) -> Option<Interest>;

    /// The event source to register with the selector, if the socket still owns one.
    fn source(&mut self) -> Option<&mut dyn Source>;

    /// The instant after which the socket is considered expired.
    fn deadline(&self) -> Option<Instant>;

    /// Hook invoked once when the deadline passes, right before the socket is closed.
    fn expired(&mut self) {}

    /// Closes the socket with [`ClosedReason::Timeout`] if its deadline is in the past.
    ///
    /// Returns true if this call closed the socket.
    fn pump_expire(&mut self, now: Instant) -> bool {
        match self.deadline() {
            Some(deadline) if now > deadline => {
                self.expired();
                self.close(ClosedReason::Timeout)
            }
            _ => false,
        }
    }

    /// Closes the socket. Returns false if it was already closed or detached.
    fn close(&mut self, reason: ClosedReason) -> bool;

    /// Stops managing the stream without closing it. Returns false if already closed.
    fn detach(&mut self) -> bool;

    fn is_open(&self) -> bool;

    fn release(self) -> Released<Self::Stream>
    where
        Self: Sized;
}
