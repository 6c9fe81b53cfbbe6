//! The server loop.
//!
//! A [`Server`] owns the listener, the selector and the [`Registry`] of live
//! connections. Each call to [`Server::pump`] runs one cycle:
//!
//! 1. wait for readiness, at most until the earliest connection deadline
//! 2. dispatch every ready event to its connection
//! 3. accept queued connections while slot pairs are available
//! 4. close connections whose deadline has passed
//!
//! Everything runs on the calling thread. With one slot pair (the default) the server
//! handles a single connection at a time and leaves further clients in the listen
//! backlog until it is done.
//!
//! # Example
//!
//! ```no_run
//! use slim_http::handler::{handler_fn, Flow};
//! use slim_http::server::Server;
//!
//! let mut server = Server::builder()
//!     .address("127.0.0.1:8080")
//!     .handler(handler_fn(|request| {
//!         request.response_mut().return_ok_text("hello");
//!         Ok(Flow::Next)
//!     }))
//!     .build()?;
//! server.run()?;
//! # Ok::<(), slim_http::server::ServerError>(())
//! ```

mod builder;
mod error;
mod listener;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, info, warn};

use crate::buffer::SlotPool;
use crate::config::{HttpConfig, ServerConfig};
use crate::connection::HttpConnection;
use crate::handler::HandlerChain;
use crate::registry::{Readiness, Registry};
use crate::socket::ClosedReason;

pub use builder::ServerBuilder;
pub use error::ServerError;

const LISTENER: Token = Token(usize::MAX - 1);
const MIN_EVENTS: usize = 16;

pub struct Server {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Registry<HttpConnection<TcpStream>>,
    handlers: HandlerChain,
    http: Arc<HttpConfig>,
    accept_pending: bool,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub(crate) fn bind(config: ServerConfig, handlers: HandlerChain) -> Result<Self, ServerError> {
        let config = config.validate()?;
        let address = config.address();
        let mut listener =
            listener::bind(address, config.backlog()).map_err(|source| ServerError::Bind { address, source })?;
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;
        let slots = SlotPool::new(config.slots(), config.slot_size());
        let registry = Registry::new(poll.registry().try_clone()?, slots);

        info!(
            address = %local_addr,
            slots = config.slots(),
            slot_size = config.slot_size(),
            handlers = handlers.len(),
            "server listening"
        );
        Ok(Self {
            poll,
            events: Events::with_capacity(MIN_EVENTS.max(config.slots() + 1)),
            listener,
            local_addr,
            registry,
            handlers,
            http: Arc::new(config.http().clone()),
            accept_pending: false,
        })
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connections currently served.
    #[inline]
    pub fn connections(&self) -> usize {
        self.registry.len()
    }

    #[inline]
    pub fn config(&self) -> &HttpConfig {
        &self.http
    }

    /// Runs one cycle of the event loop, waiting at most `timeout` for readiness.
    ///
    /// An interrupted wait counts as an empty cycle.
    pub fn pump(&mut self, timeout: Option<Duration>) -> Result<(), ServerError> {
        let timeout = self.poll_timeout(timeout);
        if let Err(e) = self.poll.poll(&mut self.events, timeout) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(e.into());
        }

        for event in &self.events {
            if event.token() == LISTENER {
                self.accept_pending = true;
            } else {
                self.registry.dispatch(event.token(), Readiness::from(event), &mut self.handlers);
            }
        }

        self.accept();
        self.registry.pump_expire(Instant::now());
        Ok(())
    }

    /// Pumps until the event loop fails.
    pub fn run(&mut self) -> Result<(), ServerError> {
        loop {
            self.pump(None)?;
        }
    }

    /// Closes every connection and the listener.
    pub fn shutdown(mut self) {
        self.registry.close_all(ClosedReason::ClosedByHost);
        if let Err(e) = self.poll.registry().deregister(&mut self.listener) {
            debug!(cause = %e, "failed to deregister listener");
        }
        info!(address = %self.local_addr, "server stopped");
    }

    fn poll_timeout(&self, timeout: Option<Duration>) -> Option<Duration> {
        if self.accept_pending && self.registry.has_capacity() {
            return Some(Duration::ZERO);
        }
        let until_deadline =
            self.registry.next_deadline().map(|deadline| deadline.saturating_duration_since(Instant::now()));
        match (timeout, until_deadline) {
            (Some(timeout), Some(until_deadline)) => Some(timeout.min(until_deadline)),
            (timeout, until_deadline) => timeout.or(until_deadline),
        }
    }

    /// Accepts queued connections until the backlog is drained or no slot pair is left.
    fn accept(&mut self) {
        while self.accept_pending && self.registry.has_capacity() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "connection accepted");
                    let http = Arc::clone(&self.http);
                    self.registry.add(|slots| HttpConnection::new(stream, peer, slots, http));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => self.accept_pending = false,
                Err(e) if matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted) => {}
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    self.accept_pending = false;
                }
            }
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("registry", &self.registry)
            .field("handlers", &self.handlers)
            .field("accept_pending", &self.accept_pending)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;

    #[test]
    fn builds_on_an_ephemeral_port() {
        let server = Server::builder().address("127.0.0.1:0").slots(2).build().unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert_eq!(server.connections(), 0);
        server.shutdown();
    }

    #[test]
    fn rejects_invalid_configuration() {
        let error = Server::builder().address("127.0.0.1:0").slots(0).build().unwrap_err();
        assert!(matches!(error, ServerError::Config(ConfigError::NoSlots)));

        let error = Server::builder().address("not an address").build().unwrap_err();
        assert!(matches!(error, ServerError::Config(ConfigError::UnresolvedAddress { .. })));
    }

    #[test]
    fn idle_pump_returns_after_timeout() {
        let mut server = Server::builder().address("127.0.0.1:0").build().unwrap();
        server.pump(Some(Duration::from_millis(10))).unwrap();
        assert_eq!(server.connections(), 0);
    }
}
