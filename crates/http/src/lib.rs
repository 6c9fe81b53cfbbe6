//! A single-threaded HTTP/1.1 server for small machines.
//!
//! This crate serves HTTP over TCP from one thread, with a fixed memory budget: every
//! connection borrows a pair of preallocated buffer slots, and the number of slot pairs
//! is the number of connections served at once. I/O is non-blocking and driven by
//! readiness events from [`mio`]; nothing ever blocks the thread.
//!
//! # Features
//!
//! - Line and length delimited request parsing with a bounded header count
//! - Fixed-length, chunked (streamed) and `101 Switching Protocols` responses
//! - Hand-off of the raw stream after a protocol upgrade
//! - Per-connection deadlines swept by the server loop
//! - An ordered chain of request handlers that may suspend to receive request content
//! - Placeholder bodies (HTML or JSON, per `Accept`) for status-only responses
//!
//! Every response closes its connection; there is no keep-alive.
//!
//! # Example
//!
//! ```no_run
//! use slim_http::handler::{handler_fn, Flow};
//! use slim_http::server::Server;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::builder()
//!         .address("0.0.0.0:8080")
//!         .slots(4)
//!         .handler(handler_fn(|request| {
//!             if request.path() == "/hello" {
//!                 let name = request.query("name").unwrap_or("world").to_owned();
//!                 request.response_mut().return_ok_text(format!("Hello {name}!"));
//!             }
//!             Ok(Flow::Next)
//!         }))
//!         .build()?;
//!
//!     server.run()?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The crate is organized bottom-up:
//!
//! - [`buffer`]: fixed-size buffer slots and the pool that loans them
//! - [`socket`]: the [`AsyncSocket`](socket::AsyncSocket) contract and the buffered
//!   [`TcpConnection`](socket::TcpConnection)
//! - [`registry`]: ownership of live sockets and dispatch of readiness events
//! - [`codec`]: request line/header parsing and response head and chunk encoding
//! - [`protocol`]: the request and response types handlers work with
//! - [`handler`]: the handler contract and the handler chain
//! - [`connection`]: the per-connection HTTP state machine
//! - [`server`]: the listener and the event loop
//! - [`config`]: settings, loadable with `serde`
//!
//! # Error Handling
//!
//! - [`socket::SocketError`]: misuse of a connection (overlapping operations, bad sizes)
//! - [`protocol::ParseError`]: malformed requests, answered with 400 or 413
//! - [`protocol::ResponseError`]: changing a response after its headers were sent
//! - [`server::ServerError`]: bind, configuration and event loop failures

pub mod buffer;
pub mod codec;
pub mod config;
pub mod connection;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod socket;

mod utils;
pub(crate) use utils::ensure;

#[cfg(test)]
mod testing;
