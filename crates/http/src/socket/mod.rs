//! Non-blocking sockets driven by readiness notifications.
//!
//! This module contains the connection-level building blocks of the server:
//!
//! - [`AsyncSocket`]: the contract between a socket and the [`Registry`](crate::registry::Registry)
//!   that delivers readiness events to it
//! - [`TcpConnection`]: a buffered TCP connection offering line, fixed-size and
//!   slot-backed receive and send operations
//! - [`Transport`]: the byte stream a connection talks to, a mio `TcpStream` in production
//!   and an in-memory script in tests
//! - [`Rewind`]: a detached stream that replays the bytes read ahead before it was handed out
//!
//! Every operation is started by a call that only records intent (`recv_line`,
//! `send_bytes`, ...) and is completed later, when the registry reports that the
//! underlying stream became readable or writable. Completions are surfaced as
//! [`Completion`] values instead of callbacks.

mod async_socket;
mod error;
mod line;
mod rewind;
mod tcp_connection;
mod transport;

pub use async_socket::AsyncSocket;
pub use async_socket::ClosedReason;
pub use async_socket::Released;
pub use error::SocketError;
pub use line::LineEncoding;
pub use rewind::Rewind;
pub use tcp_connection::Completion;
pub use tcp_connection::TcpConnection;
pub use transport::IoOutcome;
pub use transport::Transport;
