//! Per-connection HTTP processing.
//!
//! An [`HttpConnection`] owns one accepted stream for the lifetime of one request: it
//! parses the head line by line, runs the [`HandlerChain`](crate::handler::HandlerChain),
//! receives request content on demand and writes the response, which is fixed-length,
//! chunked or a `101 Switching Protocols` hand-off. Every response closes the
//! connection.

mod body_stream;
mod http_connection;

pub use http_connection::HttpConnection;
