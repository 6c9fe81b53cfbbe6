//! HTTP codec module for encoding and decoding HTTP messages
//!
//! This module provides the wire-level pieces of the server:
//!
//! - [`RequestParser`]: turns request lines into a [`RequestHead`](crate::protocol::RequestHead)
//! - [`HeaderEncoder`]: serializes the status line and headers of a response
//! - [`ChunkedEncoder`]: frames streamed content as chunks directly inside the send slot
//! - [`status_content`]: placeholder bodies for status-only responses
//!
//! None of them performs I/O: the [`HttpConnection`](crate::connection::HttpConnection)
//! receives lines and sends the encoded bytes.

mod chunked_encoder;
mod header_encoder;
mod request_parser;
mod status_content;

pub use chunked_encoder::CHUNK_HEAD_ROOM;
pub use chunked_encoder::ChunkedEncoder;
pub use chunked_encoder::LAST_CHUNK;
pub use header_encoder::Framing;
pub use header_encoder::HeaderEncoder;
pub use header_encoder::ResponseHead;
pub use request_parser::ParseStatus;
pub use request_parser::RequestParser;
pub use status_content::status_content;
