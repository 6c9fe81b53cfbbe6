//! Core HTTP protocol types.
//!
//! This module holds what request handlers work with:
//!
//! - **Requests** ([`request`]): the parsed [`RequestHead`] and the [`HttpRequest`] that
//!   owns it together with its response
//! - **Responses** ([`response`]): the [`HttpResponse`] builder and its reply kinds
//! - **Content sources** ([`ByteSource`]): readable sources streamed as response content
//! - **Errors**: [`ParseError`] for malformed requests, [`ResponseError`] for invalid
//!   response mutations and [`ContentError`] for undecodable request content
//!
//! Requests are built by the [`RequestParser`](crate::codec::RequestParser) and served by the
//! [`HttpConnection`](crate::connection::HttpConnection); handlers only see them through
//! the [`Handler`](crate::handler::Handler) trait.

pub mod query;
pub mod request;
pub mod response;

mod error;
mod source;

pub use error::ContentError;
pub use error::ParseError;
pub use error::ResponseError;
pub use request::HttpRequest;
pub use request::RequestHead;
pub use response::HttpResponse;
pub use response::OnSwitched;
pub use source::ByteSource;
pub use source::ReadSource;

#[cfg(test)]
pub(crate) use source::MockByteSource;
