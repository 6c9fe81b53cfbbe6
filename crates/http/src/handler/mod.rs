//! Request handlers.
//!
//! A server holds an ordered [`HandlerChain`]. Once a request head is parsed, the
//! connection offers the request to each handler in turn:
//!
//! - a handler that records a response ends the chain
//! - a handler returning [`Flow::Next`] without a response passes the request on
//! - a handler returning [`Flow::Pending`] keeps the request; if it asked for request
//!   content with [`HttpRequest::receive_content`], the content is delivered to its
//!   [`on_content`](Handler::on_content) once received
//! - a handler failing in `on_request` is logged and skipped
//!
//! A request no handler answers gets `501 Not Implemented`.
//!
//! # Example
//!
//! ```
//! use slim_http::handler::{handler_fn, Flow, HandlerChain};
//!
//! let chain = HandlerChain::new().with(handler_fn(|request| {
//!     if request.path() == "/ping" {
//!         request.response_mut().return_ok_text("pong");
//!     }
//!     Ok(Flow::Next)
//! }));
//! assert_eq!(chain.len(), 1);
//! ```

use std::error::Error;
use std::fmt;

use tracing::warn;

use crate::protocol::HttpRequest;

/// Error type handlers may fail with.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// What the connection does after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Continue with the next handler unless a response was recorded.
    Next,
    /// The handler keeps the request, usually to receive its content.
    Pending,
}

pub trait Handler {
    fn on_request(&self, request: &mut HttpRequest) -> Result<Flow, HandlerError>;

    /// Receives the content requested with [`HttpRequest::receive_content`].
    fn on_content(&self, request: &mut HttpRequest, _content: &[u8]) -> Result<Flow, HandlerError> {
        warn!(handler = self.name(), path = request.path(), "handler does not accept request content");
        request.response_mut().return_internal_server_error();
        Ok(Flow::Next)
    }

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

impl<F> Handler for HandlerFn<F>
where
    F: Fn(&mut HttpRequest) -> Result<Flow, HandlerError>,
{
    fn on_request(&self, request: &mut HttpRequest) -> Result<Flow, HandlerError> {
        (self.f)(request)
    }

    fn name(&self) -> &'static str {
        std::any::type_name::<F>()
    }
}

/// Creates a [`Handler`] from a function handling the request head only.
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: Fn(&mut HttpRequest) -> Result<Flow, HandlerError>,
{
    HandlerFn { f }
}

/// Handlers in the order they are offered each request.
#[derive(Default)]
pub struct HandlerChain {
    handlers: Vec<Box<dyn Handler>>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handler: impl Handler + 'static) {
        self.handlers.push(Box::new(handler));
    }

    #[must_use]
    pub fn with(mut self, handler: impl Handler + 'static) -> Self {
        self.push(handler);
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&dyn Handler> {
        self.handlers.get(index).map(Box::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Handler> {
        self.handlers.iter().map(Box::as_ref)
    }
}

impl fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter().map(Handler::name)).finish()
    }
}
