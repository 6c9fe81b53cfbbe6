//! Parsed request state handed to request handlers.
//!
//! A [`RequestHead`] holds what the parser extracted from the request line and the
//! header lines. An [`HttpRequest`] wraps the head together with the peer address, the
//! shared [`HttpConfig`] and the [`HttpResponse`] being built for it, and dereferences
//! to the head for all read accessors.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::Arc;

use http::header::{self, HeaderMap, HeaderName};
use http::{HeaderValue, Method};
use serde::de::DeserializeOwned;

use crate::config::HttpConfig;
use crate::protocol::query::parse_pairs;
use crate::protocol::{ContentError, HttpResponse, ParseError};

/// Request line and headers of one request.
#[derive(Debug, Clone)]
pub struct RequestHead {
    method: Method,
    path: String,
    query_string: String,
    query_params: HashMap<String, String>,
    version: String,
    headers: HeaderMap,
}

impl Default for RequestHead {
    fn default() -> Self {
        Self {
            method: Method::GET,
            path: String::new(),
            query_string: String::new(),
            query_params: HashMap::new(),
            version: String::new(),
            headers: HeaderMap::new(),
        }
    }
}

impl RequestHead {
    #[inline]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[inline]
    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }

    /// The percent-decoded path, without the query string.
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw query string, without the leading `?`.
    #[inline]
    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    #[inline]
    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.query_params
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query_params.get(name).map(String::as_str)
    }

    /// The protocol version token in upper case, for example `HTTP/1.1`.
    #[inline]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The value of header `name`, or an empty string when it is absent or not visible ASCII.
    pub fn header(&self, name: impl header::AsHeaderName) -> &str {
        self.headers.get(name).and_then(|value| value.to_str().ok()).unwrap_or_default()
    }

    pub fn host(&self) -> &str {
        self.header(header::HOST)
    }

    pub fn origin(&self) -> &str {
        self.header(header::ORIGIN)
    }

    pub fn user_agent(&self) -> &str {
        self.header(header::USER_AGENT)
    }

    /// The media type of the content, without parameters.
    pub fn content_type(&self) -> &str {
        self.header(header::CONTENT_TYPE).split(';').next().unwrap_or_default().trim()
    }

    pub fn cache_control(&self) -> &str {
        self.header(header::CACHE_CONTROL)
    }

    pub fn referer(&self) -> &str {
        self.header(header::REFERER)
    }

    pub fn accept_encodings(&self) -> impl Iterator<Item = &str> {
        list(self.header(header::ACCEPT_ENCODING), ',')
    }

    pub fn accept_languages(&self) -> impl Iterator<Item = &str> {
        list(self.header(header::ACCEPT_LANGUAGE), ',')
    }

    /// The `name=value` pairs of the `Cookie` header, undecoded.
    pub fn cookies(&self) -> impl Iterator<Item = &str> {
        list(self.header(header::COOKIE), ';')
    }

    /// The declared content length, 0 when absent or not a number.
    pub fn content_length(&self) -> usize {
        self.header(header::CONTENT_LENGTH).trim().parse().unwrap_or(0)
    }

    /// The media ranges listed in `Accept`, in order.
    pub fn accept(&self) -> impl Iterator<Item = &str> {
        list(self.header(header::ACCEPT), ',')
    }

    /// The protocol requested by `Upgrade`, if `Connection` asks for an upgrade.
    pub fn upgrade(&self) -> Option<&str> {
        let connection = self.header(header::CONNECTION);
        let wants_upgrade = connection.split(',').any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
        let upgrade = self.header(header::UPGRADE).trim();
        (wants_upgrade && !upgrade.is_empty()).then_some(upgrade)
    }

    #[inline]
    pub fn is_upgrade(&self) -> bool {
        self.upgrade().is_some()
    }

    pub(crate) fn set_request_line(
        &mut self,
        method: Method,
        path: String,
        query_string: String,
        version: String,
    ) -> Result<(), ParseError> {
        self.query_params = parse_pairs(&query_string).map_err(ParseError::invalid_query)?;
        self.method = method;
        self.path = path;
        self.query_string = query_string;
        self.version = version;
        Ok(())
    }

    /// Stores a header, replacing an earlier header with the same name.
    pub(crate) fn insert_header(&mut self, name: &str, value: &str) -> Result<(), ParseError> {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| ParseError::invalid_header(format!("{name:?}: {e}")))?;
        let value = HeaderValue::from_bytes(value.as_bytes()).map_err(|e| ParseError::invalid_header(format!("{name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(())
    }
}

/// A request being served, together with its response.
pub struct HttpRequest {
    head: RequestHead,
    peer: SocketAddr,
    config: Arc<HttpConfig>,
    response: HttpResponse,
    content_request: Option<usize>,
}

impl HttpRequest {
    pub fn new(peer: SocketAddr, config: Arc<HttpConfig>) -> Self {
        let response = HttpResponse::new(Arc::clone(&config));
        Self { head: RequestHead::default(), peer, config, response, content_request: None }
    }

    #[inline]
    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    #[inline]
    pub fn head_mut(&mut self) -> &mut RequestHead {
        &mut self.head
    }

    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    #[inline]
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    #[inline]
    pub fn response(&self) -> &HttpResponse {
        &self.response
    }

    #[inline]
    pub fn response_mut(&mut self) -> &mut HttpResponse {
        &mut self.response
    }

    /// Asks the connection to receive `size` bytes of request content.
    ///
    /// Takes effect when the handler returns [`Flow::Pending`](crate::handler::Flow::Pending):
    /// the content is then delivered to the same handler's
    /// [`on_content`](crate::handler::Handler::on_content).
    pub fn receive_content(&mut self, size: usize) {
        self.content_request = Some(size);
    }

    pub(crate) fn take_content_request(&mut self) -> Option<usize> {
        self.content_request.take()
    }

    /// Decodes form content into name/value pairs. A repeated name keeps its last value.
    pub fn read_form(&self, content: &[u8]) -> Result<HashMap<String, String>, ContentError> {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(content)?;
        Ok(pairs.into_iter().collect())
    }

    pub fn read_json<T: DeserializeOwned>(&self, content: &[u8]) -> Result<T, ContentError> {
        Ok(serde_json::from_slice(content)?)
    }
}

impl Deref for HttpRequest {
    type Target = RequestHead;

    fn deref(&self) -> &RequestHead {
        &self.head
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("peer", &self.peer)
            .field("method", &self.head.method)
            .field("path", &self.head.path)
            .field("headers_sent", &self.response.headers_sent())
            .finish_non_exhaustive()
    }
}

fn list(value: &str, separator: char) -> impl Iterator<Item = &str> {
    value.split(separator).map(str::trim).filter(|item| !item.is_empty())
}
