//! The response a handler builds for a request.
//!
//! [`HttpResponse`] collects headers and response properties and records exactly one
//! reply: a status with optional content, a streamed [`ByteSource`], or a protocol
//! switch. Recording the reply marks the headers as sent; the connection serializes
//! and transmits it once the handler returns.
//!
//! After the headers are sent every further reply is ignored with a warning, and header
//! mutations fail with [`ResponseError::HeadersSent`].

use std::fmt;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use serde::Serialize;
use tracing::{error, warn};

use crate::config::HttpConfig;
use crate::ensure;
use crate::protocol::{ByteSource, ReadSource, ResponseError};
use crate::socket::Transport;

pub const DEFAULT_CHARSET: &str = "UTF-8";

/// Receives the open stream after a `101 Switching Protocols` response was sent.
pub type OnSwitched = Box<dyn FnOnce(Box<dyn Transport>)>;

pub(crate) enum Reply {
    Content { status: StatusCode, content: Option<Bytes> },
    Stream { status: StatusCode, source: Box<dyn ByteSource> },
    Switch { upgrade: String, on_switched: OnSwitched },
}

impl Reply {
    pub(crate) fn status(&self) -> StatusCode {
        match self {
            Self::Content { status, .. } | Self::Stream { status, .. } => *status,
            Self::Switch { .. } => StatusCode::SWITCHING_PROTOCOLS,
        }
    }
}

pub struct HttpResponse {
    config: Arc<HttpConfig>,
    headers: HeaderMap,
    allow_caching: bool,
    access_control_allow_origin: Option<String>,
    content_type: Option<String>,
    content_charset: Option<String>,
    content_length: Option<u64>,
    status: Option<StatusCode>,
    reply: Option<Reply>,
}

impl HttpResponse {
    pub fn new(config: Arc<HttpConfig>) -> Self {
        Self {
            config,
            headers: HeaderMap::new(),
            allow_caching: false,
            access_control_allow_origin: None,
            content_type: None,
            content_charset: None,
            content_length: None,
            status: None,
            reply: None,
        }
    }

    /// True once a reply was recorded.
    #[inline]
    pub fn headers_sent(&self) -> bool {
        self.status.is_some()
    }

    /// The status of the recorded reply, `None` until one is recorded.
    #[inline]
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Headers set by handlers. Headers managed by the server are not part of this map.
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Sets a header, replacing any earlier value for the same name.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), ResponseError> {
        self.check_unsent()?;
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| ResponseError::invalid_header(format!("{name:?}: {e}")))?;
        let value = HeaderValue::from_str(value).map_err(|e| ResponseError::invalid_header(format!("{name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    #[inline]
    pub fn allow_caching(&self) -> bool {
        self.allow_caching
    }

    /// Chooses between a one-year public cache policy and no caching at all.
    pub fn set_allow_caching(&mut self, allow: bool) -> Result<(), ResponseError> {
        self.check_unsent()?;
        self.allow_caching = allow;
        Ok(())
    }

    pub fn access_control_allow_origin(&self) -> Option<&str> {
        self.access_control_allow_origin.as_deref()
    }

    pub fn set_access_control_allow_origin(&mut self, origin: Option<String>) -> Result<(), ResponseError> {
        self.check_unsent()?;
        self.access_control_allow_origin = origin;
        Ok(())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) -> Result<(), ResponseError> {
        self.check_unsent()?;
        self.content_type = Some(content_type.into());
        Ok(())
    }

    pub fn content_charset(&self) -> Option<&str> {
        self.content_charset.as_deref()
    }

    pub fn set_content_charset(&mut self, charset: impl Into<String>) -> Result<(), ResponseError> {
        self.check_unsent()?;
        self.content_charset = Some(charset.into());
        Ok(())
    }

    /// The length announced for streamed content. Without it streams are sent chunked.
    #[inline]
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn set_content_length(&mut self, length: u64) -> Result<(), ResponseError> {
        self.check_unsent()?;
        self.content_length = Some(length);
        Ok(())
    }

    /// Replies with `status` and a placeholder body matching the request's `Accept`.
    pub fn return_status(&mut self, status: StatusCode) {
        self.reply(Reply::Content { status, content: None });
    }

    /// Replies with text content, `text/html` in UTF-8 unless set otherwise.
    ///
    /// Empty text is answered with the status placeholder instead.
    pub fn return_text(&mut self, status: StatusCode, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            return self.return_status(status);
        }
        if !self.headers_sent() {
            self.content_type.get_or_insert_with(|| mime::TEXT_HTML.to_string());
            self.content_charset.get_or_insert_with(|| DEFAULT_CHARSET.to_owned());
        }
        self.reply(Reply::Content { status, content: Some(Bytes::from(text)) });
    }

    /// Replies with binary content, `application/octet-stream` unless set otherwise.
    pub fn return_bytes(&mut self, status: StatusCode, bytes: impl Into<Bytes>) {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return self.return_status(status);
        }
        if !self.headers_sent() {
            self.content_type.get_or_insert_with(|| mime::APPLICATION_OCTET_STREAM.to_string());
        }
        self.reply(Reply::Content { status, content: Some(bytes) });
    }

    /// Replies with `value` serialized as `application/json`.
    pub fn return_json<T: Serialize + ?Sized>(&mut self, status: StatusCode, value: &T) -> Result<(), ResponseError> {
        let content = serde_json::to_vec(value)?;
        if !self.headers_sent() {
            self.content_type = Some(mime::APPLICATION_JSON.to_string());
            self.content_charset = Some(DEFAULT_CHARSET.to_owned());
        }
        self.reply(Reply::Content { status, content: Some(Bytes::from(content)) });
        Ok(())
    }

    /// Replies with content read from `source`.
    ///
    /// With a [content length](Self::set_content_length) the content is sent as is,
    /// otherwise with chunked transfer encoding.
    pub fn return_stream(&mut self, status: StatusCode, source: impl ByteSource + 'static) {
        self.reply(Reply::Stream { status, source: Box::new(source) });
    }

    /// Streams the file at `path`. The content type must have been set before.
    ///
    /// A missing file is answered with 404 and a file that cannot be opened with 403.
    /// With `attachment_name`, the browser is asked to download the file under that name.
    pub fn return_file(&mut self, path: impl AsRef<Path>, attachment_name: Option<&str>) {
        let path = path.as_ref();
        if self.content_type.is_none() {
            error!(path = %path.display(), "content type must be set before returning a file");
            return self.return_internal_server_error();
        }
        let Ok(metadata) = std::fs::metadata(path) else {
            return self.return_not_found();
        };
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %path.display(), cause = %e, "failed to open file");
                return self.return_forbidden();
            }
        };
        if let Some(name) = attachment_name
            && let Err(e) = self.set_header(header::CONTENT_DISPOSITION.as_str(), &format!("attachment; filename=\"{name}\""))
        {
            warn!(cause = %e, "failed to set attachment name");
        }
        if !self.headers_sent() {
            self.content_length = Some(metadata.len());
        }
        self.return_stream(StatusCode::OK, ReadSource::new(file));
    }

    pub fn return_ok(&mut self) {
        self.return_status(StatusCode::OK);
    }

    pub fn return_ok_text(&mut self, text: impl Into<String>) {
        self.return_text(StatusCode::OK, text);
    }

    pub fn return_ok_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ResponseError> {
        self.return_json(StatusCode::OK, value)
    }

    pub fn return_redirect(&mut self, location: &str) {
        if let Err(e) = self.set_header(header::LOCATION.as_str(), location) {
            warn!(location, cause = %e, "failed to set redirect location");
        }
        self.return_status(StatusCode::TEMPORARY_REDIRECT);
    }

    pub fn return_not_modified(&mut self) {
        self.return_status(StatusCode::NOT_MODIFIED);
    }

    pub fn return_bad_request(&mut self) {
        self.return_status(StatusCode::BAD_REQUEST);
    }

    pub fn return_unauthorized(&mut self) {
        self.return_status(StatusCode::UNAUTHORIZED);
    }

    pub fn return_forbidden(&mut self) {
        self.return_status(StatusCode::FORBIDDEN);
    }

    /// Answers 404, or redirects to the configured "not found" page.
    pub fn return_not_found(&mut self) {
        match self.config.not_found_url().map(str::to_owned) {
            Some(url) => self.return_redirect(&url),
            None => self.return_status(StatusCode::NOT_FOUND),
        }
    }

    pub fn return_method_not_allowed(&mut self) {
        self.return_status(StatusCode::METHOD_NOT_ALLOWED);
    }

    pub fn return_entity_too_large(&mut self) {
        self.return_status(StatusCode::PAYLOAD_TOO_LARGE);
    }

    pub fn return_internal_server_error(&mut self) {
        self.return_status(StatusCode::INTERNAL_SERVER_ERROR);
    }

    pub fn return_not_implemented(&mut self) {
        self.return_status(StatusCode::NOT_IMPLEMENTED);
    }

    pub fn return_service_unavailable(&mut self) {
        self.return_status(StatusCode::SERVICE_UNAVAILABLE);
    }

    /// Answers `101 Switching Protocols` to `upgrade`.
    ///
    /// Once the response is sent the connection stops serving HTTP and hands its open
    /// stream to `on_switched`. Bytes the client sent right after the request head are
    /// read from that stream first.
    pub fn switching_protocols<F>(&mut self, upgrade: &str, on_switched: F)
    where
        F: FnOnce(Box<dyn Transport>) + 'static,
    {
        self.reply(Reply::Switch { upgrade: upgrade.to_owned(), on_switched: Box::new(on_switched) });
    }

    pub(crate) fn take_reply(&mut self) -> Option<Reply> {
        self.reply.take()
    }

    /// Describes the placeholder body chosen after the reply was recorded, or drops the
    /// content type when the reply goes out without a body.
    pub(crate) fn set_placeholder_type(&mut self, content_type: Option<&mime::Mime>) {
        self.content_type = content_type.map(|content_type| content_type.essence_str().to_owned());
        self.content_charset = content_type.map(|_| DEFAULT_CHARSET.to_owned());
    }

    fn check_unsent(&self) -> Result<(), ResponseError> {
        if self.headers_sent() {
            warn!("response header changed after the headers were sent");
        }
        ensure!(!self.headers_sent(), ResponseError::HeadersSent);
        Ok(())
    }

    fn reply(&mut self, reply: Reply) {
        if self.headers_sent() {
            warn!(status = reply.status().as_u16(), "response headers already sent");
            if let Reply::Stream { mut source, .. } = reply {
                source.close();
            }
            return;
        }
        self.status = Some(reply.status());
        self.reply = Some(reply);
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("headers", &self.headers)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}
