//! HTTP connection serving exactly one request.
//!
//! The connection runs through these phases:
//!
//! 1. **Receiving the head**: lines are received one by one and fed to the
//!    [`RequestParser`] until the empty line
//! 2. **Handling**: the request is offered to the [`HandlerChain`]; a handler may suspend
//!    it to receive the request content first
//! 3. **Responding**: the recorded reply is serialized and sent, either at once, as a
//!    stream pumped through the send slot, or as a `101` after which the stream is handed
//!    over
//! 4. **Closed**: every response ends with `Connection: close`
//!
//! A malformed head is answered with 400 (or 413 for too many headers) without
//! involving any handler. A request no handler answers gets 501.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use http::StatusCode;
use mio::Interest;
use mio::event::Source;
use tracing::{debug, error, info, trace, warn};

use crate::buffer::SlotPair;
use crate::codec::{Framing, HeaderEncoder, ParseStatus, RequestParser, ResponseHead, status_content};
use crate::config::HttpConfig;
use crate::connection::body_stream::{BodyStream, Step};
use crate::handler::{Flow, HandlerChain};
use crate::protocol::response::Reply;
use crate::protocol::{HttpRequest, OnSwitched};
use crate::socket::{
    AsyncSocket, ClosedReason, Completion, LineEncoding, Released, Rewind, SocketError, TcpConnection, Transport,
};

enum Phase {
    ReceivingHead,
    Handling,
    AwaitingContent { handler: usize },
    Responding(Transmission),
}

enum Transmission {
    Fixed,
    Stream(BodyStream),
    Switch(OnSwitched),
}

pub struct HttpConnection<T> {
    tcp: TcpConnection<T>,
    request: HttpRequest,
    parser: RequestParser,
    phase: Phase,
    config: Arc<HttpConfig>,
}

impl<T: Transport + 'static> HttpConnection<T> {
    /// Wraps an accepted stream and starts receiving the request line.
    pub fn new(stream: T, peer: SocketAddr, slots: SlotPair, config: Arc<HttpConfig>) -> Self {
        let request = HttpRequest::new(peer, Arc::clone(&config));
        let parser = RequestParser::new(config.max_header_lines());
        let mut connection = Self {
            tcp: TcpConnection::new(stream, peer, slots),
            request,
            parser,
            phase: Phase::ReceivingHead,
            config,
        };
        connection.receive_line();
        connection
    }

    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.tcp.peer_addr()
    }

    #[inline]
    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    /// Runs completions until the connection waits for readiness again.
    fn drive(&mut self, handlers: &HandlerChain) {
        while let Some(completion) = self.tcp.poll_read().or_else(|| self.tcp.poll_write()) {
            match completion {
                Completion::Line(line) => self.on_line(line.as_deref(), handlers),
                Completion::Data(_) => self.on_content(handlers),
                Completion::Sent => self.on_sent(),
            }
        }
    }

    fn receive_line(&mut self) {
        if let Err(e) = self.tcp.recv_line(LineEncoding::Utf8, Some(self.config.timeout())) {
            debug!(peer = %self.tcp.peer_addr(), cause = %e, "cannot receive request line");
            self.tcp.close(ClosedReason::Error);
        }
    }

    fn on_line(&mut self, line: Option<&str>, handlers: &HandlerChain) {
        match self.parser.feed(line, self.request.head_mut()) {
            Ok(ParseStatus::Incomplete) => self.receive_line(),
            Ok(ParseStatus::Complete) => self.run_handlers(handlers),
            Err(e) => {
                warn!(peer = %self.tcp.peer_addr(), cause = %e, "malformed request");
                self.request.response_mut().return_status(e.status());
                self.respond();
            }
        }
    }

    fn run_handlers(&mut self, handlers: &HandlerChain) {
        self.phase = Phase::Handling;
        for (index, handler) in handlers.iter().enumerate() {
            let result = handler.on_request(&mut self.request);
            if let Err(e) = &result {
                error!(handler = handler.name(), path = self.request.path(), cause = %e, "request handler failed");
            }
            if self.request.response().headers_sent() {
                self.respond();
                return;
            }
            if let Ok(Flow::Pending) = result {
                self.suspend(index);
                return;
            }
        }

        self.request.response_mut().return_not_implemented();
        self.respond();
    }

    /// Receives the content the pending handler asked for.
    fn suspend(&mut self, handler: usize) {
        let Some(size) = self.request.take_content_request() else {
            error!(path = self.request.path(), "handler kept the request without asking for its content");
            self.request.response_mut().return_internal_server_error();
            self.respond();
            return;
        };

        match self.tcp.recv_data(Some(size), Some(self.config.timeout())) {
            Ok(()) => self.phase = Phase::AwaitingContent { handler },
            Err(SocketError::OutOfMemory { size }) => {
                error!(size, path = self.request.path(), "not enough memory to receive request content");
                self.request.response_mut().return_service_unavailable();
                self.respond();
            }
            Err(e) => {
                warn!(path = self.request.path(), cause = %e, "cannot receive request content");
                self.request.response_mut().return_bad_request();
                self.respond();
            }
        }
    }

    fn on_content(&mut self, handlers: &HandlerChain) {
        let Phase::AwaitingContent { handler: index } = self.phase else {
            trace!("content received outside of a content request");
            return;
        };
        self.phase = Phase::Handling;

        let Some(handler) = handlers.get(index) else {
            error!(index, "handler awaiting content is gone");
            self.request.response_mut().return_internal_server_error();
            self.respond();
            return;
        };

        let result = handler.on_content(&mut self.request, self.tcp.received());
        if let Err(e) = &result {
            error!(handler = handler.name(), path = self.request.path(), cause = %e, "content handler failed");
        }
        if self.request.response().headers_sent() {
            self.respond();
            return;
        }

        match result {
            Ok(Flow::Pending) => self.suspend(index),
            Ok(Flow::Next) => {
                warn!(handler = handler.name(), path = self.request.path(), "no response was sent");
                self.request.response_mut().return_not_implemented();
                self.respond();
            }
            Err(_) => {
                self.request.response_mut().return_internal_server_error();
                self.respond();
            }
        }
    }

    /// Serializes the recorded reply and starts sending it.
    fn respond(&mut self) {
        let Some(reply) = self.request.response_mut().take_reply() else {
            error!(path = self.request.path(), "no reply recorded");
            self.tcp.close(ClosedReason::Error);
            return;
        };
        let status = reply.status();
        info!(
            peer = %self.tcp.peer_addr(),
            host = self.request.host(),
            method = %self.request.method(),
            path = self.request.path(),
            status = status.as_u16(),
            reason = status.canonical_reason().unwrap_or_default(),
            "response"
        );

        let mut buf = BytesMut::new();
        let encoded = match reply {
            Reply::Content { status, content } => {
                let content = content.or_else(|| self.placeholder(status));
                let length = content.as_ref().map_or(0, |content| content.len() as u64);
                self.encode_head(status, Framing::Length(length), &mut buf).map(|()| {
                    if let Some(content) = content.filter(|_| !self.request.is_head()) {
                        buf.extend_from_slice(&content);
                    }
                    Transmission::Fixed
                })
            }
            Reply::Stream { status, source } => {
                let content_length = self.request.response().content_length();
                let mut stream = BodyStream::new(source, content_length);
                let framing = match content_length {
                    Some(length) if !stream.is_chunked() => Framing::Length(length),
                    _ => Framing::Chunked,
                };
                self.encode_head(status, framing, &mut buf).map(|()| {
                    if self.request.is_head() {
                        stream.close_source();
                        Transmission::Fixed
                    } else {
                        Transmission::Stream(stream)
                    }
                })
            }
            Reply::Switch { upgrade, on_switched } => self
                .encode_head(StatusCode::SWITCHING_PROTOCOLS, Framing::Upgrade(&upgrade), &mut buf)
                .map(|()| Transmission::Switch(on_switched)),
        };

        let transmission = match encoded {
            Ok(transmission) => transmission,
            Err(e) => {
                error!(cause = %e, "failed to encode response head");
                self.tcp.close(ClosedReason::Error);
                return;
            }
        };
        if let Err(e) = self.tcp.send_bytes(&buf) {
            debug!(cause = %e, "cannot send response");
            self.tcp.close(ClosedReason::Error);
            return;
        }
        self.phase = Phase::Responding(transmission);
        self.tcp.expire_after(self.config.timeout());
    }

    fn placeholder(&mut self, status: StatusCode) -> Option<Bytes> {
        let placeholder = status_content(status, self.request.accept());
        self.request.response_mut().set_placeholder_type(placeholder.as_ref().map(|(content_type, _)| content_type));
        placeholder.map(|(_, body)| Bytes::from(body))
    }

    fn encode_head(&self, status: StatusCode, framing: Framing<'_>, dst: &mut BytesMut) -> std::io::Result<()> {
        let response = self.request.response();
        let origin = self.request.origin();
        let allow_origin = if self.config.allow_all_origins() && !origin.is_empty() {
            Some(origin)
        } else {
            response.access_control_allow_origin()
        };

        let head = ResponseHead {
            status,
            server_name: self.config.server_name(),
            allow_origin,
            headers: response.headers(),
            allow_caching: response.allow_caching(),
            content_type: response.content_type(),
            content_charset: response.content_charset(),
            framing,
        };
        HeaderEncoder.encode(&head, dst)
    }

    fn on_sent(&mut self) {
        match &mut self.phase {
            Phase::Responding(Transmission::Fixed) => self.finish(),
            Phase::Responding(Transmission::Stream(stream)) => match stream.advance(&mut self.tcp) {
                Step::Sent => self.tcp.expire_after(self.config.timeout()),
                Step::Finished => self.finish(),
                Step::Failed => {
                    error!(path = self.request.path(), "streamed content cannot be sent");
                    self.tcp.close(ClosedReason::Error);
                }
            },
            Phase::Responding(Transmission::Switch(_)) => {
                trace!(peer = %self.tcp.peer_addr(), "switching protocols");
                self.tcp.detach();
            }
            Phase::ReceivingHead | Phase::Handling | Phase::AwaitingContent { .. } => {
                trace!("send completed outside of a response");
            }
        }
    }

    fn finish(&mut self) {
        self.tcp.close_quietly(ClosedReason::ClosedByHost);
    }
}

impl<T: Transport + 'static> AsyncSocket for HttpConnection<T> {
    type Context = HandlerChain;
    type Stream = Rewind<T>;

    fn on_readable(&mut self, handlers: &mut HandlerChain) {
        self.tcp.readable();
        self.drive(handlers);
    }

    fn on_writable(&mut self, handlers: &mut HandlerChain) {
        self.tcp.writable();
        self.drive(handlers);
    }

    fn interest(&self) -> Option<Interest> {
        self.tcp.interest()
    }

    fn source(&mut self) -> Option<&mut dyn Source> {
        AsyncSocket::source(&mut self.tcp)
    }

    fn deadline(&self) -> Option<Instant> {
        self.tcp.deadline()
    }

    fn expired(&mut self) {
        debug!(peer = %self.tcp.peer_addr(), path = self.request.path(), "connection timed out");
    }

    fn close(&mut self, reason: ClosedReason) -> bool {
        self.tcp.close(reason)
    }

    fn detach(&mut self) -> bool {
        self.tcp.detach()
    }

    fn is_open(&self) -> bool {
        self.tcp.is_open()
    }

    /// Hands a switched stream, with the bytes read past the request head, to its new
    /// owner; any unfinished content source is closed.
    fn release(self) -> Released<Rewind<T>> {
        let Self { tcp, phase, .. } = self;
        let Released { slots, stream } = AsyncSocket::release(tcp);
        match (phase, stream) {
            (Phase::Responding(Transmission::Switch(on_switched)), Some(stream)) => {
                on_switched(Box::new(stream));
                Released { slots, stream: None }
            }
            (_, stream) => Released { slots, stream },
        }
    }
}

impl<T> fmt::Debug for HttpConnection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match &self.phase {
            Phase::ReceivingHead => "receiving head",
            Phase::Handling => "handling",
            Phase::AwaitingContent { .. } => "awaiting content",
            Phase::Responding(_) => "responding",
        };
        f.debug_struct("HttpConnection").field("tcp", &self.tcp).field("phase", &phase).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::io::Read;
    use std::rc::Rc;

    use super::*;
    use crate::buffer::SlotPool;
    use crate::handler::{Handler, HandlerError, handler_fn};
    use crate::protocol::{MockByteSource, ReadSource};
    use crate::testing::{ScriptedStream, peer};

    struct Served {
        connection: HttpConnection<ScriptedStream>,
        written: Rc<RefCell<Vec<u8>>>,
        dropped: Rc<Cell<bool>>,
    }

    impl Served {
        fn output(&self) -> String {
            String::from_utf8(self.written.borrow().clone()).unwrap()
        }
    }

    fn serve_with(request: &[u8], mut handlers: HandlerChain, config: HttpConfig) -> Served {
        let stream = ScriptedStream::new().with_read(request);
        let written = stream.written();
        let dropped = stream.dropped();
        let slots = SlotPool::new(1, 256).acquire().unwrap();
        let mut connection = HttpConnection::new(stream, peer(), slots, Arc::new(config));
        connection.on_readable(&mut handlers);
        Served { connection, written, dropped }
    }

    fn serve(request: &[u8], handlers: HandlerChain) -> Served {
        serve_with(request, handlers, HttpConfig::default())
    }

    fn crlf(text: &str) -> String {
        text.replace('\n', "\r\n")
    }

    #[test]
    fn answers_simple_get() {
        let handlers = HandlerChain::new().with(handler_fn(|request| {
            assert_eq!(request.path(), "/hello");
            request.response_mut().return_ok_text("hi");
            Ok(Flow::Next)
        }));

        let served = serve(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n", handlers);
        let expected = "HTTP/1.1 200 OK\n\
                        server: Slim Server\n\
                        cache-control: no-cache, no-store, must-revalidate\n\
                        content-type: text/html; charset=UTF-8\n\
                        content-length: 2\n\
                        connection: close\n\
                        \n";
        assert_eq!(served.output(), crlf(expected) + "hi");
        assert!(!served.connection.is_open());
        assert!(served.dropped.get());
    }

    #[test]
    fn malformed_header_skips_handlers() {
        let called = Rc::new(Cell::new(false));
        let seen = Rc::clone(&called);
        let handlers = HandlerChain::new().with(handler_fn(move |_| {
            seen.set(true);
            Ok(Flow::Next)
        }));

        let served = serve(b"GET / HTTP/1.1\r\nBadHeader\r\n\r\n", handlers);
        let expected = "HTTP/1.1 400 Bad Request\n\
                        server: Slim Server\n\
                        cache-control: no-cache, no-store, must-revalidate\n\
                        content-length: 0\n\
                        connection: close\n\
                        \n";
        assert_eq!(served.output(), crlf(expected));
        assert!(!called.get());
    }

    #[test]
    fn unanswered_request_gets_json_placeholder() {
        let served = serve(b"GET /api HTTP/1.1\r\nAccept: application/json\r\n\r\n", HandlerChain::new());
        let output = served.output();
        assert!(output.starts_with("HTTP/1.1 501 Not Implemented\r\n"));
        assert!(output.contains("content-type: application/json; charset=UTF-8\r\n"));
        assert!(output.ends_with(r#"{"code":501,"name":"Not Implemented"}"#));
    }

    #[test]
    fn status_without_placeholder_drops_content_type() {
        let handlers = HandlerChain::new().with(handler_fn(|request| {
            request.response_mut().set_content_type("text/plain")?;
            request.response_mut().return_status(StatusCode::ACCEPTED);
            Ok(Flow::Next)
        }));
        let served = serve(b"POST /jobs HTTP/1.1\r\nAccept: image/png\r\n\r\n", handlers);
        let output = served.output();
        assert!(output.starts_with("HTTP/1.1 202 Accepted\r\n"));
        assert!(output.contains("content-length: 0\r\n"));
        assert!(!output.contains("content-type"));
        assert!(output.ends_with("\r\n\r\n"));
    }

    #[test]
    fn head_request_gets_headers_only() {
        let handlers = HandlerChain::new().with(handler_fn(|request| {
            request.response_mut().return_ok_text("body");
            Ok(Flow::Next)
        }));
        let served = serve(b"HEAD / HTTP/1.1\r\n\r\n", handlers);
        let output = served.output();
        assert!(output.contains("content-length: 4\r\n"));
        assert!(output.ends_with("\r\n\r\n"));
    }

    #[test]
    fn failing_handler_is_skipped() {
        let handlers = HandlerChain::new()
            .with(handler_fn(|_| Err(HandlerError::from("boom"))))
            .with(handler_fn(|request| {
                request.response_mut().return_ok_text("second");
                Ok(Flow::Next)
            }));

        let served = serve(b"GET / HTTP/1.1\r\n\r\n", handlers);
        assert!(served.output().ends_with("\r\n\r\nsecond"));
    }

    #[test]
    fn streams_chunked_content() {
        let handlers = HandlerChain::new().with(handler_fn(|request| {
            request.response_mut().set_content_type("text/plain")?;
            request.response_mut().return_stream(StatusCode::OK, ReadSource::new(&b"hello"[..]));
            Ok(Flow::Next)
        }));

        let served = serve(b"GET /stream HTTP/1.1\r\n\r\n", handlers);
        let output = served.output();
        assert!(output.contains("transfer-encoding: chunked\r\n"));
        assert!(!output.contains("content-length"));
        assert!(output.ends_with("\r\n\r\n5\r\nhello\r\n0\r\n\r\n"));
        assert!(!served.connection.is_open());
    }

    #[test]
    fn streams_content_of_known_length() {
        let handlers = HandlerChain::new().with(handler_fn(|request| {
            request.response_mut().set_content_length(5)?;
            request.response_mut().return_stream(StatusCode::OK, ReadSource::new(&b"hello"[..]));
            Ok(Flow::Next)
        }));

        let served = serve(b"GET /stream HTTP/1.1\r\n\r\n", handlers);
        let output = served.output();
        assert!(output.contains("content-length: 5\r\n"));
        assert!(output.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn head_request_closes_stream_unread() {
        let handlers = HandlerChain::new().with(handler_fn(|request| {
            let mut source = MockByteSource::new();
            source.expect_read().never();
            source.expect_close().times(1).return_const(());
            request.response_mut().set_content_length(10)?;
            request.response_mut().return_stream(StatusCode::OK, source);
            Ok(Flow::Next)
        }));

        let served = serve(b"HEAD /file HTTP/1.1\r\n\r\n", handlers);
        let output = served.output();
        assert!(output.contains("content-length: 10\r\n"));
        assert!(output.ends_with("\r\n\r\n"));
    }

    struct FormEcho;

    impl Handler for FormEcho {
        fn on_request(&self, request: &mut HttpRequest) -> Result<Flow, HandlerError> {
            let length = request.content_length();
            request.receive_content(length);
            Ok(Flow::Pending)
        }

        fn on_content(&self, request: &mut HttpRequest, content: &[u8]) -> Result<Flow, HandlerError> {
            let form = request.read_form(content)?;
            request.response_mut().return_ok_text(form["name"].clone());
            Ok(Flow::Next)
        }
    }

    #[test]
    fn delivers_request_content_to_pending_handler() {
        let handlers = HandlerChain::new().with(FormEcho);
        let served = serve(b"POST /echo HTTP/1.1\r\nContent-Length: 9\r\n\r\nname=slim", handlers);
        assert!(served.output().ends_with("\r\n\r\nslim"));
    }

    #[test]
    fn pending_without_content_request_fails() {
        let handlers = HandlerChain::new().with(handler_fn(|_| Ok(Flow::Pending)));
        let served = serve(b"GET / HTTP/1.1\r\n\r\n", handlers);
        assert!(served.output().starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    }

    #[test]
    fn reflects_origin_when_all_origins_are_allowed() {
        let handlers = HandlerChain::new().with(handler_fn(|request| {
            request.response_mut().return_ok();
            Ok(Flow::Next)
        }));
        let config = HttpConfig::default().with_allow_all_origins(true);
        let served = serve_with(b"GET / HTTP/1.1\r\nOrigin: https://app.example\r\n\r\n", handlers, config);
        assert!(served.output().contains("access-control-allow-origin: https://app.example\r\n"));
    }

    #[test]
    fn too_many_headers_is_rejected() {
        let config = HttpConfig::default().with_max_header_lines(1);
        let served = serve_with(b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\n\r\n", HandlerChain::new(), config);
        assert!(served.output().starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
    }

    #[test]
    fn switching_protocols_hands_over_the_stream() {
        let claimed: Rc<RefCell<Option<Box<dyn Transport>>>> = Rc::default();
        let slot = Rc::clone(&claimed);
        let handlers = HandlerChain::new().with(handler_fn(move |request| {
            let slot = Rc::clone(&slot);
            request.response_mut().set_header("Sec-WebSocket-Accept", "abc")?;
            request.response_mut().switching_protocols("websocket", move |stream| *slot.borrow_mut() = Some(stream));
            Ok(Flow::Next)
        }));

        let served =
            serve(b"GET /ws HTTP/1.1\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n", handlers);
        let output = served.output();
        assert!(output.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(output.contains("connection: Upgrade\r\nupgrade: websocket\r\n"));
        assert!(!served.connection.is_open());
        assert!(claimed.borrow().is_none());

        let released = AsyncSocket::release(served.connection);
        assert!(released.stream.is_none());
        assert!(claimed.borrow().is_some());
        assert!(!served.dropped.get());
    }

    #[test]
    fn switched_stream_starts_with_bytes_sent_after_the_head() {
        let claimed: Rc<RefCell<Option<Box<dyn Transport>>>> = Rc::default();
        let slot = Rc::clone(&claimed);
        let handlers = HandlerChain::new().with(handler_fn(move |request| {
            let slot = Rc::clone(&slot);
            request.response_mut().switching_protocols("echo", move |stream| *slot.borrow_mut() = Some(stream));
            Ok(Flow::Next)
        }));

        let served = serve(b"GET /echo HTTP/1.1\r\nConnection: Upgrade\r\nUpgrade: echo\r\n\r\nhello", handlers);
        assert!(served.output().starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        drop(AsyncSocket::release(served.connection));

        let mut stream = claimed.borrow_mut().take().unwrap();
        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn expiry_while_receiving_closes_with_timeout() {
        let stream = ScriptedStream::new();
        let slots = SlotPool::new(1, 256).acquire().unwrap();
        let mut connection = HttpConnection::new(stream, peer(), slots, Arc::default());

        assert!(connection.deadline().is_some());
        let later = Instant::now() + HttpConfig::default().timeout() * 2;
        assert!(connection.pump_expire(later));
        assert!(!connection.is_open());
    }
}
