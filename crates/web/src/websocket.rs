//! WebSocket opening handshake.
//!
//! [`WebSocketModule`] answers `Upgrade: websocket` requests with `101 Switching
//! Protocols` and the `Sec-WebSocket-Accept` proof, then hands the raw stream to a
//! callback. Framing the messages that follow is up to the callback.

use std::fmt;
use std::net::SocketAddr;
use std::rc::Rc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};
use slim_http::handler::{Flow, Handler, HandlerError};
use slim_http::protocol::HttpRequest;
use slim_http::socket::Transport;
use tracing::{debug, warn};

/// Appended to the client key before hashing, as fixed by RFC 6455.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const KEY_HEADER: &str = "sec-websocket-key";
const ACCEPT_HEADER: &str = "Sec-WebSocket-Accept";

/// Computes the `Sec-WebSocket-Accept` value answering a `Sec-WebSocket-Key`.
pub fn accept_key(key: &str) -> String {
    let mut sha = Sha1::new();
    sha.update(key.trim().as_bytes());
    sha.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(sha.finalize())
}

/// A connection that completed the handshake.
pub struct Upgraded {
    pub path: String,
    pub peer: SocketAddr,
    pub stream: Box<dyn Transport>,
}

impl fmt::Debug for Upgraded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upgraded").field("path", &self.path).field("peer", &self.peer).finish_non_exhaustive()
    }
}

type OnUpgraded = Rc<dyn Fn(Upgraded)>;

pub struct WebSocketModule {
    on_upgraded: OnUpgraded,
}

impl WebSocketModule {
    /// Creates a module handing every upgraded connection to `on_upgraded`.
    pub fn new<F>(on_upgraded: F) -> Self
    where
        F: Fn(Upgraded) + 'static,
    {
        Self { on_upgraded: Rc::new(on_upgraded) }
    }
}

impl Handler for WebSocketModule {
    fn on_request(&self, request: &mut HttpRequest) -> Result<Flow, HandlerError> {
        if !request.upgrade().is_some_and(|protocol| protocol.eq_ignore_ascii_case("websocket")) {
            return Ok(Flow::Next);
        }

        let key = request.header(KEY_HEADER);
        if key.is_empty() {
            warn!(path = request.path(), "websocket upgrade without key");
            request.response_mut().return_bad_request();
            return Ok(Flow::Next);
        }

        let accept = accept_key(key);
        let path = request.path().to_owned();
        let peer = request.peer_addr();
        let on_upgraded = Rc::clone(&self.on_upgraded);

        let response = request.response_mut();
        response.set_header(ACCEPT_HEADER, &accept)?;
        response.switching_protocols("websocket", move |stream| {
            debug!(peer = %peer, path = %path, "websocket connection established");
            on_upgraded(Upgraded { path, peer, stream });
        });
        Ok(Flow::Next)
    }
}

impl fmt::Debug for WebSocketModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketModule").finish_non_exhaustive()
    }
}
