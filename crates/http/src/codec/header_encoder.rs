//! HTTP response head encoder
//!
//! This module serializes the status line and headers of a response into raw bytes.
//! Headers are written in a fixed order:
//!
//! 1. `HTTP/1.1 <code> <reason>`
//! 2. `Server`
//! 3. `Access-Control-Allow-Origin`, when an origin is allowed
//! 4. headers set by the handler
//! 5. `Cache-Control` and `Content-Type`, unless the handler set them itself
//! 6. `Content-Length` or `Transfer-Encoding: chunked`
//! 7. `Connection: close`
//!
//! A protocol switch replaces 5 to 7 with `Connection: Upgrade` and `Upgrade`.
//! Headers the encoder manages itself are skipped when a handler sets them.

use std::io;
use std::io::Write;

use bytes::{BufMut, BytesMut};
use http::header::{self, HeaderMap, HeaderName};
use http::StatusCode;

/// Initial buffer size allocated for header serialization
pub const INIT_HEADER_SIZE: usize = 256;

const CACHE_FOREVER: &str = "public, max-age=31536000";
const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

const MANAGED: [HeaderName; 5] =
    [header::SERVER, header::CONNECTION, header::CONTENT_LENGTH, header::TRANSFER_ENCODING, header::UPGRADE];

/// How the response content is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing<'a> {
    Length(u64),
    Chunked,
    /// No content follows: the connection switches to the named protocol.
    Upgrade(&'a str),
}

/// Everything the encoder needs to know about a response.
#[derive(Debug)]
pub struct ResponseHead<'a> {
    pub status: StatusCode,
    pub server_name: &'a str,
    pub allow_origin: Option<&'a str>,
    pub headers: &'a HeaderMap,
    pub allow_caching: bool,
    pub content_type: Option<&'a str>,
    pub content_charset: Option<&'a str>,
    pub framing: Framing<'a>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderEncoder;

impl HeaderEncoder {
    /// Encodes `head` into `dst`, including the empty line that ends the head.
    pub fn encode(&self, head: &ResponseHead<'_>, dst: &mut BytesMut) -> io::Result<()> {
        dst.reserve(INIT_HEADER_SIZE);
        write!(
            FastWrite(dst),
            "HTTP/1.1 {} {}\r\n",
            head.status.as_str(),
            head.status.canonical_reason().unwrap_or("Unknown")
        )?;
        put_header(dst, header::SERVER.as_str(), head.server_name.as_bytes());
        if let Some(origin) = head.allow_origin.filter(|origin| !origin.is_empty()) {
            put_header(dst, header::ACCESS_CONTROL_ALLOW_ORIGIN.as_str(), origin.as_bytes());
        }

        for (name, value) in head.headers {
            if MANAGED.contains(name) || (head.allow_origin.is_some() && name == header::ACCESS_CONTROL_ALLOW_ORIGIN) {
                continue;
            }
            put_header(dst, name.as_str(), value.as_bytes());
        }

        match head.framing {
            Framing::Upgrade(protocol) => {
                put_header(dst, header::CONNECTION.as_str(), b"Upgrade");
                put_header(dst, header::UPGRADE.as_str(), protocol.as_bytes());
            }
            framing => {
                if !head.headers.contains_key(header::CACHE_CONTROL) {
                    let policy = if head.allow_caching { CACHE_FOREVER } else { NO_CACHE };
                    put_header(dst, header::CACHE_CONTROL.as_str(), policy.as_bytes());
                }
                if let Some(content_type) = head.content_type
                    && !head.headers.contains_key(header::CONTENT_TYPE)
                {
                    match head.content_charset {
                        Some(charset) => write!(FastWrite(dst), "content-type: {content_type}; charset={charset}\r\n")?,
                        None => put_header(dst, header::CONTENT_TYPE.as_str(), content_type.as_bytes()),
                    }
                }
                match framing {
                    Framing::Length(n) => write!(FastWrite(dst), "content-length: {n}\r\n")?,
                    _ => put_header(dst, header::TRANSFER_ENCODING.as_str(), b"chunked"),
                }
                put_header(dst, header::CONNECTION.as_str(), b"close");
            }
        }

        dst.put_slice(b"\r\n");
        Ok(())
    }
}

fn put_header(dst: &mut BytesMut, name: &str, value: &[u8]) {
    dst.put_slice(name.as_bytes());
    dst.put_slice(b": ");
    dst.put_slice(value);
    dst.put_slice(b"\r\n");
}

/// Fast writer implementation for writing to `BytesMut`.
///
/// Formatting goes straight into the buffer, which grows as needed, so writes never fail.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;
    use indoc::indoc;

    use super::*;

    fn encode(head: &ResponseHead<'_>) -> String {
        let mut dst = BytesMut::new();
        HeaderEncoder.encode(head, &mut dst).unwrap();
        String::from_utf8(dst.to_vec()).unwrap()
    }

    fn crlf(text: &str) -> String {
        text.replace('\n', "\r\n")
    }

    fn head(headers: &HeaderMap) -> ResponseHead<'_> {
        ResponseHead {
            status: StatusCode::OK,
            server_name: "Slim Server",
            allow_origin: None,
            headers,
            allow_caching: false,
            content_type: Some("text/html"),
            content_charset: Some("UTF-8"),
            framing: Framing::Length(5),
        }
    }

    #[test]
    fn writes_headers_in_order() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("42"));

        let expected = indoc! {"
            HTTP/1.1 200 OK
            server: Slim Server
            x-request-id: 42
            cache-control: no-cache, no-store, must-revalidate
            content-type: text/html; charset=UTF-8
            content-length: 5
            connection: close

        "};
        assert_eq!(encode(&head(&headers)), crlf(expected));
    }

    #[test]
    fn chunked_cached_response_with_origin() {
        let headers = HeaderMap::new();
        let head = ResponseHead {
            allow_origin: Some("https://app.example"),
            allow_caching: true,
            content_type: Some("application/octet-stream"),
            content_charset: None,
            framing: Framing::Chunked,
            ..head(&headers)
        };

        let expected = indoc! {"
            HTTP/1.1 200 OK
            server: Slim Server
            access-control-allow-origin: https://app.example
            cache-control: public, max-age=31536000
            content-type: application/octet-stream
            transfer-encoding: chunked
            connection: close

        "};
        assert_eq!(encode(&head), crlf(expected));
    }

    #[test]
    fn handler_headers_cannot_override_framing() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("999"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=60"));

        let encoded = encode(&ResponseHead { content_type: None, framing: Framing::Length(0), ..head(&headers) });
        assert!(encoded.contains("cache-control: max-age=60\r\n"));
        assert!(encoded.contains("content-length: 0\r\n"));
        assert!(!encoded.contains("999"));
        assert!(!encoded.contains("keep-alive"));
        assert!(!encoded.contains("content-type"));
    }

    #[test]
    fn upgrade_head() {
        let mut headers = HeaderMap::new();
        headers.insert("sec-websocket-accept", HeaderValue::from_static("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));

        let head = ResponseHead { status: StatusCode::SWITCHING_PROTOCOLS, framing: Framing::Upgrade("websocket"), ..head(&headers) };
        let expected = indoc! {"
            HTTP/1.1 101 Switching Protocols
            server: Slim Server
            sec-websocket-accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
            connection: Upgrade
            upgrade: websocket

        "};
        assert_eq!(encode(&head), crlf(expected));
    }
}
