//! Line-oriented HTTP request head parser.
//!
//! The connection receives the request one line at a time and feeds each line to a
//! [`RequestParser`], which fills a [`RequestHead`]:
//!
//! 1. the first line is the request line `METHOD SP target SP version`; the method and
//!    version are upper-cased, the target is split at `?` into the percent-decoded path
//!    and the query string
//! 2. every following non-empty line is a `name: value` header; names are
//!    case-insensitive and a repeated header keeps its last value
//! 3. an empty line ends the head
//!
//! The parser does no I/O, so it can be driven by any line source.
//!
//! # Limits
//!
//! - Lines are bounded by the receive slot of the connection
//! - The number of header lines is bounded by `max_header_lines`; exceeding it fails
//!   with [`ParseError::TooManyHeaders`], answered with 413

use http::Method;

use crate::ensure;
use crate::protocol::query::decode_path;
use crate::protocol::{ParseError, RequestHead};

/// What the parser needs next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// Feed the next line.
    Incomplete,
    /// The empty line ending the head was seen.
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    RequestLine,
    Headers,
    Complete,
}

#[derive(Debug, Clone)]
pub struct RequestParser {
    state: State,
    header_lines: usize,
    max_header_lines: usize,
}

impl RequestParser {
    pub fn new(max_header_lines: usize) -> Self {
        Self { state: State::RequestLine, header_lines: 0, max_header_lines }
    }

    /// Parses one line, given without its terminator.
    ///
    /// `None` stands for a line that could not be decoded and is rejected.
    pub fn feed(&mut self, line: Option<&str>, head: &mut RequestHead) -> Result<ParseStatus, ParseError> {
        let line = line.ok_or(ParseError::UndecodableLine)?;
        match self.state {
            State::RequestLine => {
                parse_request_line(line, head)?;
                self.state = State::Headers;
                Ok(ParseStatus::Incomplete)
            }
            State::Headers => {
                let line = line.trim();
                if line.is_empty() {
                    self.state = State::Complete;
                    return Ok(ParseStatus::Complete);
                }

                let (name, value) = line.split_once(':').ok_or_else(|| ParseError::invalid_header(line))?;
                ensure!(self.header_lines < self.max_header_lines, ParseError::too_many_headers(self.max_header_lines));
                self.header_lines += 1;
                head.insert_header(name.trim(), value.trim())?;
                Ok(ParseStatus::Incomplete)
            }
            State::Complete => Err(ParseError::AlreadyComplete),
        }
    }
}

fn parse_request_line(line: &str, head: &mut RequestHead) -> Result<(), ParseError> {
    let mut parts = line.split_whitespace();
    let (Some(method), Some(target), Some(version), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::invalid_request_line(line));
    };

    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes()).map_err(|_e| ParseError::invalid_method(method))?;
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    head.set_request_line(method, decode_path(path), query.to_owned(), version.to_ascii_uppercase())
}
