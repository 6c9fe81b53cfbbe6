use http::StatusCode;
use thiserror::Error;

/// Errors raised while turning request lines into a [`RequestHead`](super::RequestHead).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("line is not valid utf-8")]
    UndecodableLine,

    #[error("invalid request line: {line:?}")]
    InvalidRequestLine { line: String },

    #[error("invalid http method: {method:?}")]
    InvalidMethod { method: String },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid query string: {reason}")]
    InvalidQuery { reason: String },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("request head is already complete")]
    AlreadyComplete,
}

impl ParseError {
    pub fn invalid_request_line<S: ToString>(line: S) -> Self {
        Self::InvalidRequestLine { line: line.to_string() }
    }

    pub fn invalid_method<S: ToString>(method: S) -> Self {
        Self::InvalidMethod { method: method.to_string() }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_query<S: ToString>(str: S) -> Self {
        Self::InvalidQuery { reason: str.to_string() }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    /// The status the server answers with when parsing fails.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::TooManyHeaders { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Errors raised when building a response.
#[derive(Error, Debug)]
pub enum ResponseError {
    #[error("response headers already sent")]
    HeadersSent,

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("failed to serialize content: {source}")]
    Serialize {
        #[from]
        source: serde_json::Error,
    },
}

impl ResponseError {
    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }
}

/// Errors raised when decoding request content.
#[derive(Error, Debug)]
pub enum ContentError {
    #[error("invalid form content: {source}")]
    Form {
        #[from]
        source: serde_urlencoded::de::Error,
    },

    #[error("invalid json content: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}
