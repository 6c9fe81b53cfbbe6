use http::Method;
use slim_http::handler::{Flow, Handler, HandlerError};
use slim_http::protocol::HttpRequest;

/// Answers `OPTIONS` requests with `200 OK`.
///
/// With [`allow_all`](Self::allow_all) the answer also carries permissive CORS preflight
/// headers, so browsers let any origin call the other handlers.
#[derive(Debug, Default, Clone, Copy)]
pub struct OptionsModule {
    cors_allow_all: bool,
}

impl OptionsModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_all() -> Self {
        Self { cors_allow_all: true }
    }
}

impl Handler for OptionsModule {
    fn on_request(&self, request: &mut HttpRequest) -> Result<Flow, HandlerError> {
        if request.is_upgrade() || *request.method() != Method::OPTIONS {
            return Ok(Flow::Next);
        }

        let response = request.response_mut();
        if self.cors_allow_all {
            response.set_header("Access-Control-Allow-Methods", "*")?;
            response.set_header("Access-Control-Allow-Headers", "*")?;
            response.set_header("Access-Control-Allow-Credentials", "true")?;
            response.set_header("Access-Control-Max-Age", "86400")?;
        }
        response.return_ok();
        Ok(Flow::Next)
    }
}
