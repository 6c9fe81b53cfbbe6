//! A method and path route table served as a request handler.
//!
//! Routes are matched with [`matchit`] against the request path in lower case, with a
//! trailing slash removed, so `/Status/` and `/status` reach the same route. Patterns
//! capture named segments with `{name}`, exposed through [`RouteContext::param`].
//!
//! Requests with content are handled in two steps: the content is received first (up to
//! a configurable limit) and the route runs once it is complete, seeing it through
//! [`RouteContext::content`].
//!
//! # Example
//!
//! ```
//! use slim_web::RouteModule;
//!
//! let routes = RouteModule::builder()
//!     .get("/status", |request, _| {
//!         request.response_mut().return_ok_text("up");
//!         Ok(())
//!     })
//!     .post("/users/{id}", |request, route| {
//!         let form = request.read_form(route.content())?;
//!         let id = route.param("id").unwrap_or_default();
//!         request.response_mut().return_ok_text(format!("{id}: {} fields", form.len()));
//!         Ok(())
//!     })
//!     .build()
//!     .unwrap();
//! assert_eq!(routes.len(), 2);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use http::Method;
use slim_http::handler::{Flow, Handler, HandlerError};
use slim_http::protocol::HttpRequest;
use thiserror::Error;
use tracing::{error, warn};

use crate::context::{PathParams, RouteContext};

/// Content larger than this is refused with 413 unless configured otherwise.
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 16 * 1024;

type RouteFn = Box<dyn Fn(&mut HttpRequest, &RouteContext<'_, '_>) -> Result<(), HandlerError>>;

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("invalid route {path:?}: {source}")]
    Insert {
        path: String,
        #[source]
        source: matchit::InsertError,
    },

    #[error("route {method} {path:?} is defined twice")]
    Duplicate { method: Method, path: String },
}

struct Route {
    method: Method,
    handler: RouteFn,
}

pub struct RouteModule {
    router: matchit::Router<Vec<Route>>,
    routes: usize,
    max_content_length: usize,
}

impl RouteModule {
    pub fn builder() -> RouteModuleBuilder {
        RouteModuleBuilder::new()
    }

    /// Number of method and path pairs.
    #[inline]
    pub fn len(&self) -> usize {
        self.routes
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.routes == 0
    }

    #[inline]
    pub fn max_content_length(&self) -> usize {
        self.max_content_length
    }

    /// Runs the route for `method` and `path`, if there is one.
    ///
    /// Returns false when no route matches.
    fn dispatch(&self, request: &mut HttpRequest, content: &[u8]) -> bool {
        let path = normalize(request.path());
        let Ok(matched) = self.router.at(&path) else {
            return false;
        };
        let Some(route) = matched.value.iter().find(|route| route.method == *request.method()) else {
            return false;
        };

        let context = RouteContext::new(PathParams::from(matched.params), content);
        match (route.handler)(request, &context) {
            Ok(()) if !request.response().headers_sent() => {
                warn!(method = %route.method, path = %path, "route sent no response");
                request.response_mut().return_not_implemented();
            }
            Ok(()) => {}
            Err(e) => {
                error!(method = %route.method, path = %path, cause = %e, "route failed");
                if !request.response().headers_sent() {
                    request.response_mut().return_internal_server_error();
                }
            }
        }
        true
    }

    fn resolves(&self, method: &Method, path: &str) -> bool {
        self.router
            .at(&normalize(path))
            .is_ok_and(|matched| matched.value.iter().any(|route| route.method == *method))
    }
}

impl Handler for RouteModule {
    fn on_request(&self, request: &mut HttpRequest) -> Result<Flow, HandlerError> {
        if request.is_upgrade() || !self.resolves(request.method(), request.path()) {
            return Ok(Flow::Next);
        }

        let length = request.content_length();
        if length == 0 {
            self.dispatch(request, &[]);
        } else if matches!(*request.method(), Method::GET | Method::HEAD) {
            request.response_mut().return_bad_request();
        } else if length > self.max_content_length {
            warn!(length, max = self.max_content_length, path = request.path(), "request content too large");
            request.response_mut().return_entity_too_large();
        } else {
            request.receive_content(length);
            return Ok(Flow::Pending);
        }
        Ok(Flow::Next)
    }

    fn on_content(&self, request: &mut HttpRequest, content: &[u8]) -> Result<Flow, HandlerError> {
        if !self.dispatch(request, content) {
            request.response_mut().return_not_found();
        }
        Ok(Flow::Next)
    }
}

impl fmt::Debug for RouteModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteModule")
            .field("routes", &self.routes)
            .field("max_content_length", &self.max_content_length)
            .finish_non_exhaustive()
    }
}

pub struct RouteModuleBuilder {
    routes: BTreeMap<String, Vec<Route>>,
    max_content_length: usize,
}

impl RouteModuleBuilder {
    fn new() -> Self {
        Self { routes: BTreeMap::new(), max_content_length: DEFAULT_MAX_CONTENT_LENGTH }
    }

    #[must_use]
    pub fn route<F>(mut self, method: Method, path: &str, handler: F) -> Self
    where
        F: Fn(&mut HttpRequest, &RouteContext<'_, '_>) -> Result<(), HandlerError> + 'static,
    {
        self.routes.entry(normalize(path)).or_default().push(Route { method, handler: Box::new(handler) });
        self
    }

    #[must_use]
    pub fn max_content_length(mut self, max: usize) -> Self {
        self.max_content_length = max;
        self
    }

    pub fn build(self) -> Result<RouteModule, RouteError> {
        let mut router = matchit::Router::new();
        let mut count = 0;
        for (path, routes) in self.routes {
            for (index, route) in routes.iter().enumerate() {
                if routes[..index].iter().any(|earlier| earlier.method == route.method) {
                    return Err(RouteError::Duplicate { method: route.method.clone(), path });
                }
            }
            count += routes.len();
            router.insert(path.as_str(), routes).map_err(|source| RouteError::Insert { path, source })?;
        }
        Ok(RouteModule { router, routes: count, max_content_length: self.max_content_length })
    }
}

macro_rules! method_route {
    ($name:ident, $method:ident) => {
        impl RouteModuleBuilder {
            #[must_use]
            pub fn $name<F>(self, path: &str, handler: F) -> Self
            where
                F: Fn(&mut HttpRequest, &RouteContext<'_, '_>) -> Result<(), HandlerError> + 'static,
            {
                self.route(Method::$method, path, handler)
            }
        }
    };
}

method_route!(get, GET);
method_route!(post, POST);
method_route!(put, PUT);
method_route!(delete, DELETE);
method_route!(patch, PATCH);

impl fmt::Debug for RouteModuleBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteModuleBuilder")
            .field("paths", &self.routes.keys().collect::<Vec<_>>())
            .field("max_content_length", &self.max_content_length)
            .finish()
    }
}

/// Lower-cases `path` and strips a trailing slash, keeping the root as `/`.
fn normalize(path: &str) -> String {
    let path = path.to_lowercase();
    match path.strip_suffix('/') {
        Some(stripped) if !stripped.is_empty() => stripped.to_owned(),
        _ => path,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::StatusCode;
    use slim_http::codec::RequestParser;
    use slim_http::config::HttpConfig;

    use super::*;

    fn routes() -> RouteModule {
        RouteModule::builder()
            .get("/status", |request, _| {
                request.response_mut().return_ok_text("up");
                Ok(())
            })
            .get("/users/{userId}", |request, route| {
                match route.param("userId") {
                    Some(id) => request.response_mut().return_ok_text(id.to_owned()),
                    None => request.response_mut().return_bad_request(),
                }
                Ok(())
            })
            .post("/users", |request, route| {
                let form = request.read_form(route.content())?;
                request.response_mut().return_ok_text(form["name"].clone());
                Ok(())
            })
            .get("/silent", |_, _| Ok(()))
            .get("/broken", |_, _| Err("broken".into()))
            .max_content_length(64)
            .build()
            .unwrap()
    }

    fn request(method: Method, path: &str, headers: &[(&str, &str)]) -> HttpRequest {
        let mut request = HttpRequest::new("127.0.0.1:40000".parse().unwrap(), Arc::new(HttpConfig::default()));
        let mut parser = RequestParser::new(100);
        parser.feed(Some(&format!("{method} {path} HTTP/1.1")), request.head_mut()).unwrap();
        for (name, value) in headers {
            parser.feed(Some(&format!("{name}: {value}")), request.head_mut()).unwrap();
        }
        parser.feed(Some(""), request.head_mut()).unwrap();
        request
    }

    #[test]
    fn normalizes_paths() {
        assert_eq!(normalize("/Status/"), "/status");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("/a/b"), "/a/b");
    }

    #[test]
    fn answers_matching_route() {
        let routes = routes();
        let mut request = request(Method::GET, "/STATUS/", &[]);
        assert_eq!(routes.on_request(&mut request).unwrap(), Flow::Next);
        assert_eq!(request.response().status(), Some(StatusCode::OK));
    }

    #[test]
    fn captures_path_parameters() {
        let routes = routes();
        let mut request = request(Method::GET, "/Users/42", &[]);
        routes.on_request(&mut request).unwrap();
        assert_eq!(request.response().status(), Some(StatusCode::OK));
    }

    #[test]
    fn passes_on_unknown_routes_and_methods() {
        let routes = routes();
        let mut unknown = request(Method::GET, "/nowhere", &[]);
        assert_eq!(routes.on_request(&mut unknown).unwrap(), Flow::Next);
        assert!(!unknown.response().headers_sent());

        let mut wrong_method = request(Method::DELETE, "/status", &[]);
        assert_eq!(routes.on_request(&mut wrong_method).unwrap(), Flow::Next);
        assert!(!wrong_method.response().headers_sent());
    }

    #[test]
    fn waits_for_content_then_routes() {
        let routes = routes();
        let mut request = request(Method::POST, "/users", &[("Content-Length", "9")]);
        assert_eq!(routes.on_request(&mut request).unwrap(), Flow::Pending);
        assert!(!request.response().headers_sent());

        assert_eq!(routes.on_content(&mut request, b"name=slim").unwrap(), Flow::Next);
        assert_eq!(request.response().status(), Some(StatusCode::OK));
    }

    #[test]
    fn rejects_content_over_limit_and_on_get() {
        let routes = routes();
        let mut large = request(Method::POST, "/users", &[("Content-Length", "65")]);
        routes.on_request(&mut large).unwrap();
        assert_eq!(large.response().status(), Some(StatusCode::PAYLOAD_TOO_LARGE));

        let mut get_with_body = request(Method::GET, "/status", &[("Content-Length", "3")]);
        routes.on_request(&mut get_with_body).unwrap();
        assert_eq!(get_with_body.response().status(), Some(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn silent_and_failing_routes_still_answer() {
        let routes = routes();
        let mut silent = request(Method::GET, "/silent", &[]);
        routes.on_request(&mut silent).unwrap();
        assert_eq!(silent.response().status(), Some(StatusCode::NOT_IMPLEMENTED));

        let mut broken = request(Method::GET, "/broken", &[]);
        routes.on_request(&mut broken).unwrap();
        assert_eq!(broken.response().status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn upgrade_requests_are_left_alone() {
        let routes = routes();
        let mut request = request(Method::GET, "/status", &[("Connection", "Upgrade"), ("Upgrade", "websocket")]);
        assert_eq!(routes.on_request(&mut request).unwrap(), Flow::Next);
        assert!(!request.response().headers_sent());
    }

    #[test]
    fn duplicate_routes_are_rejected() {
        let error = RouteModule::builder().get("/a", |_, _| Ok(())).get("/A/", |_, _| Ok(())).build().unwrap_err();
        assert!(matches!(error, RouteError::Duplicate { .. }));
    }
}
