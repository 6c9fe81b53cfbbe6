//! Request handler modules for the `slim-http` server.
//!
//! Each module is a [`Handler`](slim_http::handler::Handler) meant to be placed in a
//! server's handler chain:
//!
//! - [`OptionsModule`]: answers `OPTIONS`, optionally with permissive CORS headers
//! - [`RouteModule`]: a method and path route table, with request content delivery
//! - [`WebSocketModule`]: the WebSocket opening handshake and stream hand-off
//!
//! # Example
//!
//! ```no_run
//! use slim_http::server::Server;
//! use slim_web::{OptionsModule, RouteModule, WebSocketModule};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let routes = RouteModule::builder()
//!         .get("/", |request, _| {
//!             request.response_mut().return_ok_text("hello world");
//!             Ok(())
//!         })
//!         .build()?;
//!
//!     Server::builder()
//!         .address("127.0.0.1:3000")
//!         .handler(OptionsModule::allow_all())
//!         .handler(WebSocketModule::new(|upgraded| drop(upgraded.stream)))
//!         .handler(routes)
//!         .build()?
//!         .run()?;
//!     Ok(())
//! }
//! ```

mod context;
mod options;
pub mod route;
pub mod websocket;

pub use context::PathParams;
pub use context::RouteContext;
pub use options::OptionsModule;
pub use route::RouteError;
pub use route::RouteModule;
pub use route::RouteModuleBuilder;
pub use websocket::WebSocketModule;
