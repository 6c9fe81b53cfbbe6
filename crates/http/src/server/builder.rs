use std::fmt;
use std::net::ToSocketAddrs;
use std::time::Duration;

use crate::config::{ConfigError, HttpConfig, ServerConfig};
use crate::handler::{Handler, HandlerChain};
use crate::server::{Server, ServerError};

/// Assembles the configuration and the handler chain of a [`Server`].
///
/// Handlers are offered each request in the order they were added.
#[derive(Debug, Default)]
pub struct ServerBuilder {
    config: ServerConfig,
    handlers: HandlerChain,
    unresolved: Option<ConfigError>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration, typically one loaded with `serde`.
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the listen address to the first address `address` resolves to.
    #[must_use]
    pub fn address<A: ToSocketAddrs + fmt::Debug>(mut self, address: A) -> Self {
        match address.to_socket_addrs().ok().and_then(|mut addresses| addresses.next()) {
            Some(resolved) => {
                self.config.set_address(resolved);
                self.unresolved = None;
            }
            None => self.unresolved = Some(ConfigError::UnresolvedAddress { address: format!("{address:?}") }),
        }
        self
    }

    #[must_use]
    pub fn handler(mut self, handler: impl Handler + 'static) -> Self {
        self.handlers.push(handler);
        self
    }

    #[must_use]
    pub fn handlers(mut self, handlers: HandlerChain) -> Self {
        self.handlers = handlers;
        self
    }

    #[must_use]
    pub fn timeout(self, timeout: Duration) -> Self {
        self.map_http(|http| http.with_timeout(timeout))
    }

    #[must_use]
    pub fn allow_all_origins(self, allow: bool) -> Self {
        self.map_http(|http| http.with_allow_all_origins(allow))
    }

    /// Redirects every 404 to `url`.
    #[must_use]
    pub fn not_found_url(self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.map_http(|http| http.with_not_found_url(Some(url)))
    }

    #[must_use]
    pub fn server_name(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.map_http(|http| http.with_server_name(name))
    }

    #[must_use]
    pub fn max_header_lines(self, max: usize) -> Self {
        self.map_http(|http| http.with_max_header_lines(max))
    }

    /// Sets how many connections are served at once; each holds one pair of slots.
    #[must_use]
    pub fn slots(mut self, slots: usize) -> Self {
        self.config.set_slots(slots);
        self
    }

    #[must_use]
    pub fn slot_size(mut self, slot_size: usize) -> Self {
        self.config.set_slot_size(slot_size);
        self
    }

    #[must_use]
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.config.set_backlog(backlog);
        self
    }

    /// Validates the configuration and starts listening.
    pub fn build(self) -> Result<Server, ServerError> {
        if let Some(e) = self.unresolved {
            return Err(e.into());
        }
        Server::bind(self.config, self.handlers)
    }

    fn map_http(mut self, f: impl FnOnce(HttpConfig) -> HttpConfig) -> Self {
        let http = std::mem::take(self.config.http_mut());
        *self.config.http_mut() = f(http);
        self
    }
}
