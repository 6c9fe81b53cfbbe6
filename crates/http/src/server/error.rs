use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("cannot listen on {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("event loop failure: {0}")]
    Io(#[from] io::Error),
}
