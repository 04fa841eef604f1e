use std::net::SocketAddr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("invalid target entry {entry:?}: {reason}")]
    Target { entry: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: std::io::Error },

    #[error("upstream {target}: {reason}")]
    Upstream { target: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URI error: {0}")]
    Uri(String),
}
