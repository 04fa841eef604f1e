pub mod balance;
pub mod config;
pub mod error;
pub mod rewrite;
pub mod server;
pub mod target;

pub use balance::RoundRobin;
pub use config::Config;
pub use error::ProxyError;
pub use server::ProxyServer;
pub use target::{Scheme, Target, TargetList};
