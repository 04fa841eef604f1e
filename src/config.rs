use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Runtime configuration, loadable from a JSON file or assembled from CLI
/// arguments. Targets can be given inline or as a path to a file with one
/// target URL per line; inline targets win when both are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub listen_addr: SocketAddr,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub targets_file: Option<PathBuf>,
    #[serde(default)]
    pub upstream_timeout_secs: Option<u64>,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
