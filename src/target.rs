use std::borrow::Cow;
use std::fmt;

use url::Url;

use crate::error::ProxyError;
use crate::rewrite::{encode_path, split_escaped};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    /// Whether forwarding to this target requires TLS.
    pub fn is_tls(&self) -> bool {
        matches!(self, Scheme::Https)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One upstream endpoint requests can be forwarded to.
///
/// `path` is the decoded form; `raw_path` is the escaped form and is empty
/// whenever escaping `path` reproduces it, so the rewriter can tell when a
/// target carries percent-encoded octets that must survive path merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: Scheme,
    pub host: String,
    pub path: String,
    pub raw_path: String,
}

impl Target {
    pub fn parse(entry: &str) -> Result<Self, ProxyError> {
        let url = Url::parse(entry).map_err(|e| ProxyError::Target {
            entry: entry.to_string(),
            reason: e.to_string(),
        })?;

        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(ProxyError::Target {
                    entry: entry.to_string(),
                    reason: format!("unsupported scheme {:?}", other),
                });
            }
        };

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => match url.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            },
            _ => {
                return Err(ProxyError::Target {
                    entry: entry.to_string(),
                    reason: "missing host".to_string(),
                });
            }
        };

        let (path, raw_path) = split_escaped(url.path());

        Ok(Self {
            scheme,
            host,
            path,
            raw_path,
        })
    }

    pub fn escaped_path(&self) -> Cow<'_, str> {
        if self.raw_path.is_empty() {
            encode_path(&self.path)
        } else {
            Cow::Borrowed(&self.raw_path)
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.host, self.escaped_path())
    }
}

/// Ordered list of upstream targets. The order is fixed at load time; the
/// round-robin sequence depends on it.
#[derive(Debug, Clone)]
pub struct TargetList {
    targets: Vec<Target>,
}

impl TargetList {
    /// Parses every entry, failing the whole load on the first bad one.
    pub fn load<'a, I>(entries: I) -> Result<Self, ProxyError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut targets = Vec::new();
        for entry in entries {
            targets.push(Target::parse(entry)?);
        }
        if targets.is_empty() {
            return Err(ProxyError::Config("empty target list".to_string()));
        }
        Ok(Self { targets })
    }

    /// Loads a newline-delimited text blob, e.g. the contents of a target
    /// list file. Surrounding newlines are trimmed before splitting.
    pub fn from_lines(blob: &str) -> Result<Self, ProxyError> {
        let trimmed = blob.trim_matches('\n');
        if trimmed.is_empty() {
            return Err(ProxyError::Config("empty target list".to_string()));
        }
        Self::load(trimmed.split('\n'))
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Target> {
        self.targets.iter()
    }
}

impl std::ops::Index<usize> for TargetList {
    type Output = Target;

    fn index(&self, index: usize) -> &Target {
        &self.targets[index]
    }
}
