//! Listen prefix parsing.
//!
//! A prefix has the shape `scheme://host[:port]/path/`. The host may be `*` or
//! `+` to listen on every interface. The trailing `/` is mandatory.
use std::{
    fmt,
    net::{SocketAddr, ToSocketAddrs},
    str::FromStr,
};

use thiserror::Error;
use url::{Host, Url};

/// Prefix used when none is configured
pub const DEFAULT_LISTENER_PREFIX: &str = "http://localhost:1234/";

/// Errors produced while parsing a listen prefix
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PrefixError {
    #[error("Invalid listener prefix '{prefix}': must end in '/'")]
    MissingTrailingSlash { prefix: String },

    #[error("Invalid listener prefix '{prefix}': scheme must be http or https")]
    UnsupportedScheme { prefix: String },

    #[error("Invalid listener prefix '{prefix}': {reason}")]
    Malformed { prefix: String, reason: String },
}

/// A validated listen prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerPrefix {
    raw: String,
    secure: bool,
    host: String,
    wildcard: bool,
    port: u16,
    path: String,
}

impl ListenerPrefix {
    pub fn parse(prefix: &str) -> Result<Self, PrefixError> {
        let raw = prefix.trim();
        if !raw.ends_with('/') {
            return Err(PrefixError::MissingTrailingSlash {
                prefix: raw.to_string(),
            });
        }

        let (scheme, rest) = raw.split_once("://").ok_or_else(|| PrefixError::Malformed {
            prefix: raw.to_string(),
            reason: "missing scheme separator '://'".to_string(),
        })?;
        let secure = match scheme.to_ascii_lowercase().as_str() {
            "http" => false,
            "https" => true,
            _ => {
                return Err(PrefixError::UnsupportedScheme {
                    prefix: raw.to_string(),
                });
            }
        };

        // `*` and `+` are not valid URL hosts, swap them for the unspecified address
        let authority_end = rest.find('/').unwrap_or(rest.len());
        let (authority, tail) = rest.split_at(authority_end);
        let host_part = if authority.starts_with('[') {
            authority
        } else {
            authority.split(':').next().unwrap_or(authority)
        };
        let wildcard = matches!(host_part, "*" | "+");
        let normalized = if wildcard {
            let port_part = &authority[host_part.len()..];
            format!("{scheme}://0.0.0.0{port_part}{tail}")
        } else {
            raw.to_string()
        };

        let url = Url::parse(&normalized).map_err(|e| PrefixError::Malformed {
            prefix: raw.to_string(),
            reason: e.to_string(),
        })?;

        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => {
                return Err(PrefixError::Malformed {
                    prefix: raw.to_string(),
                    reason: "missing host".to_string(),
                });
            }
        };
        let port = url
            .port_or_known_default()
            .unwrap_or(if secure { 443 } else { 80 });

        Ok(Self {
            raw: raw.to_string(),
            secure,
            host,
            wildcard,
            port,
            path: url.path().to_string(),
        })
    }

    /// The prefix exactly as configured
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Host to bind, `0.0.0.0` for wildcard prefixes
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Path component, always ending in `/`
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether a request path falls under this prefix
    pub fn covers(&self, request_path: &str) -> bool {
        if self.path == "/" {
            return true;
        }
        request_path.starts_with(&self.path)
            || request_path == self.path.trim_end_matches('/')
    }

    /// Resolve the bind host into socket addresses
    pub fn socket_addrs(&self) -> std::io::Result<Vec<SocketAddr>> {
        Ok((self.host.as_str(), self.port).to_socket_addrs()?.collect())
    }
}

impl Default for ListenerPrefix {
    fn default() -> Self {
        Self {
            raw: DEFAULT_LISTENER_PREFIX.to_string(),
            secure: false,
            host: "localhost".to_string(),
            wildcard: false,
            port: 1234,
            path: "/".to_string(),
        }
    }
}

impl FromStr for ListenerPrefix {
    type Err = PrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for ListenerPrefix {
    type Error = PrefixError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<String> for ListenerPrefix {
    type Error = PrefixError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl fmt::Display for ListenerPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
