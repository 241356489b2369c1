//! Listen address parsing

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Where the server accepts connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix domain socket at the given path
    Unix(PathBuf),
    /// TCP `host:port`
    Tcp(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("unsupported uri '{0}', expected unix:// or tcp://")]
    UnsupportedScheme(String),

    #[error("uri '{0}' has no address")]
    MissingAddress(String),

    #[error("tcp uri '{0}' must be host:port")]
    MissingPort(String),
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        if let Some(path) = uri.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(EndpointError::MissingAddress(uri.to_string()));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }

        if let Some(addr) = uri.strip_prefix("tcp://") {
            let addr = addr.trim_end_matches('/');
            if addr.is_empty() {
                return Err(EndpointError::MissingAddress(uri.to_string()));
            }
            match addr.rsplit_once(':') {
                Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
                _ => return Err(EndpointError::MissingPort(uri.to_string())),
            }
            return Ok(Endpoint::Tcp(addr.to_string()));
        }

        Err(EndpointError::UnsupportedScheme(uri.to_string()))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}
