//! TCP connection to the debug server.
//!
//! # Example
//!
//! ```ignore
//! use spanwire_client::transport::{connect, Endpoint};
//!
//! let endpoint: Endpoint = "localhost".parse()?;
//! let stream = connect(&endpoint).await?;
//! ```

use std::fmt;
use std::str::FromStr;

use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Result, SpanwireError};
use crate::protocol::DEFAULT_PORT;

/// Host and port of a debug server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new("127.0.0.1", DEFAULT_PORT)
    }
}

/// Accepts `host`, `host:port`, `[v6]` and `[v6]:port`. A missing port
/// means [`DEFAULT_PORT`].
impl FromStr for Endpoint {
    type Err = SpanwireError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || SpanwireError::InvalidAddress(s.to_string());
        let s = s.trim();
        if s.is_empty() {
            return Err(invalid());
        }

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            match tail {
                "" => (host, None),
                _ => (host, Some(tail.strip_prefix(':').ok_or_else(invalid)?)),
            }
        } else {
            match s.rsplit_once(':') {
                // More than one colon without brackets: a bare IPv6 address.
                Some((host, _)) if host.contains(':') => (s, None),
                Some((host, port)) => (host, Some(port)),
                None => (s, None),
            }
        };

        if host.is_empty() {
            return Err(invalid());
        }
        let port = match port {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => DEFAULT_PORT,
        };
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Open a TCP connection with Nagle disabled.
pub async fn connect(endpoint: &Endpoint) -> Result<TcpStream> {
    let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
    stream.set_nodelay(true)?;
    debug!(%endpoint, "connected");
    Ok(stream)
}
