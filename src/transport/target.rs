//! Connection target parsing.

use std::fmt;

use url::Url;

use crate::error::XenApiError;
use crate::Result;

/// URL scheme of a supported connection target.
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
}

/// Where the management API lives.
///
/// Parsed once when a session is constructed and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    scheme: Scheme,
    host: String,
    port: u16,
    path: String,
}

impl ConnectionTarget {
    /// Parse a connection URI.
    ///
    /// Accepted forms:
    /// - `http://server.name/path`
    /// - `https://server.name/path`
    ///
    /// `socket:///var/xapi/xapi` is recognised but fails with
    /// [`XenApiError::NotImplemented`]. Any other scheme fails with
    /// [`XenApiError::Configuration`].
    pub fn parse(uri: &str) -> Result<Self> {
        let url = Url::parse(uri)
            .map_err(|e| XenApiError::Configuration(format!("cannot parse {:?}: {}", uri, e)))?;

        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            "socket" => {
                return Err(XenApiError::NotImplemented(
                    "socket transport is not supported".into(),
                ))
            }
            other => {
                return Err(XenApiError::Configuration(format!(
                    "unknown scheme: {}",
                    other
                )))
            }
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| XenApiError::Configuration(format!("missing host in {:?}", uri)))?
            .to_string();

        let port = url
            .port_or_known_default()
            .ok_or_else(|| XenApiError::Configuration(format!("missing port in {:?}", uri)))?;

        let path = match url.path() {
            "" => "/".to_string(),
            p => p.to_string(),
        };

        Ok(Self {
            scheme,
            host,
            port,
            path,
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether calls to this target go over TLS.
    pub fn use_tls(&self) -> bool {
        self.scheme == Scheme::Https
    }

    /// Endpoint URL the transport posts to.
    pub fn endpoint(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // IPv6 literals come back from the url crate already bracketed.
        write!(
            f,
            "{}://{}:{}{}",
            self.scheme.as_str(),
            self.host,
            self.port,
            self.path
        )
    }
}

/// HTTP proxy used to reach the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpProxy {
    pub host: String,
    pub port: Option<u16>,
}

impl HttpProxy {
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Proxy URL in the form reqwest expects.
    pub fn url(&self) -> String {
        match self.port {
            Some(port) => format!("http://{}:{}", self.host, port),
            None => format!("http://{}", self.host),
        }
    }
}
