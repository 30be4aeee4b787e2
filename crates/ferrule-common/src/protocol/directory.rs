use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a logical service: `(group, service name, version)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Directory {
    pub group: String,
    pub service: String,
    pub version: String,
}

impl Directory {
    pub fn new(group: impl Into<String>, service: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            service: service.into(),
            version: version.into(),
        }
    }

    /// Shorthand for the `Default` group at version `1.0.0`.
    pub fn of(service: impl Into<String>) -> Self {
        Self::new("Default", service, "1.0.0")
    }
}

impl fmt::Display for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.group, self.service, self.version)
    }
}

/// Network address of a provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<std::net::SocketAddr> for Address {
    fn from(addr: std::net::SocketAddr) -> Self {
        Address::new(addr.ip().to_string(), addr.port())
    }
}
