//! Peer address type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Network address of a remote peer ("ip:port").
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerAddr {
    pub ip: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    /// Parse an "ip:port" string. The port defaults to `default_port` when
    /// absent or unparsable.
    pub fn parse(addr: &str, default_port: u16) -> Self {
        match addr.rsplit_once(':') {
            Some((ip, port)) => Self {
                ip: ip.to_string(),
                port: port.parse().unwrap_or(default_port),
            },
            None => Self {
                ip: addr.to_string(),
                port: default_port,
            },
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}
