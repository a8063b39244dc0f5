//! Node: identity of a peer in the overlay.
//!
//! A node is an immutable `(host, port)` pair. It is the sole key for link
//! membership and is what travels on the wire whenever a peer is named.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Invalid node address format: expected host:port")]
    InvalidFormat,
    #[error("Invalid port: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),
}

/// Identity of an overlay peer.
///
/// Value-equal and hashable. Displays as `host:port`; IPv6 hosts are
/// bracketed (`[::1]:5678`) so the display form parses back.
///
/// # Examples
/// ```
/// use swaplink_core::Node;
///
/// let node: Node = "127.0.0.1:5678".parse().unwrap();
/// assert_eq!(node.host(), "127.0.0.1");
/// assert_eq!(node.port(), 5678);
/// assert_eq!(node.to_string(), "127.0.0.1:5678");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Node {
    host: String,
    port: u16,
}

impl Node {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the host is a wildcard address (`0.0.0.0`, `::`). Such a node
    /// can be bound but not reached by other peers.
    pub fn is_unspecified(&self) -> bool {
        self.host
            .parse::<std::net::IpAddr>()
            .is_ok_and(|ip| ip.is_unspecified())
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Node {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.rsplit_once(':').ok_or(NodeError::InvalidFormat)?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(NodeError::InvalidFormat);
        }
        let port = port.parse::<u16>()?;
        Ok(Self::new(host, port))
    }
}

impl From<(String, u16)> for Node {
    fn from((host, port): (String, u16)) -> Self {
        Self { host, port }
    }
}

impl From<(&str, u16)> for Node {
    fn from((host, port): (&str, u16)) -> Self {
        Self::new(host, port)
    }
}

impl From<std::net::SocketAddr> for Node {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

/// Direction of a link, as seen from the peer that stores it.
///
/// Travels on the wire as a small integer (`In = 1`, `Out = 2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum LinkType {
    /// A remote peer has designated us as its out-link target.
    In = 1,
    /// We chose the remote peer as a link target.
    Out = 2,
}

impl From<LinkType> for u8 {
    fn from(link_type: LinkType) -> u8 {
        link_type as u8
    }
}

impl TryFrom<u8> for LinkType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::In),
            2 => Ok(Self::Out),
            other => Err(format!("unknown link type: {other}")),
        }
    }
}

impl Display for LinkType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::In => f.write_str("in"),
            Self::Out => f.write_str("out"),
        }
    }
}
