//! UDP wire format.
//!
//! Every datagram carries one bincode-encoded [`Datagram`]. Requests name
//! their sender explicitly: replies go back to the source socket address,
//! but the overlay identity of a peer is the node it advertises.

use bincode::Options;
use serde::{Deserialize, Serialize};
use swaplink_core::transport::{Result, TransportError};
use swaplink_core::{Node, Request, Response};

/// Largest datagram we send or accept (64 KiB).
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// One request or response on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datagram {
    /// Correlates a response with its request; chosen by the requester
    pub id: u64,
    pub body: DatagramBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatagramBody {
    Request { sender: Node, request: Request },
    Response(Response),
}

impl Datagram {
    pub fn request(id: u64, sender: Node, request: Request) -> Self {
        Self {
            id,
            body: DatagramBody::Request { sender, request },
        }
    }

    pub fn response(id: u64, response: Response) -> Self {
        Self {
            id,
            body: DatagramBody::Response(response),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes = bincode::serialize(self).map_err(|e| TransportError::Encode(e.to_string()))?;
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::Encode(format!(
                "datagram of {} bytes exceeds {} byte limit",
                bytes.len(),
                MAX_DATAGRAM_SIZE
            )));
        }
        Ok(bytes)
    }

    /// Decode a received datagram.
    ///
    /// Length prefixes inside the payload are bounded by the datagram limit,
    /// so a hostile packet cannot trigger a large allocation.
    pub fn decode(data: &[u8]) -> Result<Self> {
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .allow_trailing_bytes()
            .with_limit(MAX_DATAGRAM_SIZE as u64)
            .deserialize(data)
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}
