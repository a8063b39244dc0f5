//! Error types for the protocol engine and the overlay peer.

use crate::config::ConfigError;
use crate::node::Node;
use crate::transport::TransportError;
use thiserror::Error;

/// RPC failure: timeout, rejection or a malformed answer.
///
/// Whoever observes it has already evicted `target` from both link directions.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("{procedure} to {target} failed: {source}")]
    Failed {
        procedure: &'static str,
        target: Node,
        #[source]
        source: TransportError,
    },

    #[error("{procedure} to {target} returned an unexpected response")]
    UnexpectedResponse {
        procedure: &'static str,
        target: Node,
    },
}

impl RpcError {
    /// Peer the failed call was addressed to.
    pub fn target(&self) -> &Node {
        match self {
            Self::Failed { target, .. } | Self::UnexpectedResponse { target, .. } => target,
        }
    }
}

/// Errors surfaced by [`crate::Swaplink`].
#[derive(Debug, Error)]
pub enum SwaplinkError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("No candidate peer to sample from")]
    EmptySample,

    #[error("Transport bind failed: {0}")]
    Bind(#[source] TransportError),

    #[error("Peer has not joined the overlay")]
    NotJoined,

    #[error("Peer has already joined the overlay")]
    AlreadyJoined,

    #[error("Peer has left the overlay")]
    Left,

    #[error("Target degree must be positive")]
    InvalidDegree,

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, SwaplinkError>;
