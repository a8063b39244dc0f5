//! Transport traits for the request/response channel between peers.
//!
//! Implementations:
//! - `MemoryTransport` (this crate) - In-process hub for tests and simulation
//! - `UdpTransport` (in swaplink-daemon) - Datagram transport over tokio `UdpSocket`
//!
//! A transport owns framing, wire encoding and the per-call timeout. Inbound
//! requests are handed to the engine as [`InboundRequest`]s on an mpsc
//! channel; the engine answers through the enclosed oneshot.

use crate::message::{Request, Response};
use crate::node::Node;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Bind failed: {0}")]
    Bind(String),

    #[error("Request to {0} timed out")]
    Timeout(Node),

    #[error("Peer unreachable: {0}")]
    Unreachable(Node),

    #[error("Transport closed")]
    Closed,

    #[error("Encode failed: {0}")]
    Encode(String),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A request that arrived from a remote peer, awaiting its response.
#[derive(Debug)]
pub struct InboundRequest {
    /// Immediate sender of the request
    pub sender: Node,
    /// The request itself
    pub request: Request,
    /// Where to deliver the handler's response
    pub reply: oneshot::Sender<Response>,
}

/// Sending half used by transports to deliver inbound requests.
pub type InboundSender = mpsc::UnboundedSender<InboundRequest>;

/// Receiving half drained by the peer's dispatcher.
pub type InboundReceiver = mpsc::UnboundedReceiver<InboundRequest>;

/// A bound request/response channel.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Identity this transport is reachable at (after binding).
    fn local_node(&self) -> Node;

    /// Send a request and wait for its response, bounded by the transport's timeout.
    async fn send_request(&self, target: &Node, request: Request) -> Result<Response>;

    /// Stop accepting requests. Pending calls fail; later calls fail with `Closed`.
    async fn close(&self);
}

/// Factory that binds a [`Transport`] for a peer.
#[async_trait]
pub trait TransportBinder: Send + Sync {
    type Transport: Transport;

    /// Bind at `local`, delivering inbound requests on `inbound`.
    async fn bind(&self, local: &Node, inbound: InboundSender) -> Result<Self::Transport>;
}
