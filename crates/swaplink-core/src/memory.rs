//! In-process transport for tests and simulation.
//!
//! A [`MemoryNetwork`] is a hub mapping node identities to their inbound
//! channels. Peers bound through a [`MemoryBinder`] reach each other without
//! sockets, which makes multi-peer scenarios cheap and lets tests run under
//! paused Tokio time.

use crate::message::{Request, Response};
use crate::node::Node;
use crate::transport::{
    InboundRequest, InboundSender, Result, Transport, TransportBinder, TransportError,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::trace;

#[derive(Default)]
struct NetworkState {
    peers: HashMap<Node, InboundSender>,
    /// Nodes that swallow every request (callers time out)
    silenced: HashSet<Node>,
}

/// Shared in-memory hub. Cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<RwLock<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binder whose transports time out calls after `timeout`.
    pub fn binder(&self, timeout: Duration) -> MemoryBinder {
        MemoryBinder {
            network: self.clone(),
            timeout,
        }
    }

    /// Make `node` stop answering. Requests to it time out.
    pub fn silence(&self, node: &Node) {
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .silenced
            .insert(node.clone());
    }

    /// Undo [`silence`](Self::silence).
    pub fn unsilence(&self, node: &Node) {
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .silenced
            .remove(node);
    }

    /// Whether a transport is currently bound at `node`.
    pub fn is_bound(&self, node: &Node) -> bool {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .peers
            .contains_key(node)
    }

    fn route(&self, target: &Node) -> Route {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        if state.silenced.contains(target) {
            return Route::Silenced;
        }
        match state.peers.get(target) {
            Some(tx) => Route::Deliver(tx.clone()),
            None => Route::Unknown,
        }
    }

    fn unbind(&self, node: &Node) {
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .peers
            .remove(node);
    }
}

enum Route {
    Deliver(InboundSender),
    Silenced,
    Unknown,
}

/// Binds [`MemoryTransport`]s on a [`MemoryNetwork`].
pub struct MemoryBinder {
    network: MemoryNetwork,
    timeout: Duration,
}

#[async_trait]
impl TransportBinder for MemoryBinder {
    type Transport = MemoryTransport;

    async fn bind(&self, local: &Node, inbound: InboundSender) -> Result<MemoryTransport> {
        let mut state = self
            .network
            .state
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if state.peers.contains_key(local) {
            return Err(TransportError::Bind(format!("{local} already in use")));
        }
        state.peers.insert(local.clone(), inbound);

        Ok(MemoryTransport {
            local: local.clone(),
            network: self.network.clone(),
            timeout: self.timeout,
            closed: AtomicBool::new(false),
        })
    }
}

/// One peer's endpoint on a [`MemoryNetwork`].
pub struct MemoryTransport {
    local: Node,
    network: MemoryNetwork,
    timeout: Duration,
    closed: AtomicBool,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_node(&self) -> Node {
        self.local.clone()
    }

    async fn send_request(&self, target: &Node, request: Request) -> Result<Response> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let tx = match self.network.route(target) {
            Route::Deliver(tx) => tx,
            Route::Silenced => {
                tokio::time::sleep(self.timeout).await;
                return Err(TransportError::Timeout(target.clone()));
            }
            Route::Unknown => return Err(TransportError::Unreachable(target.clone())),
        };

        trace!("{} -> {}: {}", self.local, target, request.name());
        let (reply, rx) = oneshot::channel();
        tx.send(InboundRequest {
            sender: self.local.clone(),
            request,
            reply,
        })
        .map_err(|_| TransportError::Unreachable(target.clone()))?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            // Handler dropped without answering (peer left mid-call)
            Ok(Err(_)) => Err(TransportError::Unreachable(target.clone())),
            Err(_) => Err(TransportError::Timeout(target.clone())),
        }
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.network.unbind(&self.local);
        }
    }
}
