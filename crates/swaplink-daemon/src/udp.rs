//! Datagram transport over a tokio `UdpSocket`.
//!
//! One socket per peer serves both directions. A receive task routes
//! incoming [`Datagram`]s: responses complete the pending call with the
//! same id, requests go to the protocol engine and their answers are sent
//! back to the source address.

use crate::datagram::{Datagram, DatagramBody, MAX_DATAGRAM_SIZE};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swaplink_core::transport::{
    InboundRequest, InboundSender, Result, Transport, TransportBinder, TransportError,
};
use swaplink_core::{Node, Request, Response};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Calls awaiting a response, by request id.
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

/// Binds [`UdpTransport`]s.
///
/// The identity a transport announces is its bind host with the port
/// actually bound. A wildcard bind host (`0.0.0.0`, `::`) is not routable,
/// so binding one requires an advertised host.
#[derive(Debug, Clone)]
pub struct UdpBinder {
    timeout: Duration,
    advertise_host: Option<String>,
}

impl UdpBinder {
    /// Binder whose transports time out calls after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            advertise_host: None,
        }
    }

    /// Announce `host` instead of the bind host.
    pub fn with_advertise_host(mut self, host: Option<String>) -> Self {
        self.advertise_host = host;
        self
    }

    fn advertised_host(&self, local: &Node) -> Result<String> {
        match &self.advertise_host {
            Some(host) => Ok(host.clone()),
            None if local.is_unspecified() => Err(TransportError::Bind(format!(
                "{local} is a wildcard address; set an advertised host other peers can reach"
            ))),
            None => Ok(local.host().to_string()),
        }
    }
}

#[async_trait]
impl TransportBinder for UdpBinder {
    type Transport = UdpTransport;

    async fn bind(&self, local: &Node, inbound: InboundSender) -> Result<UdpTransport> {
        let host = self.advertised_host(local)?;
        let socket = UdpSocket::bind(local.to_string())
            .await
            .map_err(|e| TransportError::Bind(format!("{local}: {e}")))?;
        let bound = socket.local_addr()?;
        // Port 0 binds an ephemeral port; announce the one we got
        let node = Node::new(host, bound.port());
        info!("UDP transport listening on {} as {}", bound, node);

        let socket = Arc::new(socket);
        let pending: PendingMap = Arc::default();
        let recv_task = tokio::spawn(recv_loop(
            node.clone(),
            Arc::clone(&socket),
            Arc::clone(&pending),
            inbound,
        ));

        Ok(UdpTransport {
            local: node,
            socket,
            pending,
            next_id: AtomicU64::new(1),
            timeout: self.timeout,
            closed: AtomicBool::new(false),
            recv_task: Mutex::new(Some(recv_task)),
        })
    }
}

/// One peer's UDP endpoint.
pub struct UdpTransport {
    local: Node,
    socket: Arc<UdpSocket>,
    pending: PendingMap,
    next_id: AtomicU64,
    timeout: Duration,
    closed: AtomicBool,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl UdpTransport {
    /// Socket address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn forget(&self, id: u64) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_node(&self) -> Node {
        self.local.clone()
    }

    async fn send_request(&self, target: &Node, request: Request) -> Result<Response> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        trace!("{} -> {}: {} (id {})", self.local, target, request.name(), id);
        let bytes = Datagram::request(id, self.local.clone(), request).encode()?;

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);

        if let Err(e) = self
            .socket
            .send_to(&bytes, target.to_string())
            .await
        {
            self.forget(id);
            debug!("Send to {} failed: {}", target, e);
            return Err(TransportError::Unreachable(target.clone()));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            // Pending calls are dropped on close
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.forget(id);
                Err(TransportError::Timeout(target.clone()))
            }
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let task = self
            .recv_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        debug!("UDP transport {} closed", self.local);
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        if let Some(task) = self
            .recv_task
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
    }
}

/// Receive loop: route every datagram until the transport is closed.
async fn recv_loop(
    local: Node,
    socket: Arc<UdpSocket>,
    pending: PendingMap,
    inbound: InboundSender,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                // ICMP errors from earlier sends surface here on some platforms
                debug!("{} receive error: {}", local, e);
                continue;
            }
        };

        let datagram = match Datagram::decode(&buf[..len]) {
            Ok(datagram) => datagram,
            Err(e) => {
                warn!("Dropping malformed datagram from {}: {}", from, e);
                continue;
            }
        };

        match datagram.body {
            DatagramBody::Response(response) => {
                let waiter = pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&datagram.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => trace!("Late response {} from {}", datagram.id, from),
                }
            }
            DatagramBody::Request { sender, request } => {
                let (reply, rx) = oneshot::channel();
                let inbound_request = InboundRequest {
                    sender,
                    request,
                    reply,
                };
                if inbound.send(inbound_request).is_err() {
                    debug!("{} no longer serving requests", local);
                    break;
                }
                tokio::spawn(send_reply(Arc::clone(&socket), from, datagram.id, rx));
            }
        }
    }
}

async fn send_reply(
    socket: Arc<UdpSocket>,
    to: SocketAddr,
    id: u64,
    rx: oneshot::Receiver<Response>,
) {
    // Dropped unanswered when the handler is cancelled
    let Ok(response) = rx.await else {
        return;
    };
    match Datagram::response(id, response).encode() {
        Ok(bytes) => {
            if let Err(e) = socket.send_to(&bytes, to).await {
                debug!("Reply {} to {} failed: {}", id, to, e);
            }
        }
        Err(e) => warn!("Reply {} to {} not encodable: {}", id, to, e),
    }
}
