//! The overlay peer: lifecycle, neighbour queries and sampling.

use crate::config::SwaplinkConfig;
use crate::contacts::ContactsQueue;
use crate::error::{Result, SwaplinkError};
use crate::links::{LinkStore, NeighboursReceiver, NeighboursSender};
use crate::maintenance::Maintenance;
use crate::node::{LinkType, Node};
use crate::protocol::SwaplinkProtocol;
use crate::random::random_choice;
use crate::transport::{Transport, TransportBinder};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Where a peer is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Unjoined,
    Joining,
    Live,
    Left,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unjoined => write!(f, "unjoined"),
            Self::Joining => write!(f, "joining"),
            Self::Live => write!(f, "live"),
            Self::Left => write!(f, "left"),
        }
    }
}

/// One member of a Swaplink overlay.
///
/// Holds (about) `num_links` out-links and `num_links` in-links to other
/// members, keeps them repaired in the background, and draws near-uniform
/// random samples of the membership with [`select`](Self::select).
///
/// ```ignore
/// let network = MemoryNetwork::new();
/// let mut peer = Swaplink::new(SwaplinkConfig::with_address("mem", 1), network.binder(timeout));
/// peer.join(3, vec![bootstrap]).await?;
/// let sample = peer.select().await?;
/// peer.leave().await;
/// ```
pub struct Swaplink<B: TransportBinder> {
    config: SwaplinkConfig,
    binder: B,
    node: Node,
    link_store: Arc<LinkStore>,
    contacts: Arc<ContactsQueue>,
    state: PeerState,
    num_links: usize,
    protocol: Option<Arc<SwaplinkProtocol<B::Transport>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<B: TransportBinder> Swaplink<B> {
    pub fn new(config: SwaplinkConfig, binder: B) -> Self {
        let node = config.node();
        let contacts = Arc::new(ContactsQueue::new(config.contacts_capacity));
        Self {
            config,
            binder,
            node,
            link_store: Arc::new(LinkStore::new()),
            contacts,
            state: PeerState::Unjoined,
            num_links: 0,
            protocol: None,
            tasks: Vec::new(),
        }
    }

    // ==================== Lifecycle ====================

    /// Bind the transport, acquire out-links through `bootstrap` and start
    /// the repair loops.
    ///
    /// An empty bootstrap list starts a new overlay; this peer then waits for
    /// others to link to it. Bootstrap failures are not fatal: the repair
    /// loops keep trying to fill the missing links.
    pub async fn join(&mut self, num_links: usize, bootstrap: Vec<Node>) -> Result<()> {
        match self.state {
            PeerState::Unjoined => {}
            PeerState::Left => return Err(SwaplinkError::Left),
            PeerState::Joining | PeerState::Live => return Err(SwaplinkError::AlreadyJoined),
        }
        if num_links == 0 {
            return Err(SwaplinkError::InvalidDegree);
        }
        self.config.validate()?;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let transport = self
            .binder
            .bind(&self.node, inbound_tx)
            .await
            .map_err(SwaplinkError::Bind)?;

        // Ephemeral ports only become known once bound
        self.node = transport.local_node();
        self.num_links = num_links;
        self.state = PeerState::Joining;

        let protocol = Arc::new(SwaplinkProtocol::new(
            num_links,
            Arc::clone(&self.link_store),
            Arc::clone(&self.contacts),
            transport,
            self.config.give_me_max_attempts,
        ));
        self.tasks
            .push(tokio::spawn(Arc::clone(&protocol).serve(inbound_rx)));
        self.protocol = Some(Arc::clone(&protocol));

        let maintenance = Arc::new(Maintenance::new(
            protocol,
            Arc::clone(&self.link_store),
            Arc::clone(&self.contacts),
            self.config.clone(),
            num_links,
        ));

        let pool: Vec<Node> = bootstrap
            .into_iter()
            .filter(|node| node != &self.node)
            .collect();
        if !pool.is_empty() {
            debug!("{} bootstrapping via {} peer(s)", self.node, pool.len());
            maintenance.bootstrap(pool).await;
        }

        self.tasks
            .push(tokio::spawn(Arc::clone(&maintenance).run_in_link_repair()));
        self.tasks
            .push(tokio::spawn(maintenance.run_out_link_repair()));

        self.state = PeerState::Live;
        info!(
            "{} joined with {} out-link(s), target degree {}",
            self.node,
            self.link_store.out_link_count(),
            num_links
        );
        Ok(())
    }

    /// Stop serving requests and stop the repair loops.
    ///
    /// Links are not announced away; neighbours notice through failed calls
    /// and expired heartbeats.
    pub async fn leave(&mut self) {
        if let Some(protocol) = self.protocol.take() {
            protocol.transport().close().await;
        }
        for task in self.tasks.drain(..) {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    debug!("{} task ended abnormally: {}", self.node, e);
                }
            }
        }
        if self.state != PeerState::Left {
            info!("{} left the overlay", self.node);
        }
        self.state = PeerState::Left;
    }

    // ==================== Queries ====================

    /// Current out-links.
    ///
    /// When `callback` is given it replaces the neighbour observer: every
    /// later out-link change delivers a fresh snapshot to it.
    pub fn list_neighbours(&self, callback: Option<NeighboursSender>) -> Vec<Node> {
        if let Some(callback) = callback {
            self.link_store.set_callback(callback);
        }
        self.link_store.get_out_links_copy()
    }

    /// Channel receiving an out-link snapshot after every out-link change.
    ///
    /// Replaces any observer installed earlier.
    pub fn subscribe_neighbours(&self) -> NeighboursReceiver {
        self.link_store.subscribe()
    }

    /// Current in-links.
    pub fn in_links(&self) -> Vec<Node> {
        self.link_store.get_in_links_copy()
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    /// This peer's identity. After [`join`](Self::join) it reflects the
    /// address actually bound.
    pub fn node(&self) -> &Node {
        &self.node
    }

    // ==================== Sampling ====================

    /// Draw one random member of the overlay.
    ///
    /// Walks `walk_length` hops over in-links starting from a random in-link
    /// (or, with none, the most recent contact).
    pub async fn select(&self) -> Result<Node> {
        let protocol = match self.state {
            PeerState::Live | PeerState::Joining => {
                self.protocol.as_ref().ok_or(SwaplinkError::NotJoined)?
            }
            PeerState::Unjoined => return Err(SwaplinkError::NotJoined),
            PeerState::Left => return Err(SwaplinkError::Left),
        };

        let start = random_choice(&self.link_store.get_in_links_copy())
            .or_else(|| self.contacts.pop())
            .ok_or(SwaplinkError::EmptySample)?;
        let sample = protocol
            .call_random_walk(&start, 0, self.config.walk_length, LinkType::In, None)
            .await?;
        debug!("{} sampled {}", self.node, sample);
        Ok(sample)
    }
}

impl<B: TransportBinder> Drop for Swaplink<B> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::memory::{MemoryBinder, MemoryNetwork};
    use std::time::Duration;

    fn peer(network: &MemoryNetwork, port: u16) -> Swaplink<MemoryBinder> {
        let config = SwaplinkConfig::with_address("mem", port);
        let binder = network.binder(config.rpc_timeout);
        Swaplink::new(config, binder)
    }

    #[tokio::test]
    async fn test_new_peer_is_unjoined() {
        let network = MemoryNetwork::new();
        let a = peer(&network, 1);
        assert_eq!(a.state(), PeerState::Unjoined);
        assert!(a.list_neighbours(None).is_empty());
        assert!(matches!(a.select().await, Err(SwaplinkError::NotJoined)));
    }

    #[tokio::test]
    async fn test_join_zero_degree_rejected() {
        let network = MemoryNetwork::new();
        let mut a = peer(&network, 1);
        assert!(matches!(
            a.join(0, Vec::new()).await,
            Err(SwaplinkError::InvalidDegree)
        ));
        assert_eq!(a.state(), PeerState::Unjoined);
        assert!(!network.is_bound(&Node::new("mem", 1)));
    }

    #[tokio::test]
    async fn test_join_invalid_config_rejected() {
        let network = MemoryNetwork::new();
        let config = SwaplinkConfig {
            heartbeat_check_interval: Duration::ZERO,
            ..SwaplinkConfig::with_address("mem", 1)
        };
        let mut a = Swaplink::new(config, network.binder(Duration::from_secs(1)));

        assert!(matches!(
            a.join(1, Vec::new()).await,
            Err(SwaplinkError::Config(ConfigError::HeartbeatTooSlow { .. }))
        ));
        assert_eq!(a.state(), PeerState::Unjoined);
        assert!(!network.is_bound(&Node::new("mem", 1)));
    }

    #[tokio::test]
    async fn test_join_twice_rejected() {
        let network = MemoryNetwork::new();
        let mut a = peer(&network, 1);
        a.join(2, Vec::new()).await.unwrap();
        assert_eq!(a.state(), PeerState::Live);
        assert!(matches!(
            a.join(2, Vec::new()).await,
            Err(SwaplinkError::AlreadyJoined)
        ));
        a.leave().await;
    }

    #[tokio::test]
    async fn test_bind_conflict_leaves_peer_unjoined() {
        let network = MemoryNetwork::new();
        let mut a = peer(&network, 1);
        let mut clash = peer(&network, 1);
        a.join(1, Vec::new()).await.unwrap();

        assert!(matches!(
            clash.join(1, Vec::new()).await,
            Err(SwaplinkError::Bind(_))
        ));
        assert_eq!(clash.state(), PeerState::Unjoined);
        a.leave().await;
    }

    #[tokio::test]
    async fn test_select_alone_is_empty_sample() {
        let network = MemoryNetwork::new();
        let mut a = peer(&network, 1);
        a.join(1, Vec::new()).await.unwrap();

        assert!(matches!(a.select().await, Err(SwaplinkError::EmptySample)));
        a.leave().await;
    }

    #[tokio::test]
    async fn test_join_after_leave_rejected() {
        let network = MemoryNetwork::new();
        let mut a = peer(&network, 1);
        a.join(1, Vec::new()).await.unwrap();
        a.leave().await;

        assert_eq!(a.state(), PeerState::Left);
        assert!(!network.is_bound(&Node::new("mem", 1)));
        assert!(matches!(a.join(1, Vec::new()).await, Err(SwaplinkError::Left)));
        assert!(matches!(a.select().await, Err(SwaplinkError::Left)));
    }

    #[tokio::test]
    async fn test_bootstrap_list_ignores_self() {
        let network = MemoryNetwork::new();
        let mut a = peer(&network, 1);
        a.join(1, vec![Node::new("mem", 1)]).await.unwrap();

        assert!(a.list_neighbours(None).is_empty());
        a.leave().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_stops_heartbeats() {
        let network = MemoryNetwork::new();
        let mut a = peer(&network, 1);
        let mut b = peer(&network, 2);
        a.join(1, Vec::new()).await.unwrap();
        b.join(1, vec![a.node().clone()]).await.unwrap();
        assert_eq!(a.in_links(), vec![b.node().clone()]);

        b.leave().await;
        // Past the in-link expiry age plus one check round
        tokio::time::sleep(Duration::from_secs(13)).await;

        assert!(a.in_links().is_empty());
        a.leave().await;
    }
}
