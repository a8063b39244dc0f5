//! Link store for tracking a peer's in-links and out-links.
//!
//! Two directed collections keyed by [`Node`], each entry carrying the time of
//! its last heartbeat. Entries are added on successful announcement or
//! acquisition and removed on RPC failure, heartbeat expiry or explicit
//! severing. Nothing here is persisted.
//!
//! Every operation takes the lock for its own duration only, so callers can
//! share one store between the inbound dispatcher and the repair loops
//! without holding a guard across a network wait.

use crate::node::Node;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Channel on which out-link snapshots are delivered after each mutation.
pub type NeighboursSender = mpsc::UnboundedSender<Vec<Node>>;

/// Receiving half of a [`NeighboursSender`].
pub type NeighboursReceiver = mpsc::UnboundedReceiver<Vec<Node>>;

/// In-links and out-links of one peer, with heartbeat timestamps.
///
/// Thread-safe for use in multi-threaded Tokio runtime.
/// Wrap in `Arc` for shared ownership.
pub struct LinkStore {
    in_links: RwLock<HashMap<Node, Instant>>,
    out_links: RwLock<HashMap<Node, Instant>>,
    /// Single observer of out-link changes (replaced by `set_callback`)
    observer: RwLock<Option<NeighboursSender>>,
}

impl Default for LinkStore {
    fn default() -> Self {
        Self {
            in_links: RwLock::new(HashMap::new()),
            out_links: RwLock::new(HashMap::new()),
            observer: RwLock::new(None),
        }
    }
}

impl LinkStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== In-links ====================

    /// Insert an in-link or refresh its heartbeat.
    pub fn add_in_link(&self, node: Node) {
        self.in_links
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(node, Instant::now());
    }

    /// Last heartbeat of an in-link, `None` if it is not present.
    pub fn get_in_link_heartbeat(&self, node: &Node) -> Option<Instant> {
        self.in_links
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(node)
            .copied()
    }

    /// Snapshot of the in-links, unaffected by later mutation.
    pub fn get_in_links_copy(&self) -> Vec<Node> {
        self.in_links
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn contains_in_link(&self, node: &Node) -> bool {
        self.in_links
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(node)
    }

    /// Remove an in-link. No-op if absent.
    pub fn remove_in_link(&self, node: &Node) {
        self.in_links
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(node);
    }

    pub fn in_link_count(&self) -> usize {
        self.in_links.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Remove every in-link whose last heartbeat is at least `max_age` old.
    ///
    /// The age check and removal happen under one lock, so a heartbeat that
    /// arrives concurrently is either seen (and kept) or lands afterwards.
    /// Returns the evicted nodes.
    pub fn expire_in_links(&self, max_age: std::time::Duration) -> Vec<Node> {
        let now = Instant::now();
        let mut in_links = self.in_links.write().unwrap_or_else(|e| e.into_inner());
        let expired: Vec<Node> = in_links
            .iter()
            .filter(|(_, heartbeat)| now.saturating_duration_since(**heartbeat) >= max_age)
            .map(|(node, _)| node.clone())
            .collect();
        for node in &expired {
            in_links.remove(node);
        }
        expired
    }

    // ==================== Out-links ====================

    /// Insert an out-link or refresh its heartbeat. Always notifies the observer.
    pub fn add_out_link(&self, node: Node) {
        let mut out_links = self.out_links.write().unwrap_or_else(|e| e.into_inner());
        out_links.insert(node, Instant::now());
        self.notify(&out_links);
    }

    /// Last heartbeat of an out-link, `None` if it is not present.
    pub fn get_out_link_heartbeat(&self, node: &Node) -> Option<Instant> {
        self.out_links
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(node)
            .copied()
    }

    /// Snapshot of the out-links, unaffected by later mutation.
    pub fn get_out_links_copy(&self) -> Vec<Node> {
        self.out_links
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn contains_out_link(&self, node: &Node) -> bool {
        self.out_links
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(node)
    }

    /// Remove an out-link. No-op (and no notification) if absent.
    pub fn remove_out_link(&self, node: &Node) {
        let mut out_links = self.out_links.write().unwrap_or_else(|e| e.into_inner());
        if out_links.remove(node).is_some() {
            self.notify(&out_links);
        }
    }

    pub fn out_link_count(&self) -> usize {
        self.out_links.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Remove an out-link only if the pre-removal out-link count is at least
    /// `floor`. The count after removal may therefore be `floor - 1`; the
    /// caller is expected to add a replacement right after.
    ///
    /// Returns true if the link was removed.
    pub fn remove_out_link_above(&self, node: &Node, floor: usize) -> bool {
        let mut out_links = self.out_links.write().unwrap_or_else(|e| e.into_inner());
        if out_links.len() < floor || !out_links.contains_key(node) {
            return false;
        }
        out_links.remove(node);
        self.notify(&out_links);
        true
    }

    // ==================== Both directions ====================

    /// Sever every link to `node`, in both directions.
    pub fn remove_link(&self, node: &Node) {
        self.remove_in_link(node);
        self.remove_out_link(node);
    }

    /// Register the out-link observer, replacing any previous one.
    pub fn set_callback(&self, observer: NeighboursSender) {
        *self.observer.write().unwrap_or_else(|e| e.into_inner()) = Some(observer);
    }

    /// Create a fresh observer channel and register it.
    pub fn subscribe(&self) -> NeighboursReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.set_callback(tx);
        rx
    }

    /// Deliver a post-mutation snapshot. Called with the out-link lock held so
    /// snapshots arrive in mutation order.
    fn notify(&self, out_links: &HashMap<Node, Instant>) {
        let observer = self.observer.read().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = observer.as_ref() {
            // A dropped receiver just means nobody is listening any more.
            let _ = tx.send(out_links.keys().cloned().collect());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn node(port: u16) -> Node {
        Node::new("127.0.0.1", port)
    }

    // ==================== Snapshots ====================

    #[test]
    fn test_snapshot_isolation() {
        let store = LinkStore::new();
        store.add_out_link(node(1));
        store.add_in_link(node(2));

        let out_snapshot = store.get_out_links_copy();
        let in_snapshot = store.get_in_links_copy();

        store.add_out_link(node(3));
        store.remove_out_link(&node(1));
        store.remove_in_link(&node(2));

        assert_eq!(out_snapshot, vec![node(1)]);
        assert_eq!(in_snapshot, vec![node(2)]);
    }

    #[test]
    fn test_idempotent_removal() {
        let store = LinkStore::new();
        store.remove_in_link(&node(1));
        store.remove_out_link(&node(1));
        store.remove_link(&node(1));

        assert_eq!(store.in_link_count(), 0);
        assert_eq!(store.out_link_count(), 0);
    }

    #[test]
    fn test_no_mutual_exclusion_between_directions() {
        let store = LinkStore::new();
        store.add_in_link(node(1));
        store.add_out_link(node(1));

        assert!(store.contains_in_link(&node(1)));
        assert!(store.contains_out_link(&node(1)));

        store.remove_link(&node(1));
        assert!(!store.contains_in_link(&node(1)));
        assert!(!store.contains_out_link(&node(1)));
    }

    // ==================== Heartbeats ====================

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_refresh() {
        let store = LinkStore::new();
        store.add_in_link(node(1));
        let first = store.get_in_link_heartbeat(&node(1)).unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;
        store.add_in_link(node(1));
        let second = store.get_in_link_heartbeat(&node(1)).unwrap();

        assert_eq!(store.in_link_count(), 1);
        assert_eq!(second.duration_since(first), Duration::from_secs(3));
    }

    #[test]
    fn test_heartbeat_missing_node() {
        let store = LinkStore::new();
        assert!(store.get_in_link_heartbeat(&node(9)).is_none());
        assert!(store.get_out_link_heartbeat(&node(9)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_in_links() {
        let store = LinkStore::new();
        store.add_in_link(node(1));
        tokio::time::advance(Duration::from_secs(4)).await;
        store.add_in_link(node(2));
        tokio::time::advance(Duration::from_secs(2)).await;

        let expired = store.expire_in_links(Duration::from_secs(5));

        assert_eq!(expired, vec![node(1)]);
        assert!(store.contains_in_link(&node(2)));
        assert!(!store.contains_in_link(&node(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_boundary_is_inclusive() {
        let store = LinkStore::new();
        store.add_in_link(node(1));
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(store.expire_in_links(Duration::from_secs(5)), vec![node(1)]);
    }

    // ==================== Degree floor ====================

    #[test]
    fn test_remove_out_link_above_floor() {
        let store = LinkStore::new();
        store.add_out_link(node(1));
        store.add_out_link(node(2));

        // Below target: keep
        assert!(!store.remove_out_link_above(&node(1), 3));
        assert_eq!(store.out_link_count(), 2);

        // At target: remove
        assert!(store.remove_out_link_above(&node(1), 2));
        assert_eq!(store.get_out_links_copy(), vec![node(2)]);

        // Absent: nothing to do
        assert!(!store.remove_out_link_above(&node(7), 0));
    }

    // ==================== Observer ====================

    #[test]
    fn test_observer_receives_post_mutation_snapshot() {
        let store = LinkStore::new();
        let mut rx = store.subscribe();

        store.add_out_link(node(1));
        assert_eq!(rx.try_recv().unwrap(), vec![node(1)]);

        store.remove_out_link(&node(1));
        assert_eq!(rx.try_recv().unwrap(), Vec::<Node>::new());
    }

    #[test]
    fn test_observer_one_delivery_per_mutation() {
        let store = LinkStore::new();
        let mut rx = store.subscribe();

        store.add_out_link(node(1));
        store.add_out_link(node(1)); // refresh still counts
        store.remove_out_link(&node(5)); // absent: no delivery
        store.add_in_link(node(2)); // in-links are not observed

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_set_callback_replaces_observer() {
        let store = LinkStore::new();
        let mut first = store.subscribe();
        let mut second = store.subscribe();

        store.add_out_link(node(1));

        assert!(first.try_recv().is_err());
        assert_eq!(second.try_recv().unwrap(), vec![node(1)]);
    }

    #[test]
    fn test_dropped_observer_is_harmless() {
        let store = LinkStore::new();
        drop(store.subscribe());
        store.add_out_link(node(1));
        assert_eq!(store.out_link_count(), 1);
    }

    #[test]
    fn test_remove_link_notifies_once() {
        let store = LinkStore::new();
        store.add_out_link(node(1));
        store.add_in_link(node(1));
        let mut rx = store.subscribe();

        store.remove_link(&node(1));

        assert_eq!(rx.try_recv().unwrap(), Vec::<Node>::new());
        assert!(rx.try_recv().is_err());
    }
}
