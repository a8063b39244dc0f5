//! Bootstrap acquisition and the two repair loops.
//!
//! **In-link repair** (every heartbeat-check interval):
//! 1. Evict in-links whose last heartbeat is at least one interval old
//! 2. For each missing in-link, walk the out-link graph from a random
//!    out-link and ask the peer found there for an in-link
//!
//! **Out-link repair** (every heartbeat-send interval):
//! 1. Heartbeat every out-link; a failed heartbeat evicts it
//! 2. For each missing out-link, walk the in-link graph from a random
//!    in-link, announce ourselves to the peer found there and adopt it
//! 3. Drop surplus out-links left over from concurrent retargeting
//!
//! Every attempt is best-effort: failures are logged and the loop moves on,
//! so one unreachable peer never stalls convergence for the others.

use crate::config::SwaplinkConfig;
use crate::contacts::ContactsQueue;
use crate::error::{Result, SwaplinkError};
use crate::links::LinkStore;
use crate::node::{LinkType, Node};
use crate::protocol::SwaplinkProtocol;
use crate::random::random_choice;
use crate::transport::Transport;
use std::sync::Arc;
use tracing::debug;

pub(crate) struct Maintenance<T: Transport> {
    protocol: Arc<SwaplinkProtocol<T>>,
    link_store: Arc<LinkStore>,
    contacts: Arc<ContactsQueue>,
    config: SwaplinkConfig,
    num_links: usize,
}

impl<T: Transport> Maintenance<T> {
    pub(crate) fn new(
        protocol: Arc<SwaplinkProtocol<T>>,
        link_store: Arc<LinkStore>,
        contacts: Arc<ContactsQueue>,
        config: SwaplinkConfig,
        num_links: usize,
    ) -> Self {
        Self {
            protocol,
            link_store,
            contacts,
            config,
            num_links,
        }
    }

    fn node(&self) -> &Node {
        self.protocol.node()
    }

    // ==================== Bootstrap ====================

    /// Acquire up to `num_links` out-links through the bootstrap peers.
    ///
    /// Every neighbour found joins the pool of walk origins, so later
    /// iterations start from more diverse places. Returns the final pool.
    pub(crate) async fn bootstrap(&self, mut pool: Vec<Node>) -> Vec<Node> {
        for _ in 0..self.num_links {
            let Some(entry) = random_choice(&pool) else {
                break;
            };
            match self.bootstrap_link(&entry).await {
                Ok(neighbour) => {
                    debug!("{} bootstrapped out-link {}", self.node(), neighbour);
                    if !pool.contains(&neighbour) {
                        pool.push(neighbour);
                    }
                }
                Err(e) => debug!("{} bootstrap via {} failed: {}", self.node(), entry, e),
            }
        }
        pool
    }

    async fn bootstrap_link(&self, entry: &Node) -> Result<Node> {
        let limit = self.config.walk_length;
        let neighbour = self
            .protocol
            .call_random_walk(entry, 0, limit, LinkType::In, None)
            .await?;
        if &neighbour == self.node() {
            return Err(SwaplinkError::EmptySample);
        }
        self.protocol.call_give_me_in_node(&neighbour).await?;
        self.protocol.call_im_your_in_node(&neighbour).await?;
        self.link_store.add_out_link(neighbour.clone());
        Ok(neighbour)
    }

    // ==================== In-links ====================

    pub(crate) async fn run_in_link_repair(self: Arc<Self>) {
        loop {
            self.repair_in_links().await;
            tokio::time::sleep(self.config.heartbeat_check_interval).await;
        }
    }

    pub(crate) async fn repair_in_links(&self) {
        for node in self
            .link_store
            .expire_in_links(self.config.heartbeat_check_interval)
        {
            debug!("{} in-link {} expired", self.node(), node);
        }

        let missing = self
            .num_links
            .saturating_sub(self.link_store.in_link_count());
        for _ in 0..missing {
            if self.link_store.in_link_count() >= self.num_links {
                break;
            }
            if let Err(e) = self.acquire_in_link().await {
                debug!("{} in-link repair attempt: {}", self.node(), e);
            }
        }
    }

    async fn acquire_in_link(&self) -> Result<()> {
        let start = random_choice(&self.link_store.get_out_links_copy())
            .or_else(|| self.contacts.pop())
            .ok_or(SwaplinkError::EmptySample)?;
        let candidate = self
            .protocol
            .call_random_walk(&start, 0, self.config.walk_length, LinkType::Out, None)
            .await?;
        if &candidate == self.node() {
            return Ok(());
        }
        self.protocol.call_give_me_in_node(&candidate).await?;
        Ok(())
    }

    // ==================== Out-links ====================

    pub(crate) async fn run_out_link_repair(self: Arc<Self>) {
        loop {
            self.repair_out_links().await;
            tokio::time::sleep(self.config.heartbeat_send_interval).await;
        }
    }

    pub(crate) async fn repair_out_links(&self) {
        for node in self.link_store.get_out_links_copy() {
            if let Err(e) = self.protocol.call_im_your_in_node(&node).await {
                debug!("{} heartbeat lost out-link: {}", self.node(), e);
            }
        }

        let missing = self
            .num_links
            .saturating_sub(self.link_store.out_link_count());
        for _ in 0..missing {
            if self.link_store.out_link_count() >= self.num_links {
                break;
            }
            if let Err(e) = self.acquire_out_link().await {
                debug!("{} out-link repair attempt: {}", self.node(), e);
            }
        }

        self.trim_out_links();
    }

    async fn acquire_out_link(&self) -> Result<()> {
        let start = random_choice(&self.link_store.get_in_links_copy())
            .or_else(|| self.contacts.pop())
            .ok_or(SwaplinkError::EmptySample)?;
        let candidate = self
            .protocol
            .call_random_walk(&start, 0, self.config.walk_length, LinkType::In, None)
            .await?;
        if &candidate == self.node() {
            return Ok(());
        }
        self.protocol.call_im_your_in_node(&candidate).await?;
        self.link_store.add_out_link(candidate);
        Ok(())
    }

    fn trim_out_links(&self) {
        while self.link_store.out_link_count() > self.num_links {
            let Some(surplus) = random_choice(&self.link_store.get_out_links_copy()) else {
                break;
            };
            debug!("{} dropping surplus out-link {}", self.node(), surplus);
            self.link_store.remove_out_link(&surplus);
        }
    }
}
