//! The four Swaplink procedures.
//!
//! Each procedure has an outbound `call_*` wrapper and an inbound handler:
//!
//! - **random_walk**: depth-bounded, cycle-terminating walk over one link
//!   direction. Each hop is a nested call made from inside the previous
//!   hop's handler; the terminal peer's identity travels back down the chain.
//! - **give_me_in_node**: the recipient asks one of its in-links to retarget
//!   from the recipient to the requester.
//! - **change_your_out_node**: the recipient drops an out-link (degree floor
//!   permitting) and adopts a new one.
//! - **im_your_in_node**: announcement and heartbeat along an out-link.
//!
//! Any failed outbound call evicts the target from both link directions
//! before the error is returned.

use crate::contacts::ContactsQueue;
use crate::error::RpcError;
use crate::links::LinkStore;
use crate::message::{Request, Response};
use crate::node::{LinkType, Node};
use crate::random::random_choice_safe;
use crate::transport::{InboundReceiver, InboundRequest, Transport};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

/// Protocol engine of one peer.
pub struct SwaplinkProtocol<T: Transport> {
    node: Node,
    /// Target degree, used by the retarget handler's floor check
    num_links: usize,
    link_store: Arc<LinkStore>,
    contacts: Arc<ContactsQueue>,
    transport: T,
    give_me_max_attempts: usize,
}

impl<T: Transport> SwaplinkProtocol<T> {
    pub fn new(
        num_links: usize,
        link_store: Arc<LinkStore>,
        contacts: Arc<ContactsQueue>,
        transport: T,
        give_me_max_attempts: usize,
    ) -> Self {
        Self {
            node: transport.local_node(),
            num_links,
            link_store,
            contacts,
            transport,
            give_me_max_attempts: give_me_max_attempts.max(1),
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    // ==================== Calls ====================

    /// Start (or continue, when `initiator` is given) a random walk at `target`.
    ///
    /// Returns the peer the walk ended at.
    pub async fn call_random_walk(
        &self,
        target: &Node,
        index: u32,
        limit: u32,
        direction: LinkType,
        initiator: Option<Node>,
    ) -> Result<Node, RpcError> {
        let initiator = initiator.unwrap_or_else(|| self.node.clone());
        let request = Request::random_walk(initiator, index, limit, direction);
        match self.call(target, request).await? {
            Response::Node(node) => Ok(node),
            Response::Done => Err(self.unexpected("random_walk", target)),
        }
    }

    /// Ask `target` to find us a new in-link.
    pub async fn call_give_me_in_node(&self, target: &Node) -> Result<(), RpcError> {
        self.call_expecting_done(target, Request::GiveMeInNode).await
    }

    /// Ask `target` to retarget its out-link from us to `new_target`.
    pub async fn call_change_your_out_node(
        &self,
        target: &Node,
        new_target: Node,
    ) -> Result<(), RpcError> {
        let request = Request::change_your_out_node(self.node.clone(), new_target);
        self.call_expecting_done(target, request).await
    }

    /// Announce ourselves as an in-link of `target` (also the heartbeat).
    pub async fn call_im_your_in_node(&self, target: &Node) -> Result<(), RpcError> {
        self.call_expecting_done(target, Request::ImYourInNode).await
    }

    async fn call_expecting_done(&self, target: &Node, request: Request) -> Result<(), RpcError> {
        let procedure = request.name();
        match self.call(target, request).await? {
            Response::Done => Ok(()),
            Response::Node(_) => Err(self.unexpected(procedure, target)),
        }
    }

    async fn call(&self, target: &Node, request: Request) -> Result<Response, RpcError> {
        let procedure = request.name();
        match self.transport.send_request(target, request).await {
            Ok(response) => Ok(response),
            Err(source) => {
                self.link_store.remove_link(target);
                debug!("{} to {} failed, evicted: {}", procedure, target, source);
                Err(RpcError::Failed {
                    procedure,
                    target: target.clone(),
                    source,
                })
            }
        }
    }

    fn unexpected(&self, procedure: &'static str, target: &Node) -> RpcError {
        self.link_store.remove_link(target);
        debug!("{} to {} returned an unexpected response, evicted", procedure, target);
        RpcError::UnexpectedResponse {
            procedure,
            target: target.clone(),
        }
    }

    // ==================== Handlers ====================

    /// Answer one inbound request. Every sender is recorded as a recent contact.
    pub async fn handle(&self, sender: Node, request: Request) -> Response {
        trace!("{} <- {}: {}", self.node, sender, request.name());
        self.contacts.push(sender.clone());

        match request {
            Request::RandomWalk {
                initiator,
                index,
                limit,
                direction,
            } => {
                self.handle_random_walk(sender, initiator, index, limit, direction)
                    .await
            }
            Request::GiveMeInNode => self.handle_give_me_in_node(sender).await,
            Request::ChangeYourOutNode {
                old_target,
                new_target,
            } => {
                self.handle_change_your_out_node(sender, old_target, new_target)
                    .await
            }
            Request::ImYourInNode => self.handle_im_your_in_node(sender),
        }
    }

    async fn handle_random_walk(
        &self,
        sender: Node,
        initiator: Node,
        index: u32,
        limit: u32,
        direction: LinkType,
    ) -> Response {
        if index >= limit {
            return Response::Node(self.node.clone());
        }

        let links = match direction {
            LinkType::In => self.link_store.get_in_links_copy(),
            LinkType::Out => self.link_store.get_out_links_copy(),
        };
        let candidate = random_choice_safe(&links, self.node.clone());

        // Cycle guard: never walk back to ourselves, the previous hop or the origin
        if candidate == self.node || candidate == sender || candidate == initiator {
            return Response::Node(self.node.clone());
        }

        match self
            .call_random_walk(&candidate, index + 1, limit, direction, Some(initiator))
            .await
        {
            Ok(node) => Response::Node(node),
            // The dead hop is already evicted; the walk ends here instead.
            Err(_) => Response::Node(self.node.clone()),
        }
    }

    async fn handle_give_me_in_node(&self, requester: Node) -> Response {
        for attempt in 1..=self.give_me_max_attempts {
            let candidate =
                random_choice_safe(&self.link_store.get_in_links_copy(), self.node.clone());
            if candidate == self.node || candidate == requester {
                return Response::Done;
            }

            match self
                .call_change_your_out_node(&candidate, requester.clone())
                .await
            {
                Ok(()) => return Response::Done,
                Err(e) => debug!("give_me_in_node attempt {} for {}: {}", attempt, requester, e),
            }
        }

        warn!(
            "give_me_in_node for {} gave up after {} attempts",
            requester, self.give_me_max_attempts
        );
        Response::Done
    }

    async fn handle_change_your_out_node(
        &self,
        sender: Node,
        old_target: Node,
        new_target: Node,
    ) -> Response {
        if sender == self.node || new_target == self.node {
            return Response::Done;
        }

        // Floor check uses the pre-removal count, so one extra out-link may
        // be held until the next repair round.
        if self
            .link_store
            .remove_out_link_above(&old_target, self.num_links)
        {
            debug!("{} retargets {} -> {}", self.node, old_target, new_target);
        }

        match self.call_im_your_in_node(&new_target).await {
            Ok(()) => self.link_store.add_out_link(new_target),
            Err(e) => debug!("retarget to {} abandoned: {}", new_target, e),
        }
        Response::Done
    }

    fn handle_im_your_in_node(&self, sender: Node) -> Response {
        if sender != self.node {
            self.link_store.add_in_link(sender);
        }
        Response::Done
    }

    // ==================== Dispatch ====================

    /// Answer inbound requests until the transport drops its sender.
    ///
    /// Each request runs in its own task so a handler waiting on a nested
    /// call never blocks the others. Dropping the returned future aborts every
    /// handler still in flight.
    pub async fn serve(self: Arc<Self>, mut inbound: InboundReceiver) {
        let mut handlers = JoinSet::new();
        loop {
            tokio::select! {
                next = inbound.recv() => {
                    let Some(InboundRequest { sender, request, reply }) = next else {
                        break;
                    };
                    let protocol = Arc::clone(&self);
                    handlers.spawn(async move {
                        let response = protocol.handle(sender, request).await;
                        // Caller may have timed out and gone away
                        let _ = reply.send(response);
                    });
                }
                Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
            }
        }
        debug!("{} stopped serving requests", self.node);
    }
}
