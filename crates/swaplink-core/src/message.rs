//! Swaplink protocol message types.
//!
//! Four procedures travel between peers. The immediate sender is carried by
//! the transport envelope, not by these types.

use crate::node::{LinkType, Node};
use serde::{Deserialize, Serialize};

/// Requests a peer can make of another peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Request {
    /// Continue (or end) a random walk over one link direction.
    RandomWalk {
        /// Peer that started the walk
        initiator: Node,
        /// Hops taken so far
        index: u32,
        /// Hop budget
        limit: u32,
        /// Which link graph to walk
        direction: LinkType,
    },

    /// Ask the recipient to find the sender a new in-link.
    GiveMeInNode,

    /// Ask the recipient to retarget one of its out-links.
    ChangeYourOutNode {
        /// Out-link to drop (if the degree floor allows)
        old_target: Node,
        /// Out-link to add
        new_target: Node,
    },

    /// Announce that the sender holds the recipient as an out-link (heartbeat).
    ImYourInNode,
}

impl Request {
    /// Create a random-walk hop request.
    pub fn random_walk(initiator: Node, index: u32, limit: u32, direction: LinkType) -> Self {
        Self::RandomWalk {
            initiator,
            index,
            limit,
            direction,
        }
    }

    /// Create a retarget request.
    pub fn change_your_out_node(old_target: Node, new_target: Node) -> Self {
        Self::ChangeYourOutNode {
            old_target,
            new_target,
        }
    }

    /// Procedure name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RandomWalk { .. } => "random_walk",
            Self::GiveMeInNode => "give_me_in_node",
            Self::ChangeYourOutNode { .. } => "change_your_out_node",
            Self::ImYourInNode => "im_your_in_node",
        }
    }
}

/// Responses to [`Request`]s.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Response {
    /// Terminal peer of a random walk.
    Node(Node),
    /// Procedure completed; nothing to return.
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_names() {
        let a = Node::new("a", 1);
        let b = Node::new("b", 2);

        assert_eq!(
            Request::random_walk(a.clone(), 0, 5, LinkType::In).name(),
            "random_walk"
        );
        assert_eq!(Request::GiveMeInNode.name(), "give_me_in_node");
        assert_eq!(
            Request::change_your_out_node(a, b).name(),
            "change_your_out_node"
        );
        assert_eq!(Request::ImYourInNode.name(), "im_your_in_node");
    }

    #[test]
    fn test_random_walk_wire_format() {
        let msg = Request::random_walk(Node::new("10.0.0.1", 5678), 2, 5, LinkType::Out);
        let json = serde_json::to_string(&msg).unwrap();

        // Node travels as host + port, direction as a small integer
        assert!(json.contains("\"host\":\"10.0.0.1\""));
        assert!(json.contains("\"port\":5678"));
        assert!(json.contains("\"direction\":2"));
    }
}
