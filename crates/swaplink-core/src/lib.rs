//! swaplink-core: random-walk overlay maintenance and peer sampling.
//!
//! Every peer keeps a fixed number of out-links and in-links to other
//! members of the overlay. Random walks over those links yield near-uniform
//! samples of the membership, and the same walks repair the link graph as
//! peers come and go.
//!
//! This crate provides:
//! - The link store with its out-link observer channel
//! - The four-procedure protocol engine (walk, give-me, change, announce)
//! - The background repair loops and the [`Swaplink`] peer lifecycle
//! - The [`Transport`] trait abstraction plus an in-process [`MemoryNetwork`]

pub mod config;
pub mod contacts;
pub mod error;
mod maintenance;
pub mod links;
pub mod memory;
pub mod message;
pub mod node;
pub mod protocol;
pub mod random;
pub mod swaplink;
pub mod transport;

pub use config::{ConfigError, SwaplinkConfig};
pub use contacts::ContactsQueue;
pub use error::{RpcError, SwaplinkError};
pub use links::{LinkStore, NeighboursReceiver, NeighboursSender};
pub use memory::{MemoryBinder, MemoryNetwork, MemoryTransport};
pub use message::{Request, Response};
pub use node::{LinkType, Node, NodeError};
pub use protocol::SwaplinkProtocol;
pub use swaplink::{PeerState, Swaplink};
pub use transport::{InboundRequest, InboundSender, Transport, TransportBinder, TransportError};
