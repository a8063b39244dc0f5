//! swaplink-daemon library: the UDP transport for swaplink-core peers.
//!
//! This is a thin library layer under the daemon binary, allowing
//! integration tests to run real peers over loopback sockets.

pub mod datagram;
pub mod udp;

// Re-export key types for convenience
pub use datagram::{Datagram, DatagramBody, MAX_DATAGRAM_SIZE};
pub use udp::{UdpBinder, UdpTransport};
