//! Integration tests for Ferry
//!
//! Each test runs real directory and node listeners on loopback ports and
//! drives them through the same HTTP and transfer clients the CLI uses.

#[path = "integration/harness.rs"]
mod harness;

#[path = "integration/node_network.rs"]
mod node_network;

#[path = "integration/peer_discovery.rs"]
mod peer_discovery;

#[path = "integration/concurrent_uploads.rs"]
mod concurrent_uploads;
