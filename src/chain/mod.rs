//! Chain module - the remote node and the connection to it
//!
//! This module provides:
//! - The `NodeRpc` surface the gateway consumes from the node
//! - ethers-backed handles over HTTP or WebSocket, chosen by URL scheme
//! - A supervised connection with single-flight, fixed-delay reconnects

pub mod connection;
pub mod provider;
pub mod rpc;

pub use connection::{ConnectionState, NodeConnection, ReconnectPolicy};
pub use provider::{redact_endpoint, EthersConnector, Transport};
pub use rpc::{Connector, NodeRpc};

#[cfg(test)]
pub use rpc::MockNodeRpc;
