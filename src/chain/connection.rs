//! Supervised connection to the remote node
//!
//! Exactly one `NodeConnection` exists per configured endpoint. Callers get a
//! handle through [`NodeConnection::acquire`], which probes liveness first and
//! transparently waits out reconnects. Only one reconnect runs at a time; other
//! callers poll at a fixed delay until it finishes.

use super::rpc::{Connector, NodeRpc};
use crate::error::{GatewayError, GatewayResult};

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connected,
    ReconnectInProgress,
}

/// Fixed-delay reconnect policy
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Wait between creating a fresh handle and re-probing it
    pub interval: Duration,
    /// Wait before a caller retries while another caller reconnects
    pub reacquire_delay: Duration,
    /// `None` keeps reconnecting for the process lifetime
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            reacquire_delay: Duration::from_secs(10),
            max_attempts: None,
        }
    }
}

/// Clears the in-flight flag however the reconnect ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct NodeConnection {
    connector: Arc<dyn Connector>,
    handle: RwLock<Option<Arc<dyn NodeRpc>>>,
    state: RwLock<ConnectionState>,
    reconnect_in_progress: AtomicBool,
    policy: ReconnectPolicy,
}

impl NodeConnection {
    /// Create the connection and make a first attempt at a handle.
    ///
    /// A failed first attempt is not fatal; the next `acquire` reconnects.
    pub async fn open(connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        let handle = match connector.connect().await {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Initial connection to {} failed: {}", connector.endpoint(), e);
                None
            }
        };

        Self {
            connector,
            handle: RwLock::new(handle),
            state: RwLock::new(ConnectionState::Disconnected),
            reconnect_in_progress: AtomicBool::new(false),
            policy,
        }
    }

    pub fn endpoint(&self) -> &str {
        self.connector.endpoint()
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Lightweight liveness check. Never fails; transport errors report unhealthy.
    pub async fn probe(&self) -> bool {
        match self.current().await {
            Some(handle) => self.probe_handle(handle.as_ref()).await,
            None => {
                crate::metrics::record_node_health(false);
                false
            }
        }
    }

    /// Get a usable handle, reconnecting or waiting for a reconnect as needed
    pub async fn acquire(&self) -> GatewayResult<Arc<dyn NodeRpc>> {
        loop {
            if let Some(handle) = self.current().await {
                if self.probe_handle(handle.as_ref()).await {
                    self.mark_connected().await;
                    return Ok(handle);
                }
            }

            if self.try_claim_reconnect() {
                warn!(
                    "Node {} is not connected and no reconnect in progress. Starting reconnect.",
                    self.endpoint()
                );
                return self.run_reconnect().await;
            }

            warn!(
                "Reconnect in progress. Waiting {:?} and trying again.",
                self.policy.reacquire_delay
            );
            tokio::time::sleep(self.policy.reacquire_delay).await;
        }
    }

    /// Force a reconnect. Joins the in-flight one if another caller started it.
    pub async fn reconnect(&self) -> GatewayResult<Arc<dyn NodeRpc>> {
        if self.try_claim_reconnect() {
            self.run_reconnect().await
        } else {
            self.acquire().await
        }
    }

    fn try_claim_reconnect(&self) -> bool {
        self.reconnect_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Caller must hold the in-flight claim
    async fn run_reconnect(&self) -> GatewayResult<Arc<dyn NodeRpc>> {
        let _in_flight = InFlight(&self.reconnect_in_progress);
        *self.state.write().await = ConnectionState::ReconnectInProgress;

        let mut attempt: u32 = 0;
        loop {
            if let Some(max) = self.policy.max_attempts {
                if attempt >= max {
                    *self.state.write().await = ConnectionState::Disconnected;
                    error!(
                        "Giving up on {} after {} reconnect attempts",
                        self.endpoint(),
                        attempt
                    );
                    return Err(GatewayError::Connection(format!(
                        "node {} unreachable after {} reconnect attempts",
                        self.endpoint(),
                        attempt
                    )));
                }
            }

            warn!(
                "Reconnect try #{} to {}. Checking again in {:?}",
                attempt,
                self.endpoint(),
                self.policy.interval
            );
            crate::metrics::record_reconnect_attempt();

            match self.connector.connect().await {
                Ok(handle) => *self.handle.write().await = Some(handle),
                Err(e) => warn!("Failed to create connection to {}: {}", self.endpoint(), e),
            }

            tokio::time::sleep(self.policy.interval).await;

            if let Some(handle) = self.current().await {
                if self.probe_handle(handle.as_ref()).await {
                    *self.state.write().await = ConnectionState::Connected;
                    info!("Reconnected to {} after {} retries", self.endpoint(), attempt);
                    return Ok(handle);
                }
            }

            attempt += 1;
        }
    }

    async fn current(&self) -> Option<Arc<dyn NodeRpc>> {
        self.handle.read().await.clone()
    }

    async fn mark_connected(&self) {
        if self.reconnect_in_progress.load(Ordering::Acquire) {
            return;
        }
        let mut state = self.state.write().await;
        if *state != ConnectionState::Connected {
            info!("Node is connected to {}", self.endpoint());
            *state = ConnectionState::Connected;
        }
    }

    async fn probe_handle(&self, handle: &dyn NodeRpc) -> bool {
        let healthy = match handle.is_listening().await {
            Ok(true) => {
                debug!("Node is connected to {}", self.endpoint());
                true
            }
            Ok(false) => {
                warn!("Node {} reports it is not listening", self.endpoint());
                false
            }
            Err(e) => {
                error!("Node connection error on {}: {}", self.endpoint(), e);
                false
            }
        };
        crate::metrics::record_node_health(healthy);
        healthy
    }
}
