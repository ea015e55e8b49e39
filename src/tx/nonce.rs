//! Nonce sequencing for the gateway account
//!
//! The node enforces a strictly sequential nonce per account no matter which
//! request path submits, so one sequencer is shared by the whole process:
//! - Seeded from the node's pending-inclusive transaction count
//! - One serialized read-and-increment per signing operation
//! - A forward-only resync used after nonce conflicts
//!
//! A nonce is consumed the moment it is issued, even if signing or
//! submission fails afterwards.

use crate::chain::NodeConnection;
use crate::error::{GatewayError, GatewayResult};

use ethers::types::Address;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct NonceSequencer {
    /// Next nonce to hand out; `None` until seeded
    next: Mutex<Option<u64>>,
}

impl NonceSequencer {
    pub fn new() -> Self {
        Self {
            next: Mutex::new(None),
        }
    }

    /// Seed the counter from the node. Run after the account is resolved.
    pub async fn initialize(
        &self,
        connection: &NodeConnection,
        address: Address,
    ) -> GatewayResult<u64> {
        let node = connection.acquire().await?;
        let count = node.pending_transaction_count(address).await?.as_u64();

        *self.next.lock().await = Some(count);
        crate::metrics::record_nonce(count);
        info!("Nonce has been initialized: {}", count);

        Ok(count)
    }

    /// Hand out the next nonce
    pub async fn next(&self) -> GatewayResult<u64> {
        let mut next = self.next.lock().await;
        let nonce = next.ok_or_else(|| GatewayError::Nonce("sequencer not initialized".to_string()))?;
        *next = Some(nonce + 1);

        crate::metrics::record_nonce(nonce + 1);
        debug!("Allocated nonce {}", nonce);
        Ok(nonce)
    }

    /// Move the counter past `last_known`, the highest nonce the node is
    /// known to hold. Never moves backwards, so nonces already handed to
    /// in-flight requests are not issued twice.
    pub async fn resync_from(&self, last_known: u64) -> u64 {
        let mut next = self.next.lock().await;
        let target = last_known + 1;
        let resynced = match *next {
            Some(current) if current >= target => current,
            _ => target,
        };

        if *next != Some(resynced) {
            warn!("Nonce resynced from {:?} to {}", *next, resynced);
        }
        *next = Some(resynced);
        crate::metrics::record_nonce(resynced);
        resynced
    }

    /// Next value that would be handed out
    pub async fn current(&self) -> Option<u64> {
        *self.next.lock().await
    }

    #[cfg(test)]
    pub fn starting_at(nonce: u64) -> Self {
        Self {
            next: Mutex::new(Some(nonce)),
        }
    }
}

impl Default for NonceSequencer {
    fn default() -> Self {
        Self::new()
    }
}
