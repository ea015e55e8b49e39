//! Gas limit estimation and price selection

use crate::chain::NodeRpc;
use crate::config::GasConfig;
use crate::error::GatewayResult;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::U256;
use std::collections::HashMap;
use tracing::{debug, info};

/// Gas estimator for transactions
pub struct GasEstimator {
    /// Buffer percentage for gas price
    gas_price_buffer_percent: u64,
    /// Additive limit margin per chain id
    uplifts: HashMap<u64, U256>,
}

impl GasEstimator {
    pub fn new(config: &GasConfig) -> Self {
        Self {
            gas_price_buffer_percent: config.price_buffer_percent,
            uplifts: config
                .uplifts
                .iter()
                .map(|u| (u.chain_id, U256::from(u.extra_gas)))
                .collect(),
        }
    }

    /// Simulate the transaction on the node and add the chain's margin, if any
    pub async fn estimate_limit(
        &self,
        node: &dyn NodeRpc,
        tx: &TypedTransaction,
        chain_id: u64,
    ) -> GatewayResult<U256> {
        let estimated = node.estimate_gas(tx).await?;

        match self.uplifts.get(&chain_id) {
            Some(extra) => {
                info!(
                    "Network {} under-estimates gas. Increasing limit {} by {}",
                    chain_id, estimated, extra
                );
                Ok(estimated + *extra)
            }
            None => {
                debug!("Estimated gas limit {} on network {}", estimated, chain_id);
                Ok(estimated)
            }
        }
    }

    /// Node gas price plus the configured buffer
    pub async fn gas_price(&self, node: &dyn NodeRpc) -> GatewayResult<U256> {
        let price = node.gas_price().await?;
        let buffer = price * self.gas_price_buffer_percent / 100;
        Ok(price + buffer)
    }
}

impl Default for GasEstimator {
    fn default() -> Self {
        Self::new(&GasConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockNodeRpc;
    use crate::config::GasUplift;

    fn estimating(limit: u64) -> MockNodeRpc {
        let mut node = MockNodeRpc::new();
        node.expect_estimate_gas()
            .times(1)
            .returning(move |_| Ok(U256::from(limit)));
        node
    }

    #[tokio::test]
    async fn test_ropsten_uplift() {
        let node = estimating(50_000);
        let limit = GasEstimator::default()
            .estimate_limit(&node, &TypedTransaction::default(), 3)
            .await
            .unwrap();
        assert_eq!(limit, U256::from(50_000 + 0xFFFFF));
    }

    #[tokio::test]
    async fn test_no_uplift_elsewhere() {
        let node = estimating(50_000);
        let limit = GasEstimator::default()
            .estimate_limit(&node, &TypedTransaction::default(), 1)
            .await
            .unwrap();
        assert_eq!(limit, U256::from(50_000));
    }

    #[tokio::test]
    async fn test_price_buffer() {
        let mut node = MockNodeRpc::new();
        node.expect_gas_price()
            .returning(|| Ok(U256::from(1_000_000_000u64)));

        let estimator = GasEstimator::new(&GasConfig {
            price_buffer_percent: 10,
            uplifts: vec![GasUplift {
                chain_id: 5,
                extra_gas: 1,
            }],
        });

        assert_eq!(
            estimator.gas_price(&node).await.unwrap(),
            U256::from(1_100_000_000u64)
        );
    }
}
