//! ethers-backed node handle with transport selection by URL scheme

use super::rpc::{Connector, NodeRpc};
use crate::error::{GatewayError, GatewayResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, JsonRpcClient, Provider, Ws};
use ethers::types::transaction::eip2718::TypedTransaction;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Wire transport to the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Request/response over HTTP(S)
    Http,
    /// Persistent WebSocket
    Ws,
}

impl Transport {
    /// Select the transport from the endpoint's scheme
    pub fn from_url(url: &str) -> GatewayResult<Self> {
        let lower = url.trim().to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Ok(Transport::Http)
        } else if lower.starts_with("ws://") || lower.starts_with("wss://") {
            Ok(Transport::Ws)
        } else {
            Err(GatewayError::Config(format!(
                "unsupported node endpoint scheme: {}",
                redact_endpoint(url)
            )))
        }
    }
}

/// Scheme and host of an endpoint. Credentials, paths and query strings
/// often carry API keys and are left out.
pub fn redact_endpoint(url: &str) -> String {
    let url = url.trim();
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, url),
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);

    match scheme {
        Some(scheme) => format!("{}://{}", scheme.to_ascii_lowercase(), host),
        None => host.to_string(),
    }
}

/// Node handle over an ethers provider
pub struct EthersNode<P> {
    provider: Provider<P>,
}

impl<P: JsonRpcClient> EthersNode<P> {
    pub fn new(provider: Provider<P>) -> Self {
        Self { provider }
    }
}

/// `eth_signTransaction` result; only the raw payload is consumed
#[derive(Debug, Serialize, Deserialize)]
struct SignTransactionResponse {
    raw: Bytes,
}

fn rpc_err(e: impl std::fmt::Display) -> GatewayError {
    GatewayError::Rpc(e.to_string())
}

#[async_trait]
impl<P: JsonRpcClient + 'static> NodeRpc for EthersNode<P> {
    async fn is_listening(&self) -> GatewayResult<bool> {
        self.provider
            .request::<_, bool>("net_listening", ())
            .await
            .map_err(|e| GatewayError::Connection(e.to_string()))
    }

    async fn network_id(&self) -> GatewayResult<u64> {
        let version = self.provider.get_net_version().await.map_err(rpc_err)?;
        version
            .trim()
            .parse::<u64>()
            .map_err(|e| GatewayError::Rpc(format!("invalid network id {:?}: {}", version, e)))
    }

    async fn accounts(&self) -> GatewayResult<Vec<Address>> {
        self.provider.get_accounts().await.map_err(rpc_err)
    }

    async fn balance(&self, address: Address) -> GatewayResult<U256> {
        self.provider.get_balance(address, None).await.map_err(rpc_err)
    }

    async fn pending_transaction_count(&self, address: Address) -> GatewayResult<U256> {
        self.provider
            .get_transaction_count(address, Some(BlockId::Number(BlockNumber::Pending)))
            .await
            .map_err(|e| GatewayError::Nonce(e.to_string()))
    }

    async fn gas_price(&self) -> GatewayResult<U256> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| GatewayError::GasEstimation(e.to_string()))
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> GatewayResult<U256> {
        self.provider
            .estimate_gas(tx, None)
            .await
            .map_err(|e| GatewayError::GasEstimation(e.to_string()))
    }

    async fn sign_transaction(&self, tx: &TypedTransaction) -> GatewayResult<Bytes> {
        let response: SignTransactionResponse = self
            .provider
            .request("eth_signTransaction", [tx])
            .await
            .map_err(|e| GatewayError::Signing(e.to_string()))?;
        Ok(response.raw)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> GatewayResult<H256> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| GatewayError::from_submission(e.to_string()))?;
        Ok(pending.tx_hash())
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> GatewayResult<Option<TransactionReceipt>> {
        self.provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(rpc_err)
    }

    async fn transaction(&self, tx_hash: H256) -> GatewayResult<Option<Transaction>> {
        self.provider.get_transaction(tx_hash).await.map_err(rpc_err)
    }

    async fn code(&self, address: Address) -> GatewayResult<Bytes> {
        self.provider.get_code(address, None).await.map_err(rpc_err)
    }

    async fn call(&self, tx: &TypedTransaction) -> GatewayResult<Bytes> {
        self.provider.call(tx, None).await.map_err(rpc_err)
    }
}

/// Builds ethers handles for a configured endpoint
pub struct EthersConnector {
    url: String,
    endpoint: String,
    transport: Transport,
}

impl EthersConnector {
    pub fn new(url: impl Into<String>) -> GatewayResult<Self> {
        let url = url.into();
        let transport = Transport::from_url(&url)?;
        Ok(Self {
            endpoint: redact_endpoint(&url),
            url,
            transport,
        })
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }
}

#[async_trait]
impl Connector for EthersConnector {
    async fn connect(&self) -> GatewayResult<Arc<dyn NodeRpc>> {
        match self.transport {
            Transport::Http => {
                let provider = Provider::<Http>::try_from(self.url.as_str())
                    .map_err(|e| GatewayError::Config(format!("Invalid node URL: {}", e)))?
                    .interval(Duration::from_millis(100));
                debug!("Created HTTP provider for {}", self.endpoint);
                Ok(Arc::new(EthersNode::new(provider)))
            }
            Transport::Ws => {
                let provider = Provider::<Ws>::connect(self.url.as_str())
                    .await
                    .map_err(|e| GatewayError::Connection(e.to_string()))?
                    .interval(Duration::from_millis(100));
                info!("WebSocket connected to {}", self.endpoint);
                Ok(Arc::new(EthersNode::new(provider)))
            }
        }
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
