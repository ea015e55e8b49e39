//! The JSON-RPC surface the gateway consumes from the remote node

use crate::error::GatewayResult;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Transaction, TransactionReceipt, H256, U256};

/// Operations consumed from the remote node.
///
/// One implementation talks to a real node through ethers; tests substitute
/// scripted fakes. Implementations must not retry: connection supervision and
/// nonce recovery live above this trait.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// `net_listening`
    async fn is_listening(&self) -> GatewayResult<bool>;

    /// `net_version`, used as the signing chain id
    async fn network_id(&self) -> GatewayResult<u64>;

    /// Accounts managed by the node itself
    async fn accounts(&self) -> GatewayResult<Vec<Address>>;

    async fn balance(&self, address: Address) -> GatewayResult<U256>;

    /// Transaction count including the node's pending pool
    async fn pending_transaction_count(&self, address: Address) -> GatewayResult<U256>;

    async fn gas_price(&self) -> GatewayResult<U256>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> GatewayResult<U256>;

    /// Node-side signing (`eth_signTransaction`) for accounts the node holds.
    /// Returns the raw signed payload.
    async fn sign_transaction(&self, tx: &TypedTransaction) -> GatewayResult<Bytes>;

    /// Returns once the node accepted the transaction into its pool
    async fn send_raw_transaction(&self, raw: Bytes) -> GatewayResult<H256>;

    async fn transaction_receipt(&self, tx_hash: H256) -> GatewayResult<Option<TransactionReceipt>>;

    async fn transaction(&self, tx_hash: H256) -> GatewayResult<Option<Transaction>>;

    async fn code(&self, address: Address) -> GatewayResult<Bytes>;

    /// Read-only execution against current state
    async fn call(&self, tx: &TypedTransaction) -> GatewayResult<Bytes>;
}

/// Creates fresh handles to the node
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> GatewayResult<std::sync::Arc<dyn NodeRpc>>;

    /// Endpoint description for logs
    fn endpoint(&self) -> &str;
}
