//! Signing identity of the gateway
//!
//! Resolved once at startup, after the node connection is healthy and before
//! the nonce sequencer is seeded. Immutable afterwards.

use crate::chain::{NodeConnection, NodeRpc};
use crate::error::{GatewayError, GatewayResult};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes};
use ethers::utils::format_ether;
use tracing::{error, info};

/// Who produces signatures
#[derive(Debug, Clone)]
pub enum SigningIdentity {
    /// Key material held by the gateway
    Local(LocalWallet),
    /// The node's own default account signs; no local key material
    Node,
}

#[derive(Debug, Clone)]
pub struct AccountContext {
    address: Address,
    identity: SigningIdentity,
    chain_id: u64,
}

impl AccountContext {
    /// Resolve the signing identity and the chain id from the node
    pub async fn resolve(
        connection: &NodeConnection,
        private_key: Option<&str>,
    ) -> GatewayResult<Self> {
        let node = connection.acquire().await?;

        let (address, wallet) = match private_key {
            Some(key) => {
                info!("Private key specified in config. Deriving account...");
                let wallet = parse_private_key(key)?;
                (wallet.address(), Some(wallet))
            }
            None => {
                info!("No private key specified in config. Trying to access default account...");
                let accounts = node.accounts().await?;
                let address = accounts.first().copied().ok_or_else(|| {
                    GatewayError::Wallet("node reports no default account".to_string())
                })?;
                info!("Address of default account is {:?}", address);
                (address, None)
            }
        };

        match node.balance(address).await {
            Ok(balance) => {
                let ether = format_ether(balance);
                info!("Account initialized. Address: {:?} Balance: {} ETH", address, ether);
                if let Ok(value) = ether.parse::<f64>() {
                    crate::metrics::record_wallet_balance(value);
                }
            }
            Err(e) => error!("Error getting balance for account {:?}: {}", address, e),
        }

        let chain_id = node.network_id().await?;
        info!("Network id of {} is {}", connection.endpoint(), chain_id);

        let identity = match wallet {
            Some(wallet) => SigningIdentity::Local(wallet.with_chain_id(chain_id)),
            None => SigningIdentity::Node,
        };

        Ok(Self {
            address,
            identity,
            chain_id,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn has_local_key(&self) -> bool {
        matches!(self.identity, SigningIdentity::Local(_))
    }

    /// Produce the raw signed payload for a fully populated transaction
    pub async fn sign(&self, tx: &TypedTransaction, node: &dyn NodeRpc) -> GatewayResult<Bytes> {
        match &self.identity {
            SigningIdentity::Local(wallet) => {
                let signature = wallet
                    .sign_transaction_sync(tx)
                    .map_err(|e| GatewayError::Signing(e.to_string()))?;
                Ok(tx.rlp_signed(&signature))
            }
            SigningIdentity::Node => node.sign_transaction(tx).await,
        }
    }
}

/// Accepts keys with or without the 0x prefix
fn parse_private_key(key: &str) -> GatewayResult<LocalWallet> {
    let key = key.trim();
    let key = key
        .strip_prefix("0x")
        .or_else(|| key.strip_prefix("0X"))
        .unwrap_or(key);

    let bytes = hex::decode(key)
        .map_err(|e| GatewayError::Signing(format!("invalid private key specified: {}", e)))?;

    LocalWallet::from_bytes(&bytes)
        .map_err(|e| GatewayError::Signing(format!("invalid private key specified: {}", e)))
}
