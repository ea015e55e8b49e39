//! Error types for the ledger gateway

use thiserror::Error;

/// Main error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Node connection error: {0}")]
    Connection(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Nonce conflict: {message}")]
    NonceConflict { message: String },

    #[error("Submission rejected: {0}")]
    Submission(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Transaction {tx_hash} has not been mined after {attempts} tries")]
    NotMined { tx_hash: String, attempts: u32 },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Nonce error: {0}")]
    Nonce(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Classify a node rejection of a raw transaction.
    ///
    /// Duplicate and underpriced-replacement rejections mean the local nonce
    /// view diverged from the node's and are recoverable by re-sequencing.
    pub fn from_submission(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_nonce_conflict(&message) {
            GatewayError::NonceConflict { message }
        } else {
            GatewayError::Submission(message)
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Connection(_) | GatewayError::NonceConflict { .. }
        )
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "config",
            GatewayError::Connection(_) => "connection",
            GatewayError::Signing(_) => "signing",
            GatewayError::NonceConflict { .. } => "nonce_conflict",
            GatewayError::Submission(_) => "submission",
            GatewayError::Rpc(_) => "rpc",
            GatewayError::GasEstimation(_) => "gas_estimation",
            GatewayError::NotMined { .. } => "not_mined",
            GatewayError::Validation(_) => "validation",
            GatewayError::Wallet(_) => "wallet",
            GatewayError::Nonce(_) => "nonce",
            GatewayError::Internal(_) => "internal",
        }
    }
}

fn is_nonce_conflict(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("known transaction")
        || message.contains("already known")
        || message.contains("transaction underpriced")
        || message.contains("nonce too low")
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
