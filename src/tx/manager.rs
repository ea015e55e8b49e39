//! Transaction lifecycle: sign, submit with nonce-conflict recovery, and
//! bounded polling for receipts

use super::gas::GasEstimator;
use super::nonce::NonceSequencer;
use super::types::{
    is_address, ReceiptPolicy, SignedTransaction, SubmissionPolicy, TransactionRequest,
};
use crate::account::AccountContext;
use crate::chain::NodeConnection;
use crate::error::{GatewayError, GatewayResult};

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, Bytes, Transaction, TransactionReceipt, TransactionRequest as LegacyRequest, H256,
    U256,
};
use ethers::utils::keccak256;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Deployed code must be longer than this to count as a contract
const MIN_CONTRACT_CODE_LEN: usize = 4;

/// Turns requests into submitted transactions and tracks them until mined
pub struct TransactionManager {
    connection: Arc<NodeConnection>,
    account: Arc<AccountContext>,
    nonces: Arc<NonceSequencer>,
    gas: GasEstimator,
    submission: SubmissionPolicy,
    receipts: ReceiptPolicy,
}

impl TransactionManager {
    pub fn new(
        connection: Arc<NodeConnection>,
        account: Arc<AccountContext>,
        nonces: Arc<NonceSequencer>,
        gas: GasEstimator,
        submission: SubmissionPolicy,
        receipts: ReceiptPolicy,
    ) -> Self {
        Self {
            connection,
            account,
            nonces,
            gas,
            submission,
            receipts,
        }
    }

    pub fn account(&self) -> &AccountContext {
        &self.account
    }

    pub fn connection(&self) -> &Arc<NodeConnection> {
        &self.connection
    }

    /// Stamp sender, chain id, nonce and gas onto the request and sign it.
    ///
    /// Validation happens before a nonce is issued. Once issued, the nonce is
    /// consumed even if a later step fails.
    pub async fn sign(&self, request: &TransactionRequest) -> GatewayResult<SignedTransaction> {
        request.validate()?;

        let node = self.connection.acquire().await?;
        let chain_id = self.account.chain_id();

        let nonce = match request.nonce_override {
            Some(nonce) => nonce,
            None => U256::from(self.nonces.next().await?),
        };

        let mut tx = LegacyRequest::new()
            .from(self.account.address())
            .chain_id(chain_id)
            .nonce(nonce);
        if let Some(to) = request.to {
            tx = tx.to(to);
        }
        if let Some(data) = request.data.clone() {
            tx = tx.data(data);
        }
        if let Some(value) = request.value {
            tx = tx.value(value);
        }
        let mut typed = TypedTransaction::Legacy(tx);

        let gas_price = self.gas.gas_price(node.as_ref()).await?;
        typed.set_gas_price(gas_price);

        let gas = match request.gas_limit {
            Some(limit) => limit,
            None => self.gas.estimate_limit(node.as_ref(), &typed, chain_id).await?,
        };
        typed.set_gas(gas);

        info!(
            "Signing transaction to: {:?} from: {:?} network id: {} nonce: {} gas: {}",
            request.to,
            self.account.address(),
            chain_id,
            nonce,
            gas
        );

        let raw = self
            .account
            .sign(&typed, node.as_ref())
            .await
            .map_err(|e| self.log_signing_failure(request, e))?;

        if raw.is_empty() {
            return Err(self.log_signing_failure(
                request,
                GatewayError::Signing("signer returned no raw transaction".to_string()),
            ));
        }

        Ok(SignedTransaction {
            hash: H256::from(keccak256(&raw)),
            raw,
            nonce,
        })
    }

    /// Send signed bytes once. Returns as soon as the node accepts the hash
    /// into its pool; does not wait for mining.
    pub async fn submit(&self, signed: &SignedTransaction) -> GatewayResult<H256> {
        let node = self.connection.acquire().await?;
        let tx_hash = node.send_raw_transaction(signed.raw.clone()).await?;

        info!("Transaction accepted: {:?} (nonce {})", tx_hash, signed.nonce);
        crate::metrics::record_tx_submitted();
        Ok(tx_hash)
    }

    /// Sign and submit, re-sequencing and resubmitting on nonce conflicts
    pub async fn send_transaction(&self, mut request: TransactionRequest) -> GatewayResult<H256> {
        let mut conflicts: u32 = 0;

        loop {
            let signed = match self.sign(&request).await {
                Ok(signed) => signed,
                Err(e) => {
                    crate::metrics::record_tx_failed(e.kind());
                    return Err(e);
                }
            };

            match self.submit(&signed).await {
                Ok(tx_hash) => return Ok(tx_hash),
                Err(GatewayError::NonceConflict { message })
                    if conflicts < self.submission.max_conflict_retries =>
                {
                    conflicts += 1;
                    crate::metrics::record_nonce_conflict();

                    // a caller-chosen nonce says nothing about what the node holds
                    let issued = request.nonce_override.is_none().then_some(signed.nonce);
                    if let Some(last_known) = self.last_known_nonce(issued).await? {
                        self.nonces.resync_from(last_known).await;
                    }
                    warn!(
                        "Nonce error: {} - resubmitting. Old nonce: {} next nonce: {:?} (conflict {}/{})",
                        message,
                        signed.nonce,
                        self.nonces.current().await,
                        conflicts,
                        self.submission.max_conflict_retries
                    );

                    // an explicit nonce is what conflicted; let the sequencer pick
                    request.nonce_override = None;
                }
                Err(e) => {
                    error!(
                        retryable = e.is_retryable(),
                        "Error sending transaction - from: {:?} to: {:?} nonce: {} error: {}",
                        self.account.address(),
                        request.to,
                        signed.nonce,
                        e
                    );
                    crate::metrics::record_tx_failed(e.kind());
                    return Err(e);
                }
            }
        }
    }

    /// Submit bytes signed by the caller and wait for the receipt
    pub async fn send_presigned(&self, raw: Bytes) -> GatewayResult<TransactionReceipt> {
        let node = self.connection.acquire().await?;
        let tx_hash = node.send_raw_transaction(raw).await.map_err(|e| {
            error!("Error sending pre-signed transaction: {}", e);
            crate::metrics::record_tx_failed(e.kind());
            e
        })?;

        info!("Pre-signed transaction accepted: {:?}", tx_hash);
        crate::metrics::record_tx_submitted();
        self.wait_for_receipt(tx_hash).await
    }

    /// Poll for a receipt with the configured policy
    pub async fn wait_for_receipt(&self, tx_hash: H256) -> GatewayResult<TransactionReceipt> {
        self.wait_for_receipt_with(tx_hash, &self.receipts).await
    }

    /// Poll for a receipt at a fixed interval, at most `max_tries` times.
    ///
    /// Abandoning the returned future does not affect the transaction.
    pub async fn wait_for_receipt_with(
        &self,
        tx_hash: H256,
        policy: &ReceiptPolicy,
    ) -> GatewayResult<TransactionReceipt> {
        let started = Instant::now();

        for attempt in 1..=policy.max_tries {
            info!("Waiting for receipt of {:?} try #{}", tx_hash, attempt);

            let node = self.connection.acquire().await?;
            if let Some(receipt) = node.transaction_receipt(tx_hash).await? {
                info!("Found receipt for {:?}", tx_hash);
                crate::metrics::record_receipt_wait(started.elapsed().as_secs_f64(), true);
                return Ok(receipt);
            }

            if attempt < policy.max_tries {
                debug!(
                    "Transaction {:?} not mined yet. Checking again in {:?}",
                    tx_hash, policy.interval
                );
                tokio::time::sleep(policy.interval).await;
            }
        }

        error!(
            "Giving up on receipt for {:?} after {} tries",
            tx_hash, policy.max_tries
        );
        crate::metrics::record_receipt_wait(started.elapsed().as_secs_f64(), false);
        Err(GatewayError::NotMined {
            tx_hash: format!("{:?}", tx_hash),
            attempts: policy.max_tries,
        })
    }

    /// Read-only execution; no nonce, no signature
    pub async fn call(&self, request: &TransactionRequest) -> GatewayResult<Bytes> {
        request.validate()?;

        let mut tx = LegacyRequest::new().from(self.account.address());
        if let Some(to) = request.to {
            tx = tx.to(to);
        }
        if let Some(data) = request.data.clone() {
            tx = tx.data(data);
        }
        if let Some(value) = request.value {
            tx = tx.value(value);
        }

        let node = self.connection.acquire().await?;
        node.call(&TypedTransaction::Legacy(tx)).await
    }

    /// True once the transaction has a receipt
    pub async fn exists(&self, tx_hash: H256) -> GatewayResult<bool> {
        let node = self.connection.acquire().await?;
        Ok(node.transaction_receipt(tx_hash).await?.is_some())
    }

    pub async fn contract_exists(&self, address: Address) -> GatewayResult<bool> {
        let node = self.connection.acquire().await?;
        let code = node.code(address).await?;

        if code.len() > MIN_CONTRACT_CODE_LEN {
            Ok(true)
        } else {
            error!(
                "Contract does not exist: {:?} on network {}",
                address,
                self.account.chain_id()
            );
            Ok(false)
        }
    }

    pub async fn transaction(&self, tx_hash: H256) -> GatewayResult<Option<Transaction>> {
        let node = self.connection.acquire().await?;
        let tx = node.transaction(tx_hash).await?;
        if let Some(tx) = &tx {
            info!("Transaction retrieved from chain: {:?}", tx.hash);
        }
        Ok(tx)
    }

    pub fn is_address(&self, text: &str) -> bool {
        is_address(text)
    }

    /// Balance of the gateway account
    pub async fn balance(&self) -> GatewayResult<U256> {
        let node = self.connection.acquire().await?;
        node.balance(self.account.address()).await
    }

    /// Highest nonce the node is known to hold, never below a sequencer-issued
    /// nonce that conflicted. `None` when the node holds nothing for the account.
    async fn last_known_nonce(&self, issued: Option<U256>) -> GatewayResult<Option<u64>> {
        let node = self.connection.acquire().await?;
        let pending = node
            .pending_transaction_count(self.account.address())
            .await?
            .as_u64();
        let node_view = pending.checked_sub(1);

        Ok(match issued {
            Some(nonce) => Some(node_view.map_or(nonce.as_u64(), |n| n.max(nonce.as_u64()))),
            None => node_view,
        })
    }

    fn log_signing_failure(&self, request: &TransactionRequest, e: GatewayError) -> GatewayError {
        error!(
            "Signing failed - from: {:?} to: {:?} error: {}",
            self.account.address(),
            request.to,
            e
        );
        e
    }
}
