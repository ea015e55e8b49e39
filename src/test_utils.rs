//! Scriptable fakes for the node boundary

use crate::account::AccountContext;
use crate::chain::{Connector, NodeConnection, NodeRpc, ReconnectPolicy};
use crate::error::{GatewayError, GatewayResult};
use crate::tx::{GasEstimator, NonceSequencer, ReceiptPolicy, SubmissionPolicy, TransactionManager};

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Transaction, TransactionReceipt, H256, U256};
use ethers::utils::keccak256;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub const TEST_PRIVATE_KEY: &str =
    "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

/// How the fake node answers a raw submission
#[derive(Debug, Clone)]
pub enum SendOutcome {
    Accept,
    Reject(String),
}

pub struct FakeNode {
    listening: AtomicBool,
    listening_error: AtomicBool,
    listening_script: Mutex<VecDeque<bool>>,
    accounts: Mutex<Vec<Address>>,
    network_id: AtomicU64,
    transaction_count: AtomicU64,
    gas_estimate: AtomicU64,
    gas_price: AtomicU64,
    node_signature: Mutex<Bytes>,
    send_script: Mutex<VecDeque<SendOutcome>>,
    sent: Mutex<Vec<Bytes>>,
    estimated: Mutex<Vec<TypedTransaction>>,
    mined: Mutex<HashMap<H256, u32>>,
    polls_by_hash: Mutex<HashMap<H256, u32>>,
    receipt_polls: AtomicU32,
    code: Mutex<HashMap<Address, Bytes>>,
    call_result: Mutex<Bytes>,
}

impl FakeNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            listening: AtomicBool::new(true),
            listening_error: AtomicBool::new(false),
            listening_script: Mutex::new(VecDeque::new()),
            accounts: Mutex::new(vec![Address::repeat_byte(0xaa)]),
            network_id: AtomicU64::new(1337),
            transaction_count: AtomicU64::new(0),
            gas_estimate: AtomicU64::new(21_000),
            gas_price: AtomicU64::new(1_000_000_000),
            node_signature: Mutex::new(Bytes::from(vec![0xf8, 0x6b, 0x01])),
            send_script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            estimated: Mutex::new(Vec::new()),
            mined: Mutex::new(HashMap::new()),
            polls_by_hash: Mutex::new(HashMap::new()),
            receipt_polls: AtomicU32::new(0),
            code: Mutex::new(HashMap::new()),
            call_result: Mutex::new(Bytes::new()),
        })
    }

    pub fn set_listening(&self, listening: bool) {
        self.listening.store(listening, Ordering::SeqCst);
    }

    pub fn set_listening_error(&self, failing: bool) {
        self.listening_error.store(failing, Ordering::SeqCst);
    }

    /// Answers for the next probes, before falling back to `set_listening`
    pub fn script_listening(&self, answers: impl IntoIterator<Item = bool>) {
        self.listening_script.lock().unwrap().extend(answers);
    }

    pub fn set_transaction_count(&self, count: u64) {
        self.transaction_count.store(count, Ordering::SeqCst);
    }

    pub fn set_node_signature(&self, raw: Bytes) {
        *self.node_signature.lock().unwrap() = raw;
    }

    /// Outcomes for the next submissions; unscripted submissions are accepted
    pub fn script_sends(&self, outcomes: impl IntoIterator<Item = SendOutcome>) {
        self.send_script.lock().unwrap().extend(outcomes);
    }

    /// The receipt appears on the `polls`-th lookup of `tx_hash`
    pub fn mine_after(&self, tx_hash: H256, polls: u32) {
        self.mined.lock().unwrap().insert(tx_hash, polls);
    }

    pub fn set_code(&self, address: Address, code: Bytes) {
        self.code.lock().unwrap().insert(address, code);
    }

    pub fn set_call_result(&self, result: Bytes) {
        *self.call_result.lock().unwrap() = result;
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }

    /// Transactions passed to gas estimation, in order
    pub fn estimated(&self) -> Vec<TypedTransaction> {
        self.estimated.lock().unwrap().clone()
    }

    pub fn receipt_polls(&self) -> u32 {
        self.receipt_polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeRpc for FakeNode {
    async fn is_listening(&self) -> GatewayResult<bool> {
        if self.listening_error.load(Ordering::SeqCst) {
            return Err(GatewayError::Connection("connection refused".to_string()));
        }
        if let Some(answer) = self.listening_script.lock().unwrap().pop_front() {
            return Ok(answer);
        }
        Ok(self.listening.load(Ordering::SeqCst))
    }

    async fn network_id(&self) -> GatewayResult<u64> {
        Ok(self.network_id.load(Ordering::SeqCst))
    }

    async fn accounts(&self) -> GatewayResult<Vec<Address>> {
        Ok(self.accounts.lock().unwrap().clone())
    }

    async fn balance(&self, _address: Address) -> GatewayResult<U256> {
        Ok(U256::exp10(18))
    }

    async fn pending_transaction_count(&self, _address: Address) -> GatewayResult<U256> {
        Ok(U256::from(self.transaction_count.load(Ordering::SeqCst)))
    }

    async fn gas_price(&self) -> GatewayResult<U256> {
        Ok(U256::from(self.gas_price.load(Ordering::SeqCst)))
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> GatewayResult<U256> {
        self.estimated.lock().unwrap().push(tx.clone());
        Ok(U256::from(self.gas_estimate.load(Ordering::SeqCst)))
    }

    async fn sign_transaction(&self, _tx: &TypedTransaction) -> GatewayResult<Bytes> {
        Ok(self.node_signature.lock().unwrap().clone())
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> GatewayResult<H256> {
        self.sent.lock().unwrap().push(raw.clone());
        let outcome = self
            .send_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SendOutcome::Accept);

        match outcome {
            SendOutcome::Accept => Ok(H256::from(keccak256(&raw))),
            SendOutcome::Reject(message) => Err(GatewayError::from_submission(message)),
        }
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> GatewayResult<Option<TransactionReceipt>> {
        self.receipt_polls.fetch_add(1, Ordering::SeqCst);

        let polls = {
            let mut polls_by_hash = self.polls_by_hash.lock().unwrap();
            let polls = polls_by_hash.entry(tx_hash).or_insert(0);
            *polls += 1;
            *polls
        };

        match self.mined.lock().unwrap().get(&tx_hash) {
            Some(&after) if polls >= after => Ok(Some(TransactionReceipt {
                transaction_hash: tx_hash,
                block_number: Some(1u64.into()),
                status: Some(1u64.into()),
                ..TransactionReceipt::default()
            })),
            _ => Ok(None),
        }
    }

    async fn transaction(&self, tx_hash: H256) -> GatewayResult<Option<Transaction>> {
        Ok(Some(Transaction {
            hash: tx_hash,
            ..Transaction::default()
        }))
    }

    async fn code(&self, address: Address) -> GatewayResult<Bytes> {
        Ok(self
            .code
            .lock()
            .unwrap()
            .get(&address)
            .cloned()
            .unwrap_or_default())
    }

    async fn call(&self, _tx: &TypedTransaction) -> GatewayResult<Bytes> {
        Ok(self.call_result.lock().unwrap().clone())
    }
}

/// Hands out the same node on every connect
pub struct FakeConnector {
    node: Arc<dyn NodeRpc>,
    connects: AtomicU32,
    fail_next: AtomicU32,
}

impl FakeConnector {
    pub fn new(node: Arc<dyn NodeRpc>) -> Arc<Self> {
        Arc::new(Self {
            node,
            connects: AtomicU32::new(0),
            fail_next: AtomicU32::new(0),
        })
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn fail_next_connects(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> GatewayResult<Arc<dyn NodeRpc>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(GatewayError::Connection("connection refused".to_string()));
        }
        Ok(self.node.clone())
    }

    fn endpoint(&self) -> &str {
        "fake://node"
    }
}

/// Fully initialized manager signing with a local key
pub async fn manager_for(node: Arc<FakeNode>) -> TransactionManager {
    manager_with_key(node, Some(TEST_PRIVATE_KEY)).await
}

/// Fully initialized manager; `None` signs through the node's default account
pub async fn manager_with_key(node: Arc<FakeNode>, private_key: Option<&str>) -> TransactionManager {
    let connection = Arc::new(
        NodeConnection::open(FakeConnector::new(node), ReconnectPolicy::default()).await,
    );
    let account = Arc::new(
        AccountContext::resolve(&connection, private_key)
            .await
            .unwrap(),
    );
    let nonces = Arc::new(NonceSequencer::new());
    nonces
        .initialize(&connection, account.address())
        .await
        .unwrap();

    TransactionManager::new(
        connection,
        account,
        nonces,
        GasEstimator::default(),
        SubmissionPolicy::default(),
        ReceiptPolicy::default(),
    )
}
