//! Transaction lifecycle module with nonce sequencing and gas estimation

mod gas;
mod manager;
mod nonce;
mod types;

pub use gas::GasEstimator;
pub use manager::TransactionManager;
pub use nonce::NonceSequencer;
pub use types::{ReceiptPolicy, SubmissionPolicy, TransactionRequest};
