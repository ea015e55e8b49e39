//! Request, signed transaction and policy types

use crate::error::{GatewayError, GatewayResult};

use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::to_checksum;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::time::Duration;

/// A transaction intent as submitted by a caller
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub data: Option<Bytes>,
    #[serde(default, deserialize_with = "de_opt_quantity")]
    pub value: Option<U256>,
    #[serde(default, alias = "gas", deserialize_with = "de_opt_quantity")]
    pub gas_limit: Option<U256>,
    #[serde(default, alias = "nonce", deserialize_with = "de_opt_quantity")]
    pub nonce_override: Option<U256>,
}

impl TransactionRequest {
    /// A request needs a destination, a payload, or both
    pub fn validate(&self) -> GatewayResult<()> {
        if self.to.is_none() && self.data.is_none() {
            return Err(GatewayError::Validation(
                "No TO address and no DATA specified".to_string(),
            ));
        }
        Ok(())
    }
}

/// Output of signing; consumed once by submission
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub raw: Bytes,
    pub hash: H256,
    pub nonce: U256,
}

/// Bounded, fixed-interval receipt polling
#[derive(Debug, Clone)]
pub struct ReceiptPolicy {
    pub max_tries: u32,
    pub interval: Duration,
}

impl Default for ReceiptPolicy {
    fn default() -> Self {
        Self {
            max_tries: 10,
            interval: Duration::from_secs(4),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmissionPolicy {
    /// Resubmissions allowed after nonce conflicts before giving up
    pub max_conflict_retries: u32,
}

impl Default for SubmissionPolicy {
    fn default() -> Self {
        Self {
            max_conflict_retries: 5,
        }
    }
}

/// Syntax check for an address. Mixed-case input must carry a valid checksum.
pub fn is_address(text: &str) -> bool {
    let text = text.trim();
    let Ok(address) = text.parse::<Address>() else {
        return false;
    };

    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
    if has_upper && has_lower {
        return to_checksum(&address, None)[2..] == *digits;
    }
    true
}

/// Parse a quantity given as decimal text or 0x-prefixed hex
pub fn parse_quantity(text: &str) -> Result<U256, String> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => U256::from_str_radix(hex, 16).map_err(|e| format!("{:?}", e)),
        None => U256::from_dec_str(text).map_err(|e| format!("{:?}", e)),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Quantity {
    Number(u64),
    Text(String),
}

fn de_opt_quantity<'de, D>(deserializer: D) -> Result<Option<U256>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Quantity>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Quantity::Number(n)) => Ok(Some(U256::from(n))),
        Some(Quantity::Text(text)) => parse_quantity(&text).map(Some).map_err(de::Error::custom),
    }
}
