//! Configuration management for the ledger gateway
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::chain::Transport;

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub node: NodeConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub receipts: ReceiptConfig,
    #[serde(default)]
    pub submission: SubmissionConfig,
    #[serde(default)]
    pub gas: GasConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub url: String,
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_interval_secs: u64,
    #[serde(default = "default_reconnect_secs")]
    pub reacquire_delay_secs: u64,
    /// Unbounded when absent
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WalletConfig {
    pub private_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub root_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiptConfig {
    pub max_tries: u32,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionConfig {
    pub max_conflict_retries: u32,
    pub health_check_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GasConfig {
    #[serde(default)]
    pub price_buffer_percent: u64,
    #[serde(default = "default_uplifts")]
    pub uplifts: Vec<GasUplift>,
}

/// Additive gas margin for a network known to under-estimate
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GasUplift {
    pub chain_id: u64,
    pub extra_gas: u64,
}

fn default_reconnect_secs() -> u64 {
    10
}

fn default_uplifts() -> Vec<GasUplift> {
    // Ropsten runs out of gas on estimated limits
    vec![GasUplift {
        chain_id: 3,
        extra_gas: 0xFFFFF,
    }]
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            root_path: String::new(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

impl Default for ReceiptConfig {
    fn default() -> Self {
        Self {
            max_tries: 10,
            interval_secs: 4,
        }
    }
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 5,
            health_check_interval_secs: 30,
        }
    }
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            price_buffer_percent: 0,
            uplifts: default_uplifts(),
        }
    }
}

impl NodeConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    pub fn reacquire_delay(&self) -> Duration {
        Duration::from_secs(self.reacquire_delay_secs)
    }
}

impl WalletConfig {
    /// Private key if one is configured; substituted-but-unset variables count as absent
    pub fn private_key(&self) -> Option<&str> {
        self.private_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

impl Settings {
    /// Load settings from the configuration file
    pub fn load() -> Result<Self> {
        let config_path = env::var("GATEWAY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse settings from TOML text, substituting environment variables first
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.node.url.trim().is_empty() {
            anyhow::bail!("Node URL is not configured");
        }

        Transport::from_url(&self.node.url)
            .map_err(|e| anyhow::anyhow!("Invalid node URL: {}", e))?;

        if self.receipts.max_tries == 0 {
            anyhow::bail!("receipts.max_tries must be at least 1");
        }

        if self.wallet.private_key().is_none() {
            tracing::warn!("No private key configured - the node's default account will sign");
        }

        Ok(())
    }
}

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
