//! Configuration management for the bridge relayer
//!
//! Loads configuration from TOML files with environment variable substitution.
//! Private keys never live in the file: chain sections name the environment
//! variable that holds the signing key.

use anyhow::{Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relayer: RelayerConfig,
    /// Absent means the in-memory store is used.
    pub database: Option<DatabaseConfig>,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub source: SourceChainConfig,
    pub destination: DestinationChainConfig,
    pub settlement: SettlementConfig,
    pub trigger: Option<TriggerConfig>,
    #[serde(default)]
    pub contracts: ContractsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    pub instance_id: String,
    #[serde(default)]
    pub dispatch: DispatchMode,
    pub health_check_interval_secs: u64,
}

/// How the head tracker hands delivered blocks to classification
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Every block is classified on its own task; no ordering between blocks.
    #[default]
    Unordered,
    /// Blocks are classified inline, in drain order.
    Ordered,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GasConfig {
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    #[serde(default = "default_gas_price_gwei")]
    pub gas_price_gwei: u64,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            gas_limit: default_gas_limit(),
            gas_price_gwei: default_gas_price_gwei(),
        }
    }
}

/// Chain being watched for bridge deposits and receiving releases
#[derive(Debug, Clone, Deserialize)]
pub struct SourceChainConfig {
    pub tag: String,
    pub chain_id: u64,
    pub rpc_urls: Vec<String>,
    pub ws_url: Option<String>,
    /// Transactions addressed here are relayed.
    pub bridge_address: Address,
    /// Contract-controlled account whose nonce signs release transactions.
    pub sign_account: Address,
    /// Receiver of released funds.
    pub release_recipient: Address,
    pub signer_key_env: Option<String>,
    #[serde(default)]
    pub gas: GasConfig,
    #[serde(default = "default_head_poll_interval_ms")]
    pub head_poll_interval_ms: u64,
    /// Subscribe to live heads. Disable to run on the trigger source only.
    #[serde(default = "default_true")]
    pub subscribe: bool,
}

/// Chain receiving cross-chain events and debit transactions
#[derive(Debug, Clone, Deserialize)]
pub struct DestinationChainConfig {
    pub tag: String,
    pub chain_id: u64,
    pub rpc_urls: Vec<String>,
    /// Account whose nonce keys assembled events.
    pub bridge_state_address: Address,
    /// Bridge-master contract holding the pending release amount.
    pub master_contract: Address,
    pub signer_key_env: Option<String>,
    #[serde(default)]
    pub gas: GasConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettlementConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    /// Submit a release for every queued event (flow a).
    #[serde(default)]
    pub release_on_event: bool,
    #[serde(default = "default_release_method")]
    pub release_method: String,
    #[serde(default = "default_pending_amount_method")]
    pub pending_amount_method: String,
    #[serde(default = "default_debit_method")]
    pub debit_method: String,
}

/// Synthetic block generation for dev and test runs
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerConfig {
    pub intervals_ms: Vec<u64>,
    #[serde(default)]
    pub repeat: bool,
    #[serde(default = "default_trigger_method")]
    pub method: String,
    pub value: u64,
    #[serde(default)]
    pub sender: Address,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContractsConfig {
    pub source_abi_path: Option<PathBuf>,
    pub master_abi_path: Option<PathBuf>,
}

fn default_gas_limit() -> u64 {
    200_000
}

fn default_gas_price_gwei() -> u64 {
    20
}

fn default_head_poll_interval_ms() -> u64 {
    2_000
}

fn default_true() -> bool {
    true
}

fn default_release_method() -> String {
    "release".to_string()
}

fn default_pending_amount_method() -> String {
    "getEthToSend".to_string()
}

fn default_debit_method() -> String {
    "removeEth".to_string()
}

fn default_trigger_method() -> String {
    "deposit".to_string()
}

impl Settings {
    /// Load settings from the configuration file
    pub fn load() -> Result<Self> {
        let config_path = env::var("RELAY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.source.rpc_urls.is_empty() {
            anyhow::bail!("Source chain {} has no RPC URLs configured", self.source.tag);
        }
        if self.destination.rpc_urls.is_empty() {
            anyhow::bail!(
                "Destination chain {} has no RPC URLs configured",
                self.destination.tag
            );
        }
        if self.source.bridge_address.is_zero() {
            anyhow::bail!("Source bridge address must be set");
        }
        if self.relayer.health_check_interval_secs == 0 {
            anyhow::bail!("relayer.health_check_interval_secs must be greater than zero");
        }
        if self.settlement.poll_interval_ms == 0 {
            anyhow::bail!("settlement.poll_interval_ms must be greater than zero");
        }
        if self.source.tag == self.destination.tag {
            anyhow::bail!("Source and destination chains need distinct tags");
        }

        if self.settlement.enabled {
            if self.source.signer_key_env.is_none() {
                anyhow::bail!("Settlement enabled but source.signer_key_env is not set");
            }
            if self.destination.signer_key_env.is_none() {
                anyhow::bail!("Settlement enabled but destination.signer_key_env is not set");
            }
        }

        if let Some(trigger) = &self.trigger {
            if trigger.repeat && trigger.intervals_ms.iter().all(|ms| *ms == 0) {
                anyhow::bail!("Repeating trigger needs at least one non-zero interval");
            }
        } else if !self.source.subscribe {
            tracing::warn!("Head subscription disabled and no trigger configured - no blocks will be relayed");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = match regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") {
        Ok(re) => re,
        Err(_) => return result,
    };

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
