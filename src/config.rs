//! Configuration management for the swap submitter
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::types::SubmissionChannel;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub submitter: SubmitterConfig,
    pub database: Option<DatabaseConfig>,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub protection: ProtectionConfig,
    pub chains: HashMap<String, ChainConfig>,
    pub wallet: WalletConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitterConfig {
    pub instance_id: String,
    /// Fee bump applied to cancellations, in percent of the original fee
    #[serde(default = "default_cancellation_factor")]
    pub cancellation_gas_factor_percent: u64,
    /// Pending transactions without a receipt after this long become Unknown
    pub stale_transaction_timeout_secs: u64,
    /// How long finalized transactions stay queryable
    pub finalized_retention_secs: u64,
    pub sweep_interval_secs: u64,
    pub health_check_interval_secs: u64,
    #[serde(default)]
    pub json_logs: bool,
}

fn default_cancellation_factor() -> u64 {
    120
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

/// Private relay submission ("swap protection") switches
#[derive(Debug, Clone, Deserialize)]
pub struct ProtectionConfig {
    /// User-facing setting, can be toggled at runtime
    pub swap_protection: SwapProtectionSetting,
    /// Rollout gate for private relay submission
    pub private_relay_enabled: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SwapProtectionSetting {
    On,
    Off,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    /// RPC of a private relay that keeps transactions out of the public mempool
    pub private_rpc_url: Option<String>,
    pub gas_price_strategy: GasPriceStrategy,
    pub max_gas_price_gwei: u64,
    pub enabled: bool,
}

impl ChainConfig {
    pub fn supports(&self, channel: SubmissionChannel) -> bool {
        match channel {
            SubmissionChannel::Public => true,
            SubmissionChannel::Private => self.private_rpc_url.is_some(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Name of the environment variable holding the hex private key
    pub private_key_env: String,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("SUBMITTER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    fn parse(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        if self.submitter.cancellation_gas_factor_percent <= 100 {
            anyhow::bail!(
                "cancellation_gas_factor_percent must exceed 100, got {}",
                self.submitter.cancellation_gas_factor_percent
            );
        }

        if self.submitter.sweep_interval_secs == 0 {
            anyhow::bail!("sweep_interval_secs must be greater than zero");
        }
        if self.submitter.health_check_interval_secs == 0 {
            anyhow::bail!("health_check_interval_secs must be greater than zero");
        }

        for (name, chain) in &self.chains {
            if chain.enabled {
                if chain.rpc_urls.is_empty() {
                    anyhow::bail!("Chain {} has no RPC URLs configured", name);
                }
                if chain.private_rpc_url.is_none() {
                    tracing::debug!("Chain {} has no private relay - public submission only", name);
                }
            }
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Get chain config by chain ID
    pub fn get_chain_by_id(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.values().find(|c| c.chain_id == chain_id)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
    }

    ENV_VAR
        .replace_all(input, |cap: &regex::Captures| {
            env::var(&cap[1]).unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
        [submitter]
        instance_id = "submitter-1"
        stale_transaction_timeout_secs = 1800
        finalized_retention_secs = 86400
        sweep_interval_secs = 15
        health_check_interval_secs = 30

        [api]
        host = "127.0.0.1"
        port = 8080

        [metrics]
        enabled = false
        port = 9090

        [protection]
        swap_protection = "on"
        private_relay_enabled = true

        [chains.mainnet]
        chain_id = 1
        name = "Ethereum"
        rpc_urls = ["https://${SWAP_SUBMITTER_TEST_HOST}/rpc"]
        private_rpc_url = "https://relay.example.org"
        gas_price_strategy = "eip1559"
        max_gas_price_gwei = 500
        enabled = true

        [chains.polygon]
        chain_id = 137
        name = "Polygon"
        rpc_urls = []
        gas_price_strategy = "legacy"
        max_gas_price_gwei = 1000
        enabled = false

        [wallet]
        private_key_env = "SUBMITTER_PRIVATE_KEY"
    "#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn loads_settings_from_file() {
        env::set_var("SWAP_SUBMITTER_TEST_HOST", "node.example.org");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let settings = Settings::load_from(file.path()).unwrap();

        assert_eq!(settings.submitter.cancellation_gas_factor_percent, 120);
        assert!(settings.database.is_none());
        assert_eq!(settings.enabled_chains().len(), 1);

        let mainnet = settings.get_chain_by_id(1).unwrap();
        assert_eq!(mainnet.rpc_urls, vec!["https://node.example.org/rpc".to_string()]);
        assert_eq!(mainnet.gas_price_strategy, GasPriceStrategy::Eip1559);
        assert!(mainnet.supports(SubmissionChannel::Private));
        assert!(!settings
            .get_chain_by_id(137)
            .unwrap()
            .supports(SubmissionChannel::Private));
        assert_eq!(settings.protection.swap_protection, SwapProtectionSetting::On);
    }

    #[test]
    fn rejects_cancellation_factor_without_bump() {
        let config = SAMPLE.replace(
            "instance_id = \"submitter-1\"",
            "instance_id = \"submitter-1\"\ncancellation_gas_factor_percent = 100",
        );
        assert!(Settings::parse(&config).is_err());
    }

    #[test]
    fn rejects_zero_intervals() {
        let config = SAMPLE.replace("sweep_interval_secs = 15", "sweep_interval_secs = 0");
        let err = Settings::parse(&config).unwrap_err();
        assert!(err.to_string().contains("sweep_interval_secs"));

        let config = SAMPLE.replace(
            "health_check_interval_secs = 30",
            "health_check_interval_secs = 0",
        );
        let err = Settings::parse(&config).unwrap_err();
        assert!(err.to_string().contains("health_check_interval_secs"));
    }

    #[test]
    fn rejects_config_without_enabled_chains() {
        let config = SAMPLE.replace("enabled = true", "enabled = false");
        let err = Settings::parse(&config).unwrap_err();
        assert!(err.to_string().contains("At least one chain"));
    }
}
