//! Configuration management for the bridge
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::registry::{NetworkRegistry, NetworkType};

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub network: NetworkConfig,
    #[serde(default)]
    pub sequencer: SequencerConfig,
    pub execution: ExecutionConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub wallets: WalletsConfig,
    pub swap: SwapConfig,
    pub registry: HashMap<NetworkType, NetworkRegistry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Network every wallet is expected to be connected to
    pub network_type: NetworkType,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SequencerConfig {
    /// Stop the run when a step reports `Failed` instead of advancing
    #[serde(default)]
    pub halt_on_failure: bool,
    #[serde(default)]
    pub auto_execute: bool,
    #[serde(default)]
    pub initial_steps: Vec<InitialStep>,
}

/// A step preloaded at start-up
#[derive(Debug, Clone, Deserialize)]
pub struct InitialStep {
    pub title: String,
    pub amount: Option<String>,
    pub from_token: Option<String>,
    pub to_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    pub balance_wait_timeout_secs: u64,
    pub balance_poll_interval_ms: u64,
    /// Share of the expected credit that may be missing, in basis points
    pub credit_tolerance_bps: u32,
    pub confirmation_timeout_secs: u64,
}

impl ExecutionConfig {
    pub fn balance_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.balance_wait_timeout_secs)
    }

    pub fn balance_poll_interval(&self) -> Duration {
        Duration::from_millis(self.balance_poll_interval_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
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

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WalletsConfig {
    pub evm: Option<EvmWalletConfig>,
    pub terra: Option<TerraWalletConfig>,
    pub solana: Option<SolanaWalletConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvmWalletConfig {
    /// Name of the environment variable holding the signing key
    pub private_key_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerraWalletConfig {
    pub address: String,
    /// Signing extension endpoint used to post transactions
    pub extension_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SolanaWalletConfig {
    pub public_key: String,
    /// Signing extension endpoint used to build and sign transactions
    pub extension_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwapConfig {
    pub base_url: String,
    /// Slippage tolerance in percent
    pub slippage: f64,
}

impl Settings {
    /// Load settings from the configuration file
    pub fn load() -> Result<Self> {
        let config_path = env::var("BRIDGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    /// Parse settings from TOML text
    pub fn parse(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        let registry = self.registry.get(&self.network.network_type).with_context(|| {
            format!(
                "No registry table for selected network {}",
                self.network.network_type
            )
        })?;

        for (route, schedule) in registry.routes.iter() {
            if schedule.fee_bps > 10_000 {
                anyhow::bail!("Route {} has a fee above 100%", route);
            }
        }

        if self.execution.balance_poll_interval_ms == 0 {
            anyhow::bail!("execution.balance_poll_interval_ms must be positive");
        }
        if self.execution.credit_tolerance_bps > 10_000 {
            anyhow::bail!("execution.credit_tolerance_bps must not exceed 10000");
        }
        if !(0.0..=50.0).contains(&self.swap.slippage) {
            anyhow::bail!("swap.slippage must be between 0 and 50 percent");
        }

        if registry.terra.shuttle_address.is_empty() {
            tracing::warn!("No shuttle address for {} - Terra → Ethereum will fail", self.network.network_type);
        }
        if !registry.evm.tokens.contains_key(&registry.evm.stable_symbol) {
            anyhow::bail!(
                "EVM stable token {} is not listed in registry.{}.evm.tokens",
                registry.evm.stable_symbol,
                self.network.network_type
            );
        }

        Ok(())
    }

    /// Registry table for the selected network
    pub fn active_registry(&self) -> &NetworkRegistry {
        // presence checked in validate
        &self.registry[&self.network.network_type]
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
