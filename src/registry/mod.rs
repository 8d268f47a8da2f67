//! Static network tables: endpoints, contract addresses and token metadata
//!
//! Tables are keyed by network type and loaded once from configuration.

use crate::adapter::amount::{apply_bps, parse_amount};
use crate::error::{BridgeError, BridgeResult};

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Network family a wallet or registry table belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Testnet,
    Mainnet,
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkType::Testnet => write!(f, "testnet"),
            NetworkType::Mainnet => write!(f, "mainnet"),
        }
    }
}

/// Chains the bridge moves funds between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    Ethereum,
    Terra,
    Solana,
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainKind::Ethereum => write!(f, "Ethereum"),
            ChainKind::Terra => write!(f, "Terra"),
            ChainKind::Solana => write!(f, "Solana"),
        }
    }
}

/// Bridge routes with their own fee schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    ShuttleToTerra,
    ShuttleToEvm,
    WormholeToSolana,
    WormholeToTerra,
}

impl Route {
    pub fn key(&self) -> &'static str {
        match self {
            Route::ShuttleToTerra => "shuttle_to_terra",
            Route::ShuttleToEvm => "shuttle_to_evm",
            Route::WormholeToSolana => "wormhole_to_solana",
            Route::WormholeToTerra => "wormhole_to_terra",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkRegistry {
    pub evm: EvmRegistry,
    pub terra: TerraRegistry,
    pub solana: SolanaRegistry,
    #[serde(default)]
    pub routes: HashMap<String, FeeSchedule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvmRegistry {
    pub chain_id: u64,
    pub rpc_url: String,
    /// Symbol of the bridged stablecoin in `tokens`
    pub stable_symbol: String,
    #[serde(default)]
    pub tokens: HashMap<String, TokenInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenInfo {
    pub address: String,
    pub decimals: u8,
}

impl TokenInfo {
    pub fn evm_address(&self) -> BridgeResult<Address> {
        Address::from_str(&self.address)
            .map_err(|e| BridgeError::Config(format!("Invalid token address {}: {}", self.address, e)))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerraRegistry {
    pub chain_id: String,
    pub lcd_url: String,
    pub stable_denom: String,
    pub decimals: u8,
    pub shuttle_address: String,
    pub wormhole_token_bridge: String,
    pub anchor_market: String,
    /// Flat network fee charged on Terra transactions, in whole stablecoin units
    pub tx_fee: String,
    /// Wormhole chain id of Terra
    pub wormhole_chain_id: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SolanaRegistry {
    pub rpc_url: String,
    pub stable_mint: String,
    pub decimals: u8,
    /// Wormhole chain id of Solana
    pub wormhole_chain_id: u16,
}

/// Relay fee charged by a bridge route
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FeeSchedule {
    pub fee_bps: u32,
    /// Minimum fee in whole stablecoin units
    pub min_fee: String,
}

impl FeeSchedule {
    /// `max(min_fee, amount * fee_bps / 10000)` in the amount's base units
    pub fn relay_fee(&self, amount: U256, decimals: u8) -> BridgeResult<U256> {
        let proportional = apply_bps(amount, self.fee_bps);
        let minimum = parse_amount(&self.min_fee, decimals)?;
        Ok(std::cmp::max(proportional, minimum))
    }
}

impl NetworkRegistry {
    /// Look up an EVM token by symbol
    pub fn evm_token(&self, symbol: &str) -> BridgeResult<&TokenInfo> {
        self.evm
            .tokens
            .get(symbol)
            .ok_or_else(|| BridgeError::not_found(format!("EVM token {}", symbol)))
    }

    /// The bridged stablecoin on the EVM chain
    pub fn evm_stable(&self) -> BridgeResult<&TokenInfo> {
        self.evm_token(&self.evm.stable_symbol)
    }

    /// Fee schedule of a route, free when not configured
    pub fn fee_schedule(&self, route: Route) -> FeeSchedule {
        self.routes.get(route.key()).cloned().unwrap_or(FeeSchedule {
            fee_bps: 0,
            min_fee: "0".to_string(),
        })
    }

    /// Decimals of the stablecoin on a chain
    pub fn stable_decimals(&self, chain: ChainKind) -> BridgeResult<u8> {
        match chain {
            ChainKind::Ethereum => Ok(self.evm_stable()?.decimals),
            ChainKind::Terra => Ok(self.terra.decimals),
            ChainKind::Solana => Ok(self.solana.decimals),
        }
    }
}
