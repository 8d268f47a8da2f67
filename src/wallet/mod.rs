//! Wallet connections for every chain the bridge touches
//!
//! This module provides:
//! - Collaborator traits for the EVM wallet, the Cosmos wallet extension and
//!   the Solana wallet adapter
//! - Wallet providers that own the connection and the cached balance
//! - Read-only wallet context snapshots handed to every step call

pub mod cosmos;
pub mod evm;
pub mod extension;
pub mod solana;

pub use cosmos::{Coin, CosmosWallet, LcdWallet, Msg, PostResult, TxOptions};
pub use evm::{EthersWallet, EvmWallet};
pub use extension::SigningExtension;
pub use solana::{RpcSolanaWallet, SolanaWallet};

use crate::adapter::amount::display_amount;
use crate::error::{BridgeError, BridgeResult};
use crate::registry::{ChainKind, NetworkType};

use async_trait::async_trait;
use ethers::types::U256;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Capabilities shared by every wallet
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Chain the wallet signs for
    fn chain(&self) -> ChainKind;

    /// Connected account address in the chain's native encoding
    fn address(&self) -> String;

    /// Network the wallet is actually connected to
    async fn network_type(&self) -> BridgeResult<NetworkType>;

    /// Balance of the bridged stablecoin in base units
    async fn stable_balance(&self) -> BridgeResult<U256>;
}

/// Owns a wallet connection and its last known balance
pub struct WalletProvider<W: ?Sized> {
    wallet: Arc<W>,
    address: String,
    network_type: NetworkType,
    decimals: u8,
    balance: RwLock<Option<U256>>,
}

impl<W: Wallet + ?Sized> WalletProvider<W> {
    /// Connect a wallet, reporting (not rejecting) a network mismatch
    pub async fn connect(wallet: Arc<W>, selected: NetworkType, decimals: u8) -> Self {
        let chain = wallet.chain();
        let address = wallet.address();

        let network_type = match wallet.network_type().await {
            Ok(actual) => {
                if actual != selected {
                    let mismatch = BridgeError::NetworkMismatch {
                        chain: chain.to_string(),
                        expected: selected.to_string(),
                        actual: actual.to_string(),
                    };
                    warn!("{}", mismatch);
                    crate::metrics::record_network_mismatch(chain);
                }
                actual
            }
            Err(e) => {
                warn!("Could not determine network of {} wallet: {}", chain, e);
                selected
            }
        };

        let provider = Self {
            wallet,
            address,
            network_type,
            decimals,
            balance: RwLock::new(None),
        };

        if let Err(e) = provider.refresh_balance().await {
            warn!("Initial balance query failed for {}: {}", chain, e);
        }

        info!("{} wallet connected: {}", chain, provider.address);
        provider
    }

    /// Re-read the stablecoin balance from chain
    pub async fn refresh_balance(&self) -> BridgeResult<U256> {
        let balance = self.wallet.stable_balance().await?;
        *self.balance.write().await = Some(balance);
        debug!(
            "{} balance refreshed: {}",
            self.wallet.chain(),
            display_amount(balance, self.decimals)
        );
        Ok(balance)
    }

    pub fn chain(&self) -> ChainKind {
        self.wallet.chain()
    }

    /// Snapshot handed to a single step call
    pub async fn snapshot(self: &Arc<Self>) -> WalletContext<W> {
        WalletContext {
            address: self.address.clone(),
            balance: *self.balance.read().await,
            network_type: self.network_type,
            wallet: self.wallet.clone(),
            provider: self.clone(),
        }
    }

    pub async fn summary(&self) -> WalletSummary {
        WalletSummary {
            chain: self.wallet.chain(),
            address: self.address.clone(),
            network_type: self.network_type,
            balance: self
                .balance
                .read()
                .await
                .map(|b| display_amount(b, self.decimals)),
        }
    }
}

/// Read-only view of a wallet at the time a step call was made
pub struct WalletContext<W: ?Sized> {
    pub address: String,
    pub balance: Option<U256>,
    pub network_type: NetworkType,
    pub wallet: Arc<W>,
    provider: Arc<WalletProvider<W>>,
}

impl<W: ?Sized> Clone for WalletContext<W> {
    fn clone(&self) -> Self {
        Self {
            address: self.address.clone(),
            balance: self.balance,
            network_type: self.network_type,
            wallet: self.wallet.clone(),
            provider: self.provider.clone(),
        }
    }
}

impl<W: Wallet + ?Sized> WalletContext<W> {
    /// Best-effort balance refresh; failures are logged and swallowed
    pub async fn refresh_balance(&self) {
        if let Err(e) = self.provider.refresh_balance().await {
            warn!("Balance refresh failed for {}: {}", self.wallet.chain(), e);
            crate::metrics::record_refresh_failure(self.wallet.chain());
        }
    }
}

/// Wallet snapshots for all chains, injected into every step call
#[derive(Clone, Default)]
pub struct WalletContexts {
    pub evm: Option<WalletContext<dyn EvmWallet>>,
    pub terra: Option<WalletContext<dyn CosmosWallet>>,
    pub solana: Option<WalletContext<dyn SolanaWallet>>,
}

impl WalletContexts {
    pub fn evm(&self) -> BridgeResult<&WalletContext<dyn EvmWallet>> {
        self.evm.as_ref().ok_or_else(|| missing_signer(ChainKind::Ethereum))
    }

    pub fn terra(&self) -> BridgeResult<&WalletContext<dyn CosmosWallet>> {
        self.terra.as_ref().ok_or_else(|| missing_signer(ChainKind::Terra))
    }

    pub fn solana(&self) -> BridgeResult<&WalletContext<dyn SolanaWallet>> {
        self.solana.as_ref().ok_or_else(|| missing_signer(ChainKind::Solana))
    }
}

fn missing_signer(chain: ChainKind) -> BridgeError {
    BridgeError::Connection {
        chain: chain.to_string(),
        message: "missing signer: wallet not connected".to_string(),
    }
}

/// Owns the wallet providers of all chains
#[derive(Default)]
pub struct WalletHub {
    pub evm: Option<Arc<WalletProvider<dyn EvmWallet>>>,
    pub terra: Option<Arc<WalletProvider<dyn CosmosWallet>>>,
    pub solana: Option<Arc<WalletProvider<dyn SolanaWallet>>>,
}

impl WalletHub {
    /// Take a snapshot of every connected wallet
    pub async fn snapshot(&self) -> WalletContexts {
        let evm = match &self.evm {
            Some(p) => Some(p.snapshot().await),
            None => None,
        };
        let terra = match &self.terra {
            Some(p) => Some(p.snapshot().await),
            None => None,
        };
        let solana = match &self.solana {
            Some(p) => Some(p.snapshot().await),
            None => None,
        };

        WalletContexts { evm, terra, solana }
    }

    /// Refresh every connected wallet concurrently
    pub async fn refresh_all(&self) {
        let contexts = self.snapshot().await;
        futures::join!(
            async {
                if let Some(c) = &contexts.evm {
                    c.refresh_balance().await
                }
            },
            async {
                if let Some(c) = &contexts.terra {
                    c.refresh_balance().await
                }
            },
            async {
                if let Some(c) = &contexts.solana {
                    c.refresh_balance().await
                }
            },
        );
    }

    pub async fn summaries(&self) -> Vec<WalletSummary> {
        let mut out = Vec::new();
        if let Some(p) = &self.evm {
            out.push(p.summary().await);
        }
        if let Some(p) = &self.terra {
            out.push(p.summary().await);
        }
        if let Some(p) = &self.solana {
            out.push(p.summary().await);
        }
        out
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletSummary {
    pub chain: ChainKind,
    pub address: String,
    pub network_type: NetworkType,
    pub balance: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeWallet;

    #[tokio::test]
    async fn connect_reads_initial_balance() {
        let wallet = FakeWallet::terra("terra1abc", NetworkType::Mainnet);
        wallet.set_balance(U256::from(5_000_000u64));

        let provider = Arc::new(WalletProvider::connect(wallet, NetworkType::Mainnet, 6).await);
        let ctx = provider.snapshot().await;
        assert_eq!(ctx.balance, Some(U256::from(5_000_000u64)));
        assert_eq!(ctx.address, "terra1abc");
    }

    #[tokio::test]
    async fn network_mismatch_is_not_fatal() {
        let wallet = FakeWallet::terra("terra1abc", NetworkType::Testnet);
        let provider = Arc::new(WalletProvider::connect(wallet, NetworkType::Mainnet, 6).await);
        assert_eq!(provider.snapshot().await.network_type, NetworkType::Testnet);
    }

    #[tokio::test]
    async fn refresh_failures_are_swallowed() {
        let wallet = FakeWallet::terra("terra1abc", NetworkType::Mainnet);
        wallet.set_balance(U256::from(1u64));
        let provider = Arc::new(WalletProvider::connect(wallet.clone(), NetworkType::Mainnet, 6).await);
        let ctx = provider.snapshot().await;

        wallet.fail_balance_queries(true);
        ctx.refresh_balance().await;

        // cached value survives the failed refresh
        assert_eq!(provider.snapshot().await.balance, Some(U256::from(1u64)));
    }

    #[tokio::test]
    async fn missing_wallet_reports_missing_signer() {
        let contexts = WalletHub::default().snapshot().await;
        let err = contexts.evm().err().unwrap();
        assert!(err.to_string().contains("missing signer"));
    }
}
