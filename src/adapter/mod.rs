//! Chain adapters: estimate what a step would do, then do it
//!
//! Every adapter exposes the same two operations:
//! - `estimate` is cancellable and side-effect free; a cancelled call yields
//!   `StaleResultDiscarded` and must not be observed by anyone
//! - `execute` signs, broadcasts and waits for the effect, reporting progress,
//!   and refreshes the involved wallet balances whatever the outcome

pub mod amount;
pub mod balance;
pub mod deposit;
pub mod shuttle;
pub mod swap;
pub mod wormhole;

pub use balance::CreditWatch;
pub use deposit::AnchorDepositAdapter;
pub use shuttle::{ShuttleAdapter, ShuttleDirection};
pub use swap::{convert_tx_for_tx_arg, OneInchClient, SwapAdapter, SwapQuoter, TxArg};
pub use wormhole::{WormholeAdapter, WormholeDirection};

use crate::adapter::amount::display_amount;
use crate::config::{ExecutionConfig, SwapConfig};
use crate::error::{BridgeError, BridgeResult};
use crate::registry::{ChainKind, NetworkRegistry};
use crate::step::StepKind;
use crate::wallet::WalletContexts;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// User-entered parameters of a step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInput {
    pub amount: String,
    #[serde(default)]
    pub from_token: Option<String>,
    #[serde(default)]
    pub to_token: Option<String>,
}

impl StepInput {
    pub fn amount(amount: impl Into<String>) -> Self {
        Self {
            amount: amount.into(),
            ..Default::default()
        }
    }
}

/// Immutable description of what executing a step now would do
#[derive(Debug, Clone)]
pub struct Estimate {
    pub id: Uuid,
    /// Input amount the estimate was computed for
    pub amount_string: String,
    pub created_at: DateTime<Utc>,
    pub detail: EstimateDetail,
}

#[derive(Debug, Clone)]
pub enum EstimateDetail {
    Bridge(BridgeEstimate),
    Swap(SwapEstimate),
    Deposit(DepositEstimate),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeEstimate {
    pub source: ChainKind,
    pub destination: ChainKind,
    /// Amount leaving the source chain, source base units
    pub amount: U256,
    pub source_decimals: u8,
    /// Relay fee, source base units
    pub relay_fee: U256,
    /// Gas price on EVM sources, flat transaction fee on Terra sources
    pub network_fee: Option<U256>,
    /// Amount expected on the destination chain, destination base units
    pub receive: U256,
    pub destination_decimals: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwapEstimate {
    pub from_symbol: String,
    pub to_symbol: String,
    pub from_token: Address,
    pub to_token: Address,
    pub from_amount: U256,
    pub from_decimals: u8,
    pub to_amount: U256,
    pub to_decimals: u8,
    pub spender: Address,
    pub tx: TxArg,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepositEstimate {
    pub amount: U256,
    pub decimals: u8,
    pub network_fee: U256,
    pub exchange_rate: String,
    /// Share tokens expected in return, same decimals as the deposit
    pub expected_share: U256,
}

impl Estimate {
    pub fn new(amount_string: &str, detail: EstimateDetail) -> Self {
        Self {
            id: Uuid::new_v4(),
            amount_string: amount_string.to_string(),
            created_at: Utc::now(),
            detail,
        }
    }

    pub fn bridge(&self) -> BridgeResult<&BridgeEstimate> {
        match &self.detail {
            EstimateDetail::Bridge(b) => Ok(b),
            _ => Err(BridgeError::Internal("expected a bridge estimate".into())),
        }
    }

    pub fn swap(&self) -> BridgeResult<&SwapEstimate> {
        match &self.detail {
            EstimateDetail::Swap(s) => Ok(s),
            _ => Err(BridgeError::Internal("expected a swap estimate".into())),
        }
    }

    pub fn deposit(&self) -> BridgeResult<&DepositEstimate> {
        match &self.detail {
            EstimateDetail::Deposit(d) => Ok(d),
            _ => Err(BridgeError::Internal("expected a deposit estimate".into())),
        }
    }

    /// One-line description for status displays
    pub fn summary(&self) -> String {
        match &self.detail {
            EstimateDetail::Bridge(b) => format!(
                "Send {} from {}, relay fee {}, receive {} on {}",
                display_amount(b.amount, b.source_decimals),
                b.source,
                display_amount(b.relay_fee, b.source_decimals),
                display_amount(b.receive, b.destination_decimals),
                b.destination
            ),
            EstimateDetail::Swap(s) => format!(
                "Swap {} {} for {} {}",
                display_amount(s.from_amount, s.from_decimals),
                s.from_symbol,
                display_amount(s.to_amount, s.to_decimals),
                s.to_symbol
            ),
            EstimateDetail::Deposit(d) => format!(
                "Deposit {} (fee {}), receive {} shares at rate {}",
                display_amount(d.amount, d.decimals),
                display_amount(d.network_fee, d.decimals),
                display_amount(d.expected_share, d.decimals),
                d.exchange_rate
            ),
        }
    }
}

/// What an execution did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutcome {
    pub tx_hashes: Vec<String>,
    /// Amount credited on the destination, when one was observed
    pub received: Option<U256>,
}

/// Collects progress text of one execution
#[derive(Clone)]
pub struct ProgressSink {
    step_id: u64,
    log: Arc<Mutex<Vec<String>>>,
}

impl ProgressSink {
    pub fn new(step_id: u64, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self { step_id, log }
    }

    #[cfg(test)]
    pub fn detached(step_id: u64) -> Self {
        Self::new(step_id, Arc::new(Mutex::new(Vec::new())))
    }

    pub async fn report(&self, text: impl Into<String>) {
        let text = text.into();
        info!(step_id = self.step_id, "{}", text);
        self.log.lock().await.push(text);
    }
}

/// Estimate/execute capability of one step kind
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    async fn estimate(
        &self,
        input: &StepInput,
        wallets: &WalletContexts,
        cancel: &CancellationToken,
    ) -> BridgeResult<Estimate>;

    async fn execute(
        &self,
        estimate: &Estimate,
        wallets: &WalletContexts,
        progress: &ProgressSink,
    ) -> BridgeResult<ExecutionOutcome>;
}

/// Resolves a step kind to its adapter once, when the step is created
pub trait AdapterResolver: Send + Sync {
    fn adapter_for(&self, kind: StepKind) -> Arc<dyn ChainAdapter>;
}

/// Bail out if the caller lost interest while we were suspended
pub(crate) fn ensure_live(cancel: &CancellationToken) -> BridgeResult<()> {
    if cancel.is_cancelled() {
        Err(BridgeError::StaleResultDiscarded)
    } else {
        Ok(())
    }
}

/// Fail estimation when the wallet cannot cover `needed`
pub(crate) fn ensure_covered(balance: U256, needed: U256, decimals: u8) -> BridgeResult<()> {
    if balance < needed {
        return Err(BridgeError::InsufficientBalance {
            have: display_amount(balance, decimals),
            need: display_amount(needed, decimals),
        });
    }
    Ok(())
}

/// Adapters for every step kind of the catalog
pub struct AdapterSet {
    shuttle_to_terra: Arc<dyn ChainAdapter>,
    shuttle_to_evm: Arc<dyn ChainAdapter>,
    wormhole_to_solana: Arc<dyn ChainAdapter>,
    wormhole_to_terra: Arc<dyn ChainAdapter>,
    swap: Arc<dyn ChainAdapter>,
    deposit: Arc<dyn ChainAdapter>,
}

impl AdapterSet {
    pub fn new(
        registry: Arc<NetworkRegistry>,
        execution: &ExecutionConfig,
        swap: &SwapConfig,
        quoter: Arc<dyn SwapQuoter>,
    ) -> Self {
        let watch = CreditWatch::from_config(execution);

        Self {
            shuttle_to_terra: Arc::new(ShuttleAdapter::new(
                ShuttleDirection::ToTerra,
                registry.clone(),
                watch.clone(),
            )),
            shuttle_to_evm: Arc::new(ShuttleAdapter::new(
                ShuttleDirection::ToEthereum,
                registry.clone(),
                watch.clone(),
            )),
            wormhole_to_solana: Arc::new(WormholeAdapter::new(
                WormholeDirection::ToSolana,
                registry.clone(),
                watch.clone(),
            )),
            wormhole_to_terra: Arc::new(WormholeAdapter::new(
                WormholeDirection::ToTerra,
                registry.clone(),
                watch,
            )),
            swap: Arc::new(SwapAdapter::new(quoter, registry.clone(), swap.slippage)),
            deposit: Arc::new(AnchorDepositAdapter::new(registry)),
        }
    }
}

impl AdapterResolver for AdapterSet {
    fn adapter_for(&self, kind: StepKind) -> Arc<dyn ChainAdapter> {
        match kind {
            StepKind::EthereumToTerra => self.shuttle_to_terra.clone(),
            StepKind::TerraToEthereum => self.shuttle_to_evm.clone(),
            StepKind::TerraToSolana => self.wormhole_to_solana.clone(),
            StepKind::SolanaToTerra => self.wormhole_to_terra.clone(),
            StepKind::SwapOnEthereum => self.swap.clone(),
            StepKind::DepositToAnchor => self.deposit.clone(),
        }
    }
}
