//! Shuttle bridge between Ethereum and Terra
//!
//! Ethereum → Terra burns the wrapped stablecoin with the Terra account as a
//! bytes32 recipient. Terra → Ethereum sends native coins to the shuttle
//! address with the EVM address as memo.

use super::amount::{checked_total, parse_amount, parse_positive_amount, rescale};
use super::{
    ensure_covered, ensure_live, BridgeEstimate, ChainAdapter, CreditWatch, Estimate,
    EstimateDetail, ExecutionOutcome, ProgressSink, StepInput,
};
use crate::error::{BridgeError, BridgeResult};
use crate::registry::{ChainKind, NetworkRegistry, Route};
use crate::wallet::{Coin, Msg, TxOptions, WalletContexts};

use async_trait::async_trait;
use ethers::types::U256;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShuttleDirection {
    ToTerra,
    ToEthereum,
}

pub struct ShuttleAdapter {
    direction: ShuttleDirection,
    registry: Arc<NetworkRegistry>,
    watch: CreditWatch,
}

/// Terra account bytes as the bytes32 `to` argument of the burn, right-padded
pub(crate) fn shuttle_recipient(address_bytes: &[u8]) -> BridgeResult<[u8; 32]> {
    if address_bytes.is_empty() || address_bytes.len() > 32 {
        return Err(BridgeError::Execution(format!(
            "Unexpected Terra address length {}",
            address_bytes.len()
        )));
    }
    let mut recipient = [0u8; 32];
    recipient[..address_bytes.len()].copy_from_slice(address_bytes);
    Ok(recipient)
}

impl ShuttleAdapter {
    pub fn new(direction: ShuttleDirection, registry: Arc<NetworkRegistry>, watch: CreditWatch) -> Self {
        Self {
            direction,
            registry,
            watch,
        }
    }

    fn route(&self) -> Route {
        match self.direction {
            ShuttleDirection::ToTerra => Route::ShuttleToTerra,
            ShuttleDirection::ToEthereum => Route::ShuttleToEvm,
        }
    }

    fn chains(&self) -> (ChainKind, ChainKind) {
        match self.direction {
            ShuttleDirection::ToTerra => (ChainKind::Ethereum, ChainKind::Terra),
            ShuttleDirection::ToEthereum => (ChainKind::Terra, ChainKind::Ethereum),
        }
    }

    async fn estimate_from_ethereum(
        &self,
        amount: U256,
        wallets: &WalletContexts,
        cancel: &CancellationToken,
    ) -> BridgeResult<(U256, Option<U256>)> {
        let evm = wallets.evm()?;
        wallets.terra()?;
        let decimals = self.registry.stable_decimals(ChainKind::Ethereum)?;

        let balance = evm.wallet.stable_balance().await?;
        ensure_live(cancel)?;
        ensure_covered(balance, amount, decimals)?;

        let gas_price = evm.wallet.gas_price().await?;
        ensure_live(cancel)?;
        Ok((amount, Some(gas_price)))
    }

    async fn estimate_from_terra(
        &self,
        amount: U256,
        wallets: &WalletContexts,
        cancel: &CancellationToken,
    ) -> BridgeResult<(U256, Option<U256>)> {
        let terra = wallets.terra()?;
        wallets.evm()?;
        let decimals = self.registry.terra.decimals;
        let tx_fee = parse_amount(&self.registry.terra.tx_fee, decimals)?;

        let balance = terra.wallet.stable_balance().await?;
        ensure_live(cancel)?;
        ensure_covered(balance, checked_total(amount, tx_fee, decimals)?, decimals)?;
        Ok((amount, Some(tx_fee)))
    }

    async fn burn_to_terra(
        &self,
        bridge: &BridgeEstimate,
        wallets: &WalletContexts,
        progress: &ProgressSink,
    ) -> BridgeResult<ExecutionOutcome> {
        let evm = wallets.evm()?;
        let terra = wallets.terra()?;

        let recipient = shuttle_recipient(&terra.wallet.address_bytes().await?)?;
        let snapshot = terra.wallet.stable_balance().await?;

        progress.report("Burning wrapped UST on Ethereum").await;
        let tx_hash = evm.wallet.burn(bridge.amount, recipient).await?;
        progress
            .report(format!("Burn included in {:?}", tx_hash))
            .await;

        progress.report("Waiting for the shuttle to credit Terra").await;
        let received = self
            .watch
            .wait_for_credit(terra.wallet.as_ref(), snapshot, bridge.receive)
            .await?;

        Ok(ExecutionOutcome {
            tx_hashes: vec![format!("{:?}", tx_hash)],
            received: Some(received),
        })
    }

    async fn send_to_ethereum(
        &self,
        bridge: &BridgeEstimate,
        wallets: &WalletContexts,
        progress: &ProgressSink,
    ) -> BridgeResult<ExecutionOutcome> {
        let terra = wallets.terra()?;
        let evm = wallets.evm()?;

        let snapshot = evm.wallet.stable_balance().await?;

        progress.report("Sending UST to the shuttle on Terra").await;
        let result = terra
            .wallet
            .post(TxOptions {
                msgs: vec![Msg::Send {
                    from_address: terra.address.clone(),
                    to_address: self.registry.terra.shuttle_address.clone(),
                    amount: vec![Coin {
                        denom: self.registry.terra.stable_denom.clone(),
                        amount: bridge.amount.to_string(),
                    }],
                }],
                memo: Some(evm.address.clone()),
            })
            .await?;

        if !result.success {
            return Err(BridgeError::Execution(
                result
                    .error
                    .unwrap_or_else(|| format!("Terra transaction {} was not posted", result.id)),
            ));
        }
        let tx_hash = result.txhash.unwrap_or_else(|| result.id.to_string());
        progress.report(format!("Posted {}", tx_hash)).await;

        progress.report("Waiting for the shuttle to credit Ethereum").await;
        let received = self
            .watch
            .wait_for_credit(evm.wallet.as_ref(), snapshot, bridge.receive)
            .await?;

        Ok(ExecutionOutcome {
            tx_hashes: vec![tx_hash],
            received: Some(received),
        })
    }
}

#[async_trait]
impl ChainAdapter for ShuttleAdapter {
    async fn estimate(
        &self,
        input: &StepInput,
        wallets: &WalletContexts,
        cancel: &CancellationToken,
    ) -> BridgeResult<Estimate> {
        let (source, destination) = self.chains();
        let source_decimals = self.registry.stable_decimals(source)?;
        let destination_decimals = self.registry.stable_decimals(destination)?;
        let amount = parse_positive_amount(&input.amount, source_decimals)?;

        let (amount, network_fee) = match self.direction {
            ShuttleDirection::ToTerra => self.estimate_from_ethereum(amount, wallets, cancel).await?,
            ShuttleDirection::ToEthereum => self.estimate_from_terra(amount, wallets, cancel).await?,
        };

        let relay_fee = self
            .registry
            .fee_schedule(self.route())
            .relay_fee(amount, source_decimals)?;
        if relay_fee >= amount {
            return Err(BridgeError::Estimation(
                "Amount does not cover the relay fee".to_string(),
            ));
        }
        let receive = rescale(amount - relay_fee, source_decimals, destination_decimals)?;
        if receive.is_zero() {
            return Err(BridgeError::Estimation("Nothing left to receive".to_string()));
        }

        ensure_live(cancel)?;
        Ok(Estimate::new(
            &input.amount,
            EstimateDetail::Bridge(BridgeEstimate {
                source,
                destination,
                amount,
                source_decimals,
                relay_fee,
                network_fee,
                receive,
                destination_decimals,
            }),
        ))
    }

    async fn execute(
        &self,
        estimate: &Estimate,
        wallets: &WalletContexts,
        progress: &ProgressSink,
    ) -> BridgeResult<ExecutionOutcome> {
        let bridge = estimate.bridge()?;
        info!("Shuttle transfer: {}", estimate.summary());

        let result = match self.direction {
            ShuttleDirection::ToTerra => self.burn_to_terra(bridge, wallets, progress).await,
            ShuttleDirection::ToEthereum => self.send_to_ethereum(bridge, wallets, progress).await,
        };

        if let Err(e) = &result {
            error!("Shuttle transfer failed: {}", e);
        }
        if let Ok(evm) = wallets.evm() {
            evm.refresh_balance().await;
        }
        if let Ok(terra) = wallets.terra() {
            terra.refresh_balance().await;
        }

        result
    }
}
