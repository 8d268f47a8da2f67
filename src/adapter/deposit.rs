//! Stablecoin deposits into the Anchor money market on Terra

use super::amount::{checked_total, parse_amount, parse_positive_amount};
use super::{
    ensure_covered, ensure_live, ChainAdapter, DepositEstimate, Estimate, EstimateDetail,
    ExecutionOutcome, ProgressSink, StepInput,
};
use crate::error::{BridgeError, BridgeResult};
use crate::registry::NetworkRegistry;
use crate::wallet::{Coin, Msg, TxOptions, WalletContexts};

use async_trait::async_trait;
use ethers::types::U256;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Precision of the exchange rate reported by the market contract
const RATE_DECIMALS: u8 = 18;

#[derive(Debug, Deserialize)]
struct EpochState {
    exchange_rate: String,
}

pub struct AnchorDepositAdapter {
    registry: Arc<NetworkRegistry>,
}

/// Parse a decimal rate into 18-decimal fixed point, dropping excess digits
fn parse_rate(rate: &str) -> BridgeResult<U256> {
    let truncated = match rate.split_once('.') {
        Some((whole, frac)) if frac.len() > RATE_DECIMALS as usize => {
            format!("{}.{}", whole, &frac[..RATE_DECIMALS as usize])
        }
        _ => rate.to_string(),
    };
    let parsed = parse_amount(&truncated, RATE_DECIMALS)
        .map_err(|_| BridgeError::Estimation(format!("Invalid exchange rate {}", rate)))?;
    if parsed.is_zero() {
        return Err(BridgeError::Estimation("Exchange rate is zero".to_string()));
    }
    Ok(parsed)
}

impl AnchorDepositAdapter {
    pub fn new(registry: Arc<NetworkRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ChainAdapter for AnchorDepositAdapter {
    async fn estimate(
        &self,
        input: &StepInput,
        wallets: &WalletContexts,
        cancel: &CancellationToken,
    ) -> BridgeResult<Estimate> {
        let terra = wallets.terra()?;
        let decimals = self.registry.terra.decimals;
        let amount = parse_positive_amount(&input.amount, decimals)?;
        let network_fee = parse_amount(&self.registry.terra.tx_fee, decimals)?;

        let balance = terra.wallet.stable_balance().await?;
        ensure_live(cancel)?;
        ensure_covered(balance, checked_total(amount, network_fee, decimals)?, decimals)?;

        let state = terra
            .wallet
            .query_contract(&self.registry.terra.anchor_market, &json!({ "epoch_state": {} }))
            .await?;
        ensure_live(cancel)?;

        let state: EpochState = serde_json::from_value(state).map_err(|e| {
            BridgeError::chain("Terra", format!("Unexpected epoch state: {}", e))
        })?;
        let rate = parse_rate(&state.exchange_rate)?;
        let expected_share = amount
            .checked_mul(U256::exp10(RATE_DECIMALS as usize))
            .and_then(|scaled| scaled.checked_div(rate))
            .ok_or_else(|| {
                BridgeError::Estimation(format!("Cannot price {} at rate {}", input.amount, state.exchange_rate))
            })?;

        Ok(Estimate::new(
            &input.amount,
            EstimateDetail::Deposit(DepositEstimate {
                amount,
                decimals,
                network_fee,
                exchange_rate: state.exchange_rate,
                expected_share,
            }),
        ))
    }

    async fn execute(
        &self,
        estimate: &Estimate,
        wallets: &WalletContexts,
        progress: &ProgressSink,
    ) -> BridgeResult<ExecutionOutcome> {
        let deposit = estimate.deposit()?;
        let terra = wallets.terra()?;
        info!("Anchor deposit: {}", estimate.summary());

        progress.report("Depositing UST into Anchor").await;
        let result = terra
            .wallet
            .post(TxOptions {
                msgs: vec![Msg::ExecuteContract {
                    sender: terra.address.clone(),
                    contract: self.registry.terra.anchor_market.clone(),
                    execute_msg: json!({ "deposit_stable": {} }),
                    coins: vec![Coin {
                        denom: self.registry.terra.stable_denom.clone(),
                        amount: deposit.amount.to_string(),
                    }],
                }],
                memo: None,
            })
            .await;

        let outcome = match result {
            Ok(posted) if posted.success => {
                let tx_hash = posted.txhash.unwrap_or_else(|| posted.id.to_string());
                progress.report(format!("Deposited in {}", tx_hash)).await;
                Ok(ExecutionOutcome {
                    tx_hashes: vec![tx_hash],
                    received: Some(deposit.expected_share),
                })
            }
            Ok(posted) => Err(BridgeError::Execution(
                posted
                    .error
                    .unwrap_or_else(|| format!("Terra transaction {} was not posted", posted.id)),
            )),
            Err(e) => Err(e),
        };

        if let Err(e) = &outcome {
            error!("Anchor deposit failed: {}", e);
        }
        terra.refresh_balance().await;
        outcome
    }
}
