//! Wormhole token bridge between Terra and Solana

use super::amount::{checked_total, parse_amount, parse_positive_amount, rescale};
use super::{
    ensure_covered, ensure_live, BridgeEstimate, ChainAdapter, CreditWatch, Estimate,
    EstimateDetail, ExecutionOutcome, ProgressSink, StepInput,
};
use crate::error::{BridgeError, BridgeResult};
use crate::registry::{ChainKind, NetworkRegistry, Route};
use crate::wallet::{Coin, Msg, TxOptions, WalletContexts};

use async_trait::async_trait;
use base64::Engine as _;
use ethers::types::U256;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WormholeDirection {
    ToSolana,
    ToTerra,
}

pub struct WormholeAdapter {
    direction: WormholeDirection,
    registry: Arc<NetworkRegistry>,
    watch: CreditWatch,
}

/// Wormhole addresses are 32 bytes, shorter ones are left-padded
pub(crate) fn wormhole_address(bytes: &[u8]) -> BridgeResult<[u8; 32]> {
    if bytes.is_empty() || bytes.len() > 32 {
        return Err(BridgeError::Execution(format!(
            "Address of {} bytes cannot be a Wormhole recipient",
            bytes.len()
        )));
    }
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(bytes);
    Ok(out)
}

/// Decode a base58 Solana public key
pub(crate) fn solana_pubkey(key: &str) -> BridgeResult<[u8; 32]> {
    let bytes = bs58::decode(key)
        .into_vec()
        .map_err(|e| BridgeError::Wallet(format!("Invalid Solana public key {}: {}", key, e)))?;
    bytes
        .try_into()
        .map_err(|_| BridgeError::Wallet(format!("Solana public key {} is not 32 bytes", key)))
}

impl WormholeAdapter {
    pub fn new(direction: WormholeDirection, registry: Arc<NetworkRegistry>, watch: CreditWatch) -> Self {
        Self {
            direction,
            registry,
            watch,
        }
    }

    fn chains(&self) -> (ChainKind, ChainKind) {
        match self.direction {
            WormholeDirection::ToSolana => (ChainKind::Terra, ChainKind::Solana),
            WormholeDirection::ToTerra => (ChainKind::Solana, ChainKind::Terra),
        }
    }

    fn route(&self) -> Route {
        match self.direction {
            WormholeDirection::ToSolana => Route::WormholeToSolana,
            WormholeDirection::ToTerra => Route::WormholeToTerra,
        }
    }

    /// Contract messages locking the coins in the token bridge and starting the transfer
    fn terra_transfer_msgs(&self, sender: &str, amount: U256, recipient: [u8; 32]) -> Vec<Msg> {
        let terra = &self.registry.terra;
        let coins = vec![Coin {
            denom: terra.stable_denom.clone(),
            amount: amount.to_string(),
        }];
        let nonce = (Uuid::new_v4().as_u128() & u32::MAX as u128) as u32;

        vec![
            Msg::ExecuteContract {
                sender: sender.to_string(),
                contract: terra.wormhole_token_bridge.clone(),
                execute_msg: json!({ "deposit_tokens": {} }),
                coins: coins.clone(),
            },
            Msg::ExecuteContract {
                sender: sender.to_string(),
                contract: terra.wormhole_token_bridge.clone(),
                execute_msg: json!({
                    "initiate_transfer": {
                        "asset": {
                            "amount": amount.to_string(),
                            "info": { "native_token": { "denom": terra.stable_denom } }
                        },
                        "recipient_chain": self.registry.solana.wormhole_chain_id,
                        "recipient": base64::engine::general_purpose::STANDARD.encode(recipient),
                        "fee": "0",
                        "nonce": nonce,
                    }
                }),
                coins: vec![],
            },
        ]
    }

    async fn terra_to_solana(
        &self,
        bridge: &BridgeEstimate,
        wallets: &WalletContexts,
        progress: &ProgressSink,
    ) -> BridgeResult<ExecutionOutcome> {
        let terra = wallets.terra()?;
        let solana = wallets.solana()?;

        let recipient = solana_pubkey(&solana.address)?;
        let snapshot = solana.wallet.stable_balance().await?;

        progress.report("Locking UST in the Wormhole token bridge").await;
        let result = terra
            .wallet
            .post(TxOptions {
                msgs: self.terra_transfer_msgs(&terra.address, bridge.amount, recipient),
                memo: None,
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

        progress.report("Waiting for the transfer to arrive on Solana").await;
        let received = self
            .watch
            .wait_for_credit(solana.wallet.as_ref(), snapshot, bridge.receive)
            .await?;

        Ok(ExecutionOutcome {
            tx_hashes: vec![tx_hash],
            received: Some(received),
        })
    }

    async fn solana_to_terra(
        &self,
        bridge: &BridgeEstimate,
        wallets: &WalletContexts,
        progress: &ProgressSink,
    ) -> BridgeResult<ExecutionOutcome> {
        let solana = wallets.solana()?;
        let terra = wallets.terra()?;

        let recipient = wormhole_address(&terra.wallet.address_bytes().await?)?;
        let snapshot = terra.wallet.stable_balance().await?;

        progress.report("Building the Wormhole transfer on Solana").await;
        let unsigned = solana
            .wallet
            .build_transfer(bridge.amount, self.registry.terra.wormhole_chain_id, recipient)
            .await?;
        let signed = solana.wallet.sign_transaction(unsigned).await?;
        let signature = solana.wallet.send_raw_transaction(&signed).await?;
        progress.report(format!("Sent {}", signature)).await;

        solana.wallet.confirm_transaction(&signature).await?;
        progress.report(format!("Confirmed {}", signature)).await;

        progress.report("Waiting for the transfer to arrive on Terra").await;
        let received = self
            .watch
            .wait_for_credit(terra.wallet.as_ref(), snapshot, bridge.receive)
            .await?;

        Ok(ExecutionOutcome {
            tx_hashes: vec![signature],
            received: Some(received),
        })
    }
}

#[async_trait]
impl ChainAdapter for WormholeAdapter {
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

        let (balance, network_fee) = match self.direction {
            WormholeDirection::ToSolana => {
                wallets.solana()?;
                let tx_fee = parse_amount(&self.registry.terra.tx_fee, source_decimals)?;
                (wallets.terra()?.wallet.stable_balance().await?, Some(tx_fee))
            }
            WormholeDirection::ToTerra => {
                wallets.terra()?;
                (wallets.solana()?.wallet.stable_balance().await?, None)
            }
        };
        ensure_live(cancel)?;
        ensure_covered(
            balance,
            checked_total(amount, network_fee.unwrap_or_default(), source_decimals)?,
            source_decimals,
        )?;

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
        info!("Wormhole transfer: {}", estimate.summary());

        let result = match self.direction {
            WormholeDirection::ToSolana => self.terra_to_solana(bridge, wallets, progress).await,
            WormholeDirection::ToTerra => self.solana_to_terra(bridge, wallets, progress).await,
        };

        if let Err(e) = &result {
            error!("Wormhole transfer failed: {}", e);
        }
        if let Ok(terra) = wallets.terra() {
            terra.refresh_balance().await;
        }
        if let Ok(solana) = wallets.solana() {
            solana.refresh_balance().await;
        }

        result
    }
}
