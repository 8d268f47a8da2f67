//! Solana wallet: JSON-RPC for chain access, signing extension for keys

use super::{SigningExtension, Wallet};
use crate::error::{BridgeError, BridgeResult};
use crate::registry::{ChainKind, NetworkType};

use async_trait::async_trait;
use base64::Engine as _;
use ethers::types::U256;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Genesis hash of Solana mainnet-beta
const MAINNET_GENESIS_HASH: &str = "5eykt4UsFv8P8NJdTREpY1vzqKqZKvdpKuc147dw2N9d";

/// Operations the bridge needs from the Solana wallet adapter
#[async_trait]
pub trait SolanaWallet: Wallet {
    /// Build an unsigned token-bridge transfer of the stablecoin
    async fn build_transfer(
        &self,
        amount: U256,
        recipient_chain: u16,
        recipient: [u8; 32],
    ) -> BridgeResult<Vec<u8>>;

    async fn sign_transaction(&self, tx: Vec<u8>) -> BridgeResult<Vec<u8>>;

    /// Broadcast a signed transaction, returning its signature
    async fn send_raw_transaction(&self, tx: &[u8]) -> BridgeResult<String>;

    /// Wait until the transaction is confirmed
    async fn confirm_transaction(&self, signature: &str) -> BridgeResult<()>;
}

pub struct RpcSolanaWallet {
    http: Client,
    rpc_url: String,
    public_key: String,
    stable_mint: String,
    selected: NetworkType,
    extension: Option<SigningExtension>,
    confirmation_timeout: Duration,
    request_id: AtomicU64,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    message: String,
}

#[derive(Serialize, Deserialize)]
struct EncodedTransaction {
    transaction: String,
}

#[derive(Serialize)]
struct TransferRequest {
    amount: String,
    mint: String,
    recipient_chain: u16,
    recipient: String,
}

impl RpcSolanaWallet {
    pub fn new(
        http: Client,
        rpc_url: &str,
        public_key: &str,
        stable_mint: &str,
        selected: NetworkType,
        extension: Option<SigningExtension>,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            http,
            rpc_url: rpc_url.to_string(),
            public_key: public_key.to_string(),
            stable_mint: stable_mint.to_string(),
            selected,
            extension,
            confirmation_timeout,
            request_id: AtomicU64::new(1),
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> BridgeResult<Value> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        debug!("Solana RPC {} (id {})", method, id);

        let response: RpcResponse = self
            .http
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(BridgeError::chain(
                ChainKind::Solana.to_string(),
                format!("{} failed: {}", method, error.message),
            ));
        }

        response.result.ok_or_else(|| {
            BridgeError::chain(
                ChainKind::Solana.to_string(),
                format!("{} returned no result", method),
            )
        })
    }

    fn extension(&self) -> BridgeResult<&SigningExtension> {
        self.extension.as_ref().ok_or_else(|| BridgeError::Connection {
            chain: ChainKind::Solana.to_string(),
            message: "No signing extension configured".to_string(),
        })
    }
}

/// Sum the raw token amounts of jsonParsed token accounts
fn sum_token_accounts(result: &Value) -> BridgeResult<U256> {
    let accounts = result
        .get("value")
        .and_then(Value::as_array)
        .ok_or_else(|| BridgeError::chain(ChainKind::Solana.to_string(), "malformed token accounts"))?;

    let mut total = U256::zero();
    for account in accounts {
        let amount = account
            .pointer("/account/data/parsed/info/tokenAmount/amount")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BridgeError::chain(ChainKind::Solana.to_string(), "token account without amount")
            })?;
        total += U256::from_dec_str(amount)
            .map_err(|e| BridgeError::chain(ChainKind::Solana.to_string(), e))?;
    }
    Ok(total)
}

#[async_trait]
impl Wallet for RpcSolanaWallet {
    fn chain(&self) -> ChainKind {
        ChainKind::Solana
    }

    fn address(&self) -> String {
        self.public_key.clone()
    }

    async fn network_type(&self) -> BridgeResult<NetworkType> {
        let hash = self.rpc("getGenesisHash", json!([])).await?;
        match hash.as_str() {
            Some(MAINNET_GENESIS_HASH) => Ok(NetworkType::Mainnet),
            Some(_) => Ok(NetworkType::Testnet),
            None => Ok(self.selected),
        }
    }

    async fn stable_balance(&self) -> BridgeResult<U256> {
        let result = self
            .rpc(
                "getTokenAccountsByOwner",
                json!([
                    self.public_key,
                    { "mint": self.stable_mint },
                    { "encoding": "jsonParsed" }
                ]),
            )
            .await?;
        sum_token_accounts(&result)
    }
}

#[async_trait]
impl SolanaWallet for RpcSolanaWallet {
    async fn build_transfer(
        &self,
        amount: U256,
        recipient_chain: u16,
        recipient: [u8; 32],
    ) -> BridgeResult<Vec<u8>> {
        let encoded: EncodedTransaction = self
            .extension()?
            .call(
                "/solana/transfer",
                &TransferRequest {
                    amount: amount.to_string(),
                    mint: self.stable_mint.clone(),
                    recipient_chain,
                    recipient: hex::encode(recipient),
                },
            )
            .await?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.transaction)
            .map_err(|e| BridgeError::Wallet(format!("Malformed transaction: {}", e)))
    }

    async fn sign_transaction(&self, tx: Vec<u8>) -> BridgeResult<Vec<u8>> {
        let signed: EncodedTransaction = self
            .extension()?
            .call(
                "/solana/sign",
                &EncodedTransaction {
                    transaction: base64::engine::general_purpose::STANDARD.encode(tx),
                },
            )
            .await?;
        base64::engine::general_purpose::STANDARD
            .decode(signed.transaction)
            .map_err(|e| BridgeError::Wallet(format!("Malformed signed transaction: {}", e)))
    }

    async fn send_raw_transaction(&self, tx: &[u8]) -> BridgeResult<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(tx);
        let signature = self
            .rpc("sendTransaction", json!([encoded, { "encoding": "base64" }]))
            .await
            .map_err(|e| BridgeError::Execution(e.to_string()))?;

        signature
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BridgeError::Execution("sendTransaction returned no signature".into()))
    }

    async fn confirm_transaction(&self, signature: &str) -> BridgeResult<()> {
        let poll = async {
            loop {
                match self
                    .rpc("getSignatureStatuses", json!([[signature]]))
                    .await
                {
                    Ok(result) => {
                        let status = result.pointer("/value/0").cloned().unwrap_or(Value::Null);
                        if !status.is_null() {
                            if let Some(err) = status.get("err").filter(|e| !e.is_null()) {
                                return Err(BridgeError::Execution(format!(
                                    "Transaction {} failed: {}",
                                    signature, err
                                )));
                            }
                            let level = status.get("confirmationStatus").and_then(Value::as_str);
                            if matches!(level, Some("confirmed") | Some("finalized")) {
                                return Ok(());
                            }
                        }
                    }
                    Err(e) => warn!("Signature status query failed: {}", e),
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        };

        tokio::time::timeout(self.confirmation_timeout, poll)
            .await
            .map_err(|_| BridgeError::Timeout {
                operation: format!("confirmation of {}", signature),
            })?
    }
}
