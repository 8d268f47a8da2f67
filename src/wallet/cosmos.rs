//! Cosmos-style (Terra) wallet: LCD REST reads plus an external signing extension

use super::{SigningExtension, Wallet};
use crate::error::{BridgeError, BridgeResult};
use crate::registry::{ChainKind, NetworkType};

use async_trait::async_trait;
use base64::Engine as _;
use ethers::types::U256;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: String,
}

/// Messages the bridge asks the extension to sign and post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Msg {
    Send {
        from_address: String,
        to_address: String,
        amount: Vec<Coin>,
    },
    ExecuteContract {
        sender: String,
        contract: String,
        execute_msg: Value,
        coins: Vec<Coin>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOptions {
    pub msgs: Vec<Msg>,
    pub memo: Option<String>,
}

/// Outcome of an extension `post`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostResult {
    pub id: u64,
    pub success: bool,
    #[serde(default)]
    pub txhash: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub chain_id: String,
    pub lcd: String,
}

/// Operations the bridge needs from the Cosmos wallet extension
#[async_trait]
pub trait CosmosWallet: Wallet {
    async fn info(&self) -> BridgeResult<NetworkInfo>;

    /// Raw account bytes behind the bech32 address
    async fn address_bytes(&self) -> BridgeResult<Vec<u8>>;

    async fn balance(&self, address: &str) -> BridgeResult<Vec<Coin>>;

    async fn query_contract(&self, contract: &str, msg: &Value) -> BridgeResult<Value>;

    /// Sign and broadcast through the extension
    async fn post(&self, tx: TxOptions) -> BridgeResult<PostResult>;
}

/// Terra wallet using LCD for reads and a signing extension for posts
pub struct LcdWallet {
    http: Client,
    lcd_url: String,
    address: String,
    stable_denom: String,
    expected_chain_id: String,
    selected: NetworkType,
    extension: Option<SigningExtension>,
}

#[derive(Deserialize)]
struct BalancesResponse {
    balances: Vec<Coin>,
}

#[derive(Deserialize)]
struct NodeInfoResponse {
    default_node_info: DefaultNodeInfo,
}

#[derive(Deserialize)]
struct DefaultNodeInfo {
    network: String,
}

#[derive(Deserialize)]
struct AddressBytesResponse {
    address_bytes: String,
}

#[derive(Deserialize)]
struct SmartQueryResponse {
    data: Value,
}

#[derive(Serialize)]
struct PostRequest<'a> {
    chain_id: &'a str,
    #[serde(flatten)]
    tx: &'a TxOptions,
}

impl LcdWallet {
    pub fn new(
        http: Client,
        lcd_url: &str,
        address: &str,
        stable_denom: &str,
        expected_chain_id: &str,
        selected: NetworkType,
        extension: Option<SigningExtension>,
    ) -> Self {
        Self {
            http,
            lcd_url: lcd_url.trim_end_matches('/').to_string(),
            address: address.to_string(),
            stable_denom: stable_denom.to_string(),
            expected_chain_id: expected_chain_id.to_string(),
            selected,
            extension,
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> BridgeResult<T> {
        let url = format!("{}{}", self.lcd_url, path);
        debug!("LCD query: {}", url);

        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(BridgeError::chain(
                ChainKind::Terra.to_string(),
                format!("LCD {} returned {}", path, response.status()),
            ));
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl Wallet for LcdWallet {
    fn chain(&self) -> ChainKind {
        ChainKind::Terra
    }

    fn address(&self) -> String {
        self.address.clone()
    }

    async fn network_type(&self) -> BridgeResult<NetworkType> {
        let info = self.info().await?;
        if info.chain_id == self.expected_chain_id {
            Ok(self.selected)
        } else {
            // connected to the other network family
            Ok(match self.selected {
                NetworkType::Mainnet => NetworkType::Testnet,
                NetworkType::Testnet => NetworkType::Mainnet,
            })
        }
    }

    async fn stable_balance(&self) -> BridgeResult<U256> {
        let coins = self.balance(&self.address).await?;
        match coins.iter().find(|c| c.denom == self.stable_denom) {
            Some(coin) => U256::from_dec_str(&coin.amount)
                .map_err(|e| BridgeError::chain(ChainKind::Terra.to_string(), e)),
            None => Ok(U256::zero()),
        }
    }
}

#[async_trait]
impl CosmosWallet for LcdWallet {
    async fn info(&self) -> BridgeResult<NetworkInfo> {
        let node: NodeInfoResponse = self
            .get("/cosmos/base/tendermint/v1beta1/node_info")
            .await?;
        Ok(NetworkInfo {
            chain_id: node.default_node_info.network,
            lcd: self.lcd_url.clone(),
        })
    }

    async fn address_bytes(&self) -> BridgeResult<Vec<u8>> {
        let response: AddressBytesResponse = self
            .get(&format!("/cosmos/auth/v1beta1/bech32/{}", self.address))
            .await?;
        base64::engine::general_purpose::STANDARD
            .decode(response.address_bytes)
            .map_err(|e| BridgeError::chain(ChainKind::Terra.to_string(), e))
    }

    async fn balance(&self, address: &str) -> BridgeResult<Vec<Coin>> {
        let response: BalancesResponse = self
            .get(&format!("/cosmos/bank/v1beta1/balances/{}", address))
            .await?;
        Ok(response.balances)
    }

    async fn query_contract(&self, contract: &str, msg: &Value) -> BridgeResult<Value> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(msg.to_string());
        let response: SmartQueryResponse = self
            .get(&format!(
                "/cosmwasm/wasm/v1/contract/{}/smart/{}",
                contract, encoded
            ))
            .await?;
        Ok(response.data)
    }

    async fn post(&self, tx: TxOptions) -> BridgeResult<PostResult> {
        let extension = self.extension.as_ref().ok_or_else(|| BridgeError::Connection {
            chain: ChainKind::Terra.to_string(),
            message: "No signing extension configured".to_string(),
        })?;

        extension
            .call(
                "/terra/post",
                &PostRequest {
                    chain_id: &self.expected_chain_id,
                    tx: &tx,
                },
            )
            .await
    }
}
