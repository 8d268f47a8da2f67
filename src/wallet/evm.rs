//! EVM wallet backed by an ethers signer middleware

use super::Wallet;
use crate::error::{BridgeError, BridgeResult};
use crate::registry::{ChainKind, NetworkType};

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

abigen!(
    Erc20,
    r#"[
        function balanceOf(address owner) external view returns (uint256)
        function decimals() external view returns (uint8)
        function symbol() external view returns (string)
        function allowance(address owner, address spender) external view returns (uint256)
        function approve(address spender, uint256 amount) external returns (bool)
    ]"#
);

abigen!(
    WrappedStable,
    r#"[
        function burn(uint256 amount, bytes32 to) external
    ]"#
);

/// Operations the bridge needs from the EVM wallet
#[async_trait]
pub trait EvmWallet: Wallet {
    async fn gas_price(&self) -> BridgeResult<U256>;

    async fn token_balance(&self, token: Address) -> BridgeResult<U256>;

    async fn token_decimals(&self, token: Address) -> BridgeResult<u8>;

    async fn allowance(&self, token: Address, spender: Address) -> BridgeResult<U256>;

    /// Approve `spender` and wait for inclusion
    async fn approve(&self, token: Address, spender: Address, amount: U256) -> BridgeResult<H256>;

    /// Burn wrapped stablecoin towards a Terra account and wait for inclusion
    async fn burn(&self, amount: U256, recipient: [u8; 32]) -> BridgeResult<H256>;

    /// Sign and broadcast an arbitrary transaction and wait for inclusion
    async fn send_transaction(&self, tx: TypedTransaction) -> BridgeResult<H256>;
}

type Client = SignerMiddleware<Provider<Http>, LocalWallet>;

/// EVM wallet using a local key and an HTTP provider
pub struct EthersWallet {
    client: Arc<Client>,
    expected_chain_id: u64,
    selected: NetworkType,
    stable_token: Address,
    decimals_cache: DashMap<Address, u8>,
    confirmation_timeout: Duration,
}

impl EthersWallet {
    /// Connect using a private key taken from the given environment variable
    pub fn from_env(
        key_env: &str,
        rpc_url: &str,
        chain_id: u64,
        selected: NetworkType,
        stable_token: Address,
        confirmation_timeout: Duration,
    ) -> BridgeResult<Self> {
        let key = std::env::var(key_env).map_err(|_| BridgeError::Connection {
            chain: ChainKind::Ethereum.to_string(),
            message: format!("No wallet configured. Set {}", key_env),
        })?;

        let wallet = key
            .parse::<LocalWallet>()
            .map_err(|e| BridgeError::Wallet(format!("Invalid private key: {}", e)))?
            .with_chain_id(chain_id);

        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| BridgeError::Connection {
                chain: ChainKind::Ethereum.to_string(),
                message: format!("Invalid RPC url {}: {}", rpc_url, e),
            })?
            .interval(Duration::from_millis(500));

        info!("EVM wallet initialized: {:?}", wallet.address());

        Ok(Self {
            client: Arc::new(SignerMiddleware::new(provider, wallet)),
            expected_chain_id: chain_id,
            selected,
            stable_token,
            decimals_cache: DashMap::new(),
            confirmation_timeout,
        })
    }

    fn erc20(&self, token: Address) -> Erc20<Client> {
        Erc20::new(token, self.client.clone())
    }

    /// Wait for a broadcast transaction to be mined successfully
    async fn await_inclusion(&self, pending: PendingTransaction<'_, Http>) -> BridgeResult<H256> {
        let tx_hash = pending.tx_hash();
        debug!("Waiting for inclusion of {:?}", tx_hash);

        let receipt = timeout(self.confirmation_timeout, pending)
            .await
            .map_err(|_| BridgeError::Timeout {
                operation: format!("inclusion of {:?}", tx_hash),
            })?
            .map_err(|e| BridgeError::Execution(e.to_string()))?
            .ok_or_else(|| BridgeError::Execution(format!("Transaction {:?} was dropped", tx_hash)))?;

        if receipt.status != Some(1u64.into()) {
            return Err(BridgeError::Execution(format!(
                "Transaction {:?} reverted",
                tx_hash
            )));
        }

        Ok(tx_hash)
    }
}

fn chain_err(e: impl ToString) -> BridgeError {
    BridgeError::chain(ChainKind::Ethereum.to_string(), e)
}

#[async_trait]
impl Wallet for EthersWallet {
    fn chain(&self) -> ChainKind {
        ChainKind::Ethereum
    }

    fn address(&self) -> String {
        format!("{:?}", self.client.address())
    }

    async fn network_type(&self) -> BridgeResult<NetworkType> {
        let chain_id = self.client.get_chainid().await.map_err(chain_err)?;
        if chain_id == U256::from(self.expected_chain_id) {
            Ok(self.selected)
        } else if chain_id == U256::one() {
            Ok(NetworkType::Mainnet)
        } else {
            Ok(NetworkType::Testnet)
        }
    }

    async fn stable_balance(&self) -> BridgeResult<U256> {
        self.token_balance(self.stable_token).await
    }
}

#[async_trait]
impl EvmWallet for EthersWallet {
    async fn gas_price(&self) -> BridgeResult<U256> {
        self.client.get_gas_price().await.map_err(chain_err)
    }

    async fn token_balance(&self, token: Address) -> BridgeResult<U256> {
        self.erc20(token)
            .balance_of(self.client.address())
            .call()
            .await
            .map_err(chain_err)
    }

    async fn token_decimals(&self, token: Address) -> BridgeResult<u8> {
        if let Some(decimals) = self.decimals_cache.get(&token) {
            return Ok(*decimals);
        }

        let decimals = self.erc20(token).decimals().call().await.map_err(chain_err)?;
        self.decimals_cache.insert(token, decimals);
        Ok(decimals)
    }

    async fn allowance(&self, token: Address, spender: Address) -> BridgeResult<U256> {
        self.erc20(token)
            .allowance(self.client.address(), spender)
            .call()
            .await
            .map_err(chain_err)
    }

    async fn approve(&self, token: Address, spender: Address, amount: U256) -> BridgeResult<H256> {
        let contract = self.erc20(token);
        let call = contract.approve(spender, amount);
        let pending = call
            .send()
            .await
            .map_err(|e| BridgeError::Wallet(e.to_string()))?;
        self.await_inclusion(pending).await
    }

    async fn burn(&self, amount: U256, recipient: [u8; 32]) -> BridgeResult<H256> {
        let contract = WrappedStable::new(self.stable_token, self.client.clone());
        let call = contract.burn(amount, recipient);
        let pending = call
            .send()
            .await
            .map_err(|e| BridgeError::Wallet(e.to_string()))?;
        self.await_inclusion(pending).await
    }

    async fn send_transaction(&self, tx: TypedTransaction) -> BridgeResult<H256> {
        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(|e| BridgeError::Wallet(e.to_string()))?;
        self.await_inclusion(pending).await
    }
}
