//! Token swaps on Ethereum through a 1inch-style quote API

use super::amount::parse_positive_amount;
use super::{
    ensure_covered, ensure_live, ChainAdapter, Estimate, EstimateDetail, ExecutionOutcome,
    ProgressSink, StepInput, SwapEstimate,
};
use crate::error::{BridgeError, BridgeResult};
use crate::registry::NetworkRegistry;
use crate::wallet::WalletContexts;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, U256};
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Placeholder address the quote API uses for native ether
pub const NATIVE_TOKEN: &str = "0xEeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE";

/// Transaction as returned by the quote API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteTx {
    pub from: String,
    pub to: String,
    pub data: String,
    /// Decimal string or number of wei
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapQuote {
    pub tx: QuoteTx,
    pub from_token_amount: String,
    pub to_token_amount: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuoteRequest {
    pub from_token: Address,
    pub to_token: Address,
    pub amount: U256,
    pub from_address: Address,
    pub slippage: f64,
}

/// Transaction ready to hand to the EVM wallet: no gas fields, hex value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TxArg {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    pub value: String,
}

impl TxArg {
    pub fn to_transaction(&self) -> BridgeResult<TypedTransaction> {
        let value = U256::from_str_radix(self.value.trim_start_matches("0x"), 16)
            .map_err(|e| BridgeError::Execution(format!("Invalid tx value {}: {}", self.value, e)))?;

        Ok(TransactionRequest::new()
            .from(self.from)
            .to(self.to)
            .data(self.data.clone())
            .value(value)
            .into())
    }
}

fn parse_address(field: &str, value: &str) -> BridgeResult<Address> {
    Address::from_str(value)
        .map_err(|e| BridgeError::Estimation(format!("Invalid {} address {}: {}", field, value, e)))
}

fn parse_wei(value: &Value) -> BridgeResult<U256> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| BridgeError::Estimation(format!("Invalid tx value {}", n))),
        Value::String(s) if s.starts_with("0x") => U256::from_str_radix(&s[2..], 16)
            .map_err(|e| BridgeError::Estimation(format!("Invalid tx value {}: {}", s, e))),
        Value::String(s) => U256::from_dec_str(s)
            .map_err(|e| BridgeError::Estimation(format!("Invalid tx value {}: {}", s, e))),
        other => Err(BridgeError::Estimation(format!("Invalid tx value {}", other))),
    }
}

/// Strip gas fields and re-encode `value` as 0x-prefixed hex
pub fn convert_tx_for_tx_arg(tx: QuoteTx) -> BridgeResult<TxArg> {
    let value = parse_wei(&tx.value)?;
    let data = Bytes::from_str(&tx.data)
        .map_err(|e| BridgeError::Estimation(format!("Invalid tx data: {}", e)))?;

    Ok(TxArg {
        from: parse_address("sender", &tx.from)?,
        to: parse_address("router", &tx.to)?,
        data,
        value: format!("0x{:x}", value),
    })
}

/// Swap quote provider
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SwapQuoter: Send + Sync {
    async fn quote(&self, request: &QuoteRequest) -> BridgeResult<SwapQuote>;

    /// Contract that must be approved to spend the source token
    async fn spender(&self) -> BridgeResult<Address>;
}

/// HTTP client of the 1inch aggregation API
pub struct OneInchClient {
    http: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct SpenderResponse {
    address: String,
}

impl OneInchClient {
    pub fn new(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> BridgeResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Swap API request: {} {:?}", url, query);

        let response = self.http.get(&url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::Estimation(format!(
                "Swap API {} returned {}: {}",
                path, status, body
            )));
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl SwapQuoter for OneInchClient {
    async fn quote(&self, request: &QuoteRequest) -> BridgeResult<SwapQuote> {
        self.get(
            "/swap",
            &[
                ("fromTokenAddress", format!("{:?}", request.from_token)),
                ("toTokenAddress", format!("{:?}", request.to_token)),
                ("amount", request.amount.to_string()),
                ("fromAddress", format!("{:?}", request.from_address)),
                ("slippage", request.slippage.to_string()),
            ],
        )
        .await
    }

    async fn spender(&self) -> BridgeResult<Address> {
        let response: SpenderResponse = self.get("/approve/spender", &[]).await?;
        parse_address("spender", &response.address)
    }
}

pub struct SwapAdapter {
    quoter: Arc<dyn SwapQuoter>,
    registry: Arc<NetworkRegistry>,
    slippage: f64,
}

impl SwapAdapter {
    pub fn new(quoter: Arc<dyn SwapQuoter>, registry: Arc<NetworkRegistry>, slippage: f64) -> Self {
        Self {
            quoter,
            registry,
            slippage,
        }
    }

    fn is_native(token: Address) -> bool {
        Address::from_str(NATIVE_TOKEN).map_or(false, |native| native == token)
    }
}

#[async_trait]
impl ChainAdapter for SwapAdapter {
    async fn estimate(
        &self,
        input: &StepInput,
        wallets: &WalletContexts,
        cancel: &CancellationToken,
    ) -> BridgeResult<Estimate> {
        let evm = wallets.evm()?;

        let from_symbol = input
            .from_token
            .clone()
            .unwrap_or_else(|| self.registry.evm.stable_symbol.clone());
        let to_symbol = input
            .to_token
            .clone()
            .ok_or_else(|| BridgeError::Estimation("No token to swap into".to_string()))?;
        let unsupported = || BridgeError::UnsupportedPair {
            from: from_symbol.clone(),
            to: to_symbol.clone(),
        };
        if from_symbol == to_symbol {
            return Err(unsupported());
        }

        let from_info = self.registry.evm_token(&from_symbol).map_err(|_| unsupported())?;
        let to_info = self.registry.evm_token(&to_symbol).map_err(|_| unsupported())?;
        let from_token = from_info.evm_address()?;
        let to_token = to_info.evm_address()?;
        let from_amount = parse_positive_amount(&input.amount, from_info.decimals)?;

        if !Self::is_native(from_token) {
            let balance = evm.wallet.token_balance(from_token).await?;
            ensure_live(cancel)?;
            ensure_covered(balance, from_amount, from_info.decimals)?;
        }

        let from_address = parse_address("wallet", &evm.address)?;
        let quote = self
            .quoter
            .quote(&QuoteRequest {
                from_token,
                to_token,
                amount: from_amount,
                from_address,
                slippage: self.slippage,
            })
            .await?;
        ensure_live(cancel)?;

        let spender = self.quoter.spender().await?;
        ensure_live(cancel)?;

        let to_amount = U256::from_dec_str(&quote.to_token_amount).map_err(|e| {
            BridgeError::Estimation(format!(
                "Invalid quote amount {}: {}",
                quote.to_token_amount, e
            ))
        })?;
        let tx = convert_tx_for_tx_arg(quote.tx)?;

        Ok(Estimate::new(
            &input.amount,
            EstimateDetail::Swap(SwapEstimate {
                from_symbol,
                to_symbol,
                from_token,
                to_token,
                from_amount,
                from_decimals: from_info.decimals,
                to_amount,
                to_decimals: to_info.decimals,
                spender,
                tx,
            }),
        ))
    }

    async fn execute(
        &self,
        estimate: &Estimate,
        wallets: &WalletContexts,
        progress: &ProgressSink,
    ) -> BridgeResult<ExecutionOutcome> {
        let swap = estimate.swap()?;
        let evm = wallets.evm()?;
        info!("Swap: {}", estimate.summary());

        let result = async {
            let mut tx_hashes = Vec::new();

            if !Self::is_native(swap.from_token) {
                let allowance = evm.wallet.allowance(swap.from_token, swap.spender).await?;
                if allowance < swap.from_amount {
                    progress
                        .report(format!("Approving {} for the swap router", swap.from_symbol))
                        .await;
                    let approval = evm
                        .wallet
                        .approve(swap.from_token, swap.spender, swap.from_amount)
                        .await?;
                    tx_hashes.push(format!("{:?}", approval));
                }
            }

            progress.report("Submitting swap transaction").await;
            let tx_hash = evm.wallet.send_transaction(swap.tx.to_transaction()?).await?;
            progress.report(format!("Swap included in {:?}", tx_hash)).await;
            tx_hashes.push(format!("{:?}", tx_hash));

            Ok(ExecutionOutcome {
                tx_hashes,
                received: Some(swap.to_amount),
            })
        }
        .await;

        if let Err(e) = &result {
            error!("Swap failed: {}", e);
        }
        evm.refresh_balance().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ChainKind, NetworkType};
    use crate::testing::{fake_quote, sample_registry, MockEvm, WalletsFixture, EVM_ADDRESS};
    use crate::wallet::{EvmWallet, WalletProvider};
    use serde_json::json;

    fn quote_tx(value: Value) -> QuoteTx {
        QuoteTx {
            from: "0x00000000000000000000000000000000000000aa".into(),
            to: "0x1111111254fb6c44bac0bed2854e76f90643097d".into(),
            data: "0x7c025200".into(),
            value,
            gas: Some(json!(250000)),
            gas_price: Some(json!("42000000000")),
        }
    }

    #[test]
    fn tx_arg_has_hex_value_and_no_gas() {
        let arg = convert_tx_for_tx_arg(quote_tx(json!("1000"))).unwrap();
        assert_eq!(arg.value, "0x3e8");

        let wire = serde_json::to_value(&arg).unwrap();
        assert!(wire.get("gas").is_none());
        assert!(wire.get("gasPrice").is_none());
        assert_eq!(wire["value"], "0x3e8");
    }

    #[test]
    fn numeric_and_hex_values_are_accepted() {
        assert_eq!(convert_tx_for_tx_arg(quote_tx(json!(1000))).unwrap().value, "0x3e8");
        assert_eq!(convert_tx_for_tx_arg(quote_tx(json!("0x3e8"))).unwrap().value, "0x3e8");
        assert_eq!(convert_tx_for_tx_arg(quote_tx(json!("0"))).unwrap().value, "0x0");
        assert!(convert_tx_for_tx_arg(quote_tx(json!(true))).is_err());
    }

    #[test]
    fn quote_response_parses() {
        let quote: SwapQuote = serde_json::from_value(json!({
            "fromToken": {"symbol": "UST"},
            "toToken": {"symbol": "USDC"},
            "fromTokenAmount": "10000000000000000000",
            "toTokenAmount": "9990000",
            "tx": {
                "from": "0x00000000000000000000000000000000000000aa",
                "to": "0x1111111254fb6c44bac0bed2854e76f90643097d",
                "data": "0x",
                "value": "0",
                "gas": 180000,
                "gasPrice": "30000000000"
            }
        }))
        .unwrap();
        assert_eq!(quote.to_token_amount, "9990000");
        assert!(quote.tx.gas.is_some());
    }

    #[tokio::test]
    async fn same_token_is_unsupported() {
        let fixture = WalletsFixture::connected().await;
        let adapter = SwapAdapter::new(
            Arc::new(MockSwapQuoter::new()),
            Arc::new(sample_registry()),
            1.0,
        );
        let input = StepInput {
            amount: "1".into(),
            from_token: Some("UST".into()),
            to_token: Some("UST".into()),
        };

        let err = adapter
            .estimate(&input, &fixture.contexts().await, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedPair { .. }));
    }

    #[tokio::test]
    async fn estimate_uses_quote() {
        let fixture = WalletsFixture::connected().await;
        fixture.evm.set_balance(U256::from(50u64) * U256::exp10(18));

        let mut quoter = MockSwapQuoter::new();
        quoter
            .expect_quote()
            .withf(|req| req.amount == U256::from(10u64) * U256::exp10(18) && req.slippage == 1.0)
            .times(1)
            .returning(|req| Ok(fake_quote(req.amount, "9990000")));
        quoter
            .expect_spender()
            .returning(|| Ok(Address::repeat_byte(0x11)));

        let adapter = SwapAdapter::new(Arc::new(quoter), Arc::new(sample_registry()), 1.0);
        let input = StepInput {
            amount: "10".into(),
            from_token: None,
            to_token: Some("USDC".into()),
        };
        let estimate = adapter
            .estimate(&input, &fixture.contexts().await, &CancellationToken::new())
            .await
            .unwrap();

        let swap = estimate.swap().unwrap();
        assert_eq!(swap.from_symbol, "UST");
        assert_eq!(swap.to_amount, U256::from(9_990_000u64));
        assert_eq!(estimate.summary(), "Swap 10 UST for 9.99 USDC");
    }

    #[tokio::test]
    async fn execute_approves_when_allowance_is_short() {
        let fixture = WalletsFixture::connected().await;
        fixture.evm.set_balance(U256::from(50u64) * U256::exp10(18));

        let mut quoter = MockSwapQuoter::new();
        quoter
            .expect_quote()
            .returning(|req| Ok(fake_quote(req.amount, "1000000")));
        quoter
            .expect_spender()
            .returning(|| Ok(Address::repeat_byte(0x22)));

        let adapter = SwapAdapter::new(Arc::new(quoter), Arc::new(sample_registry()), 1.0);
        let contexts = fixture.contexts().await;
        let input = StepInput {
            amount: "1".into(),
            from_token: None,
            to_token: Some("USDC".into()),
        };
        let estimate = adapter
            .estimate(&input, &contexts, &CancellationToken::new())
            .await
            .unwrap();

        let outcome = adapter
            .execute(&estimate, &contexts, &ProgressSink::detached(4))
            .await
            .unwrap();

        assert_eq!(outcome.tx_hashes.len(), 2);
        assert_eq!(fixture.evm.approvals().len(), 1);
        assert_eq!(fixture.evm.sent_transactions().len(), 1);
    }

    #[tokio::test]
    async fn rejected_swap_still_refreshes_balance() {
        let mut evm = MockEvm::new();
        evm.expect_chain().return_const(ChainKind::Ethereum);
        evm.expect_address().return_const(EVM_ADDRESS.to_string());
        evm.expect_network_type()
            .returning(|| Ok(NetworkType::Mainnet));
        // once on connect, once after the failed execution
        evm.expect_stable_balance()
            .times(2)
            .returning(|| Ok(U256::exp10(18)));
        evm.expect_allowance().returning(|_, _| Ok(U256::MAX));
        evm.expect_approve().never();
        evm.expect_send_transaction()
            .times(1)
            .returning(|_| Err(BridgeError::Wallet("User denied transaction".into())));

        let wallet: Arc<dyn EvmWallet> = Arc::new(evm);
        let provider = Arc::new(WalletProvider::connect(wallet, NetworkType::Mainnet, 18).await);
        let contexts = WalletContexts {
            evm: Some(provider.snapshot().await),
            ..Default::default()
        };

        let estimate = Estimate::new(
            "1",
            EstimateDetail::Swap(SwapEstimate {
                from_symbol: "UST".into(),
                to_symbol: "USDC".into(),
                from_token: Address::repeat_byte(0xaa),
                to_token: Address::repeat_byte(0xbb),
                from_amount: U256::exp10(18),
                from_decimals: 18,
                to_amount: U256::from(1_000_000u64),
                to_decimals: 6,
                spender: Address::repeat_byte(0x11),
                tx: convert_tx_for_tx_arg(fake_quote(U256::zero(), "1000000").tx).unwrap(),
            }),
        );

        let adapter = SwapAdapter::new(
            Arc::new(MockSwapQuoter::new()),
            Arc::new(sample_registry()),
            1.0,
        );
        let err = adapter
            .execute(&estimate, &contexts, &ProgressSink::detached(6))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Wallet(_)));
    }
}
