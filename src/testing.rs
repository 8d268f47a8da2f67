//! Fakes and mocks shared by unit tests

use crate::adapter::swap::{QuoteRequest, QuoteTx, SwapQuote, SwapQuoter};
use crate::adapter::{
    ensure_live, AdapterResolver, ChainAdapter, CreditWatch, DepositEstimate, Estimate,
    EstimateDetail, ExecutionOutcome, ProgressSink, StepInput,
};
use crate::config::Settings;
use crate::error::{BridgeError, BridgeResult};
use crate::registry::{ChainKind, NetworkRegistry, NetworkType};
use crate::step::StepKind;
use crate::wallet::cosmos::NetworkInfo;
use crate::wallet::{
    Coin, CosmosWallet, EvmWallet, PostResult, SolanaWallet, TxOptions, Wallet, WalletContexts,
    WalletHub, WalletProvider,
};

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, H256, U256};
use mockall::mock;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

pub const EVM_ADDRESS: &str = "0x00000000000000000000000000000000000000aa";
pub const TERRA_ADDRESS: &str = "terra1x46rqay4d3cssq8gxxvqz8xt6nwlz4td20k38v";
pub const ROUTER_ADDRESS: &str = "0x1111111254fb6c44bac0bed2854e76f90643097d";

/// `U256::MAX` written with 6 decimals
pub const OVERFLOWING_AMOUNT: &str =
    "115792089237316195423570985008687907853269984665640564039457584007913129.639935";

mock! {
    pub Evm {}

    #[async_trait]
    impl Wallet for Evm {
        fn chain(&self) -> ChainKind;
        fn address(&self) -> String;
        async fn network_type(&self) -> BridgeResult<NetworkType>;
        async fn stable_balance(&self) -> BridgeResult<U256>;
    }

    #[async_trait]
    impl EvmWallet for Evm {
        async fn gas_price(&self) -> BridgeResult<U256>;
        async fn token_balance(&self, token: Address) -> BridgeResult<U256>;
        async fn token_decimals(&self, token: Address) -> BridgeResult<u8>;
        async fn allowance(&self, token: Address, spender: Address) -> BridgeResult<U256>;
        async fn approve(&self, token: Address, spender: Address, amount: U256) -> BridgeResult<H256>;
        async fn burn(&self, amount: U256, recipient: [u8; 32]) -> BridgeResult<H256>;
        async fn send_transaction(&self, tx: TypedTransaction) -> BridgeResult<H256>;
    }
}

/// Registry table of the sample mainnet configuration
pub fn sample_registry() -> NetworkRegistry {
    Settings::parse(crate::config::tests::SAMPLE)
        .expect("sample config parses")
        .active_registry()
        .clone()
}

pub fn test_watch(timeout_secs: u64) -> CreditWatch {
    CreditWatch {
        timeout: Duration::from_secs(timeout_secs),
        poll_interval: Duration::from_secs(1),
        tolerance_bps: 100,
    }
}

/// Quote whose transaction carries `amount` as value
pub fn fake_quote(amount: U256, to_amount: &str) -> SwapQuote {
    SwapQuote {
        tx: QuoteTx {
            from: EVM_ADDRESS.to_string(),
            to: ROUTER_ADDRESS.to_string(),
            data: "0x7c025200".to_string(),
            value: json!(amount.to_string()),
            gas: Some(json!(200_000)),
            gas_price: Some(json!("30000000000")),
        },
        from_token_amount: amount.to_string(),
        to_token_amount: to_amount.to_string(),
    }
}

#[derive(Default)]
struct FakeWalletState {
    balance: U256,
    balance_reads: usize,
    fail_balance: bool,
    address_bytes: Vec<u8>,
    contract_response: Value,
    queries: Vec<(String, Value)>,
    posts: Vec<TxOptions>,
    reject_posts: bool,
    burns: Vec<(U256, [u8; 32])>,
    approvals: Vec<(Address, Address, U256)>,
    sent: Vec<TypedTransaction>,
    transfers: Vec<(U256, u16, [u8; 32])>,
}

/// In-memory wallet implementing every chain's wallet trait
pub struct FakeWallet {
    chain: ChainKind,
    address: String,
    network: NetworkType,
    state: Mutex<FakeWalletState>,
}

impl FakeWallet {
    fn new(chain: ChainKind, address: &str, network: NetworkType) -> Arc<Self> {
        Arc::new(Self {
            chain,
            address: address.to_string(),
            network,
            state: Mutex::new(FakeWalletState {
                address_bytes: vec![1u8; 20],
                ..Default::default()
            }),
        })
    }

    pub fn evm(address: &str, network: NetworkType) -> Arc<Self> {
        Self::new(ChainKind::Ethereum, address, network)
    }

    pub fn terra(address: &str, network: NetworkType) -> Arc<Self> {
        Self::new(ChainKind::Terra, address, network)
    }

    pub fn solana(public_key: &str, network: NetworkType) -> Arc<Self> {
        Self::new(ChainKind::Solana, public_key, network)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeWalletState> {
        self.state.lock().unwrap()
    }

    pub fn address_str(&self) -> &str {
        &self.address
    }

    pub fn set_balance(&self, balance: U256) {
        self.state().balance = balance;
    }

    pub fn balance_reads(&self) -> usize {
        self.state().balance_reads
    }

    pub fn fail_balance_queries(&self, fail: bool) {
        self.state().fail_balance = fail;
    }

    pub fn set_address_bytes(&self, bytes: Vec<u8>) {
        self.state().address_bytes = bytes;
    }

    pub fn set_contract_response(&self, response: Value) {
        self.state().contract_response = response;
    }

    pub fn reject_posts(&self, reject: bool) {
        self.state().reject_posts = reject;
    }

    pub fn last_query(&self) -> Option<(String, Value)> {
        self.state().queries.last().cloned()
    }

    pub fn posts(&self) -> Vec<TxOptions> {
        self.state().posts.clone()
    }

    pub fn burns(&self) -> Vec<(U256, [u8; 32])> {
        self.state().burns.clone()
    }

    pub fn approvals(&self) -> Vec<(Address, Address, U256)> {
        self.state().approvals.clone()
    }

    pub fn sent_transactions(&self) -> Vec<TypedTransaction> {
        self.state().sent.clone()
    }

    pub fn solana_transfers(&self) -> Vec<(U256, u16, [u8; 32])> {
        self.state().transfers.clone()
    }
}

#[async_trait]
impl Wallet for FakeWallet {
    fn chain(&self) -> ChainKind {
        self.chain
    }

    fn address(&self) -> String {
        self.address.clone()
    }

    async fn network_type(&self) -> BridgeResult<NetworkType> {
        Ok(self.network)
    }

    async fn stable_balance(&self) -> BridgeResult<U256> {
        let mut state = self.state();
        state.balance_reads += 1;
        if state.fail_balance {
            return Err(BridgeError::chain(self.chain.to_string(), "node unavailable"));
        }
        Ok(state.balance)
    }
}

#[async_trait]
impl EvmWallet for FakeWallet {
    async fn gas_price(&self) -> BridgeResult<U256> {
        Ok(U256::from(30_000_000_000u64))
    }

    async fn token_balance(&self, _token: Address) -> BridgeResult<U256> {
        self.stable_balance().await
    }

    async fn token_decimals(&self, _token: Address) -> BridgeResult<u8> {
        Ok(18)
    }

    async fn allowance(&self, _token: Address, _spender: Address) -> BridgeResult<U256> {
        Ok(U256::zero())
    }

    async fn approve(&self, token: Address, spender: Address, amount: U256) -> BridgeResult<H256> {
        self.state().approvals.push((token, spender, amount));
        Ok(H256::repeat_byte(1))
    }

    async fn burn(&self, amount: U256, recipient: [u8; 32]) -> BridgeResult<H256> {
        self.state().burns.push((amount, recipient));
        Ok(H256::repeat_byte(2))
    }

    async fn send_transaction(&self, tx: TypedTransaction) -> BridgeResult<H256> {
        self.state().sent.push(tx);
        Ok(H256::repeat_byte(3))
    }
}

#[async_trait]
impl CosmosWallet for FakeWallet {
    async fn info(&self) -> BridgeResult<NetworkInfo> {
        Ok(NetworkInfo {
            chain_id: "columbus-5".to_string(),
            lcd: "http://localhost:1317".to_string(),
        })
    }

    async fn address_bytes(&self) -> BridgeResult<Vec<u8>> {
        Ok(self.state().address_bytes.clone())
    }

    async fn balance(&self, _address: &str) -> BridgeResult<Vec<Coin>> {
        let balance = self.stable_balance().await?;
        Ok(vec![Coin {
            denom: "uusd".to_string(),
            amount: balance.to_string(),
        }])
    }

    async fn query_contract(&self, contract: &str, msg: &Value) -> BridgeResult<Value> {
        let mut state = self.state();
        state.queries.push((contract.to_string(), msg.clone()));
        Ok(state.contract_response.clone())
    }

    async fn post(&self, tx: TxOptions) -> BridgeResult<PostResult> {
        let mut state = self.state();
        state.posts.push(tx);
        let id = state.posts.len() as u64;

        if state.reject_posts {
            return Ok(PostResult {
                id,
                success: false,
                txhash: None,
                error: Some("User denied".to_string()),
            });
        }
        Ok(PostResult {
            id,
            success: true,
            txhash: Some(format!("{:064X}", id)),
            error: None,
        })
    }
}

#[async_trait]
impl SolanaWallet for FakeWallet {
    async fn build_transfer(
        &self,
        amount: U256,
        recipient_chain: u16,
        recipient: [u8; 32],
    ) -> BridgeResult<Vec<u8>> {
        self.state().transfers.push((amount, recipient_chain, recipient));
        Ok(vec![0u8; 8])
    }

    async fn sign_transaction(&self, mut tx: Vec<u8>) -> BridgeResult<Vec<u8>> {
        tx.extend_from_slice(&[0xff; 4]);
        Ok(tx)
    }

    async fn send_raw_transaction(&self, _tx: &[u8]) -> BridgeResult<String> {
        Ok("5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnbJLgp8uirBgmQpjKhoR4tjF3ZpRzrFmBV6UjKdiSZkQUW".to_string())
    }

    async fn confirm_transaction(&self, _signature: &str) -> BridgeResult<()> {
        Ok(())
    }
}

/// Fake wallets for all three chains, connected through providers
pub struct WalletsFixture {
    pub evm: Arc<FakeWallet>,
    pub terra: Arc<FakeWallet>,
    pub solana: Arc<FakeWallet>,
    pub hub: WalletHub,
}

impl WalletsFixture {
    pub async fn connected() -> Self {
        let solana_key = bs58::encode([5u8; 32]).into_string();
        let evm = FakeWallet::evm(EVM_ADDRESS, NetworkType::Mainnet);
        let terra = FakeWallet::terra(TERRA_ADDRESS, NetworkType::Mainnet);
        let solana = FakeWallet::solana(&solana_key, NetworkType::Mainnet);

        let evm_wallet: Arc<dyn EvmWallet> = evm.clone();
        let terra_wallet: Arc<dyn CosmosWallet> = terra.clone();
        let solana_wallet: Arc<dyn SolanaWallet> = solana.clone();

        let hub = WalletHub {
            evm: Some(Arc::new(
                WalletProvider::connect(evm_wallet, NetworkType::Mainnet, 18).await,
            )),
            terra: Some(Arc::new(
                WalletProvider::connect(terra_wallet, NetworkType::Mainnet, 6).await,
            )),
            solana: Some(Arc::new(
                WalletProvider::connect(solana_wallet, NetworkType::Mainnet, 6).await,
            )),
        };

        Self {
            evm,
            terra,
            solana,
            hub,
        }
    }

    pub async fn contexts(&self) -> WalletContexts {
        self.hub.snapshot().await
    }
}

/// Quoter with per-amount latency, quoting 1:1 into a 6-decimal token
pub struct FakeQuoter {
    delays: Mutex<HashMap<U256, Duration>>,
}

impl FakeQuoter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            delays: Mutex::new(HashMap::new()),
        })
    }

    pub fn set_delay(&self, amount: U256, delay: Duration) {
        self.delays.lock().unwrap().insert(amount, delay);
    }
}

#[async_trait]
impl SwapQuoter for FakeQuoter {
    async fn quote(&self, request: &QuoteRequest) -> BridgeResult<SwapQuote> {
        let delay = self.delays.lock().unwrap().get(&request.amount).copied();
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        let to_amount = request.amount / U256::exp10(12);
        Ok(fake_quote(request.amount, &to_amount.to_string()))
    }

    async fn spender(&self) -> BridgeResult<Address> {
        Ok(Address::repeat_byte(0x11))
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub amount: String,
    pub started: Instant,
    pub finished: Instant,
}

/// Adapter with controllable latency and failures, keyed by amount string
pub struct FakeAdapter {
    estimate_delays: Mutex<HashMap<String, Duration>>,
    execute_delay: Mutex<Duration>,
    failing_estimates: Mutex<HashSet<String>>,
    failing_executions: Mutex<HashSet<String>>,
    estimates_started: AtomicUsize,
    executions: Mutex<Vec<ExecutionRecord>>,
}

impl FakeAdapter {
    const DEFAULT_DELAY: Duration = Duration::from_millis(10);

    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            estimate_delays: Mutex::new(HashMap::new()),
            execute_delay: Mutex::new(Self::DEFAULT_DELAY),
            failing_estimates: Mutex::new(HashSet::new()),
            failing_executions: Mutex::new(HashSet::new()),
            estimates_started: AtomicUsize::new(0),
            executions: Mutex::new(Vec::new()),
        })
    }

    pub fn set_estimate_delay(&self, amount: &str, delay: Duration) {
        self.estimate_delays
            .lock()
            .unwrap()
            .insert(amount.to_string(), delay);
    }

    pub fn set_execute_delay(&self, delay: Duration) {
        *self.execute_delay.lock().unwrap() = delay;
    }

    pub fn fail_estimate(&self, amount: &str) {
        self.failing_estimates.lock().unwrap().insert(amount.to_string());
    }

    pub fn fail_execution(&self, amount: &str) {
        self.failing_executions.lock().unwrap().insert(amount.to_string());
    }

    pub fn estimates_started(&self) -> usize {
        self.estimates_started.load(Ordering::SeqCst)
    }

    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.executions.lock().unwrap().clone()
    }

    pub fn executed_amounts(&self) -> Vec<String> {
        self.executions().into_iter().map(|r| r.amount).collect()
    }
}

#[async_trait]
impl ChainAdapter for FakeAdapter {
    async fn estimate(
        &self,
        input: &StepInput,
        _wallets: &WalletContexts,
        cancel: &CancellationToken,
    ) -> BridgeResult<Estimate> {
        self.estimates_started.fetch_add(1, Ordering::SeqCst);
        let delay = self
            .estimate_delays
            .lock()
            .unwrap()
            .get(&input.amount)
            .copied()
            .unwrap_or(Self::DEFAULT_DELAY);
        sleep(delay).await;
        ensure_live(cancel)?;

        if self.failing_estimates.lock().unwrap().contains(&input.amount) {
            return Err(BridgeError::Estimation("quote unavailable".to_string()));
        }

        Ok(Estimate::new(
            &input.amount,
            EstimateDetail::Deposit(DepositEstimate {
                amount: U256::one(),
                decimals: 6,
                network_fee: U256::zero(),
                exchange_rate: "1".to_string(),
                expected_share: U256::one(),
            }),
        ))
    }

    async fn execute(
        &self,
        estimate: &Estimate,
        _wallets: &WalletContexts,
        progress: &ProgressSink,
    ) -> BridgeResult<ExecutionOutcome> {
        let started = Instant::now();
        progress.report(format!("Fake execution of {}", estimate.amount_string)).await;
        let delay = *self.execute_delay.lock().unwrap();
        sleep(delay).await;

        self.executions.lock().unwrap().push(ExecutionRecord {
            amount: estimate.amount_string.clone(),
            started,
            finished: Instant::now(),
        });

        if self
            .failing_executions
            .lock()
            .unwrap()
            .contains(&estimate.amount_string)
        {
            return Err(BridgeError::Timeout {
                operation: "destination credit on Terra".to_string(),
            });
        }

        Ok(ExecutionOutcome {
            tx_hashes: vec![format!("{:?}", H256::repeat_byte(9))],
            received: None,
        })
    }
}

/// Resolves every step kind to the same fake adapter unless overridden
pub struct FakeResolver {
    adapter: Arc<FakeAdapter>,
    overrides: HashMap<StepKind, Arc<dyn ChainAdapter>>,
}

impl FakeResolver {
    pub fn new(adapter: Arc<FakeAdapter>) -> Self {
        Self {
            adapter,
            overrides: HashMap::new(),
        }
    }

    pub fn with(mut self, kind: StepKind, adapter: Arc<dyn ChainAdapter>) -> Self {
        self.overrides.insert(kind, adapter);
        self
    }
}

impl AdapterResolver for FakeResolver {
    fn adapter_for(&self, kind: StepKind) -> Arc<dyn ChainAdapter> {
        match self.overrides.get(&kind) {
            Some(adapter) => adapter.clone(),
            None => {
                let adapter: Arc<dyn ChainAdapter> = self.adapter.clone();
                adapter
            }
        }
    }
}
