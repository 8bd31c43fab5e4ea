//! 测试辅助模块
//! 提供可编程的 RPC / 历史接口 mock 以及会话构造函数

#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use ethers::{
    types::{
        transaction::eip2718::TypedTransaction, Address, Bytes, Transaction, TransactionReceipt,
        H256, U256, U64,
    },
    utils::keccak256,
};
use ironwallet::{
    config::{
        ActivityConfig, Config, ExplorerConfig, LoggingConfig, StorageConfig, TrackerConfig,
        ValidatorConfig,
    },
    domain::{
        chain_config::{ChainConfig, ChainRegistry, RpcFactory},
        transaction::{TokenTransferRecord, TransactionRecord},
        transaction_status::TxStatus,
    },
    error::{AppError, AppResult},
    infrastructure::{
        explorer_client::HistoryProvider,
        rpc_client::{ChainRpc, RpcFailure, RpcResult},
        secure_store::MemoryCredentialStore,
    },
    service::address_validator::ExistencePolicy,
    WalletSession,
};

pub const SEPOLIA: u64 = 11155111;
pub const POLYGON: u64 = 137;

/// BIP39 标准测试向量
pub const TEST_PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
pub const TEST_ADDRESS: &str = "0x9858EfFD232B4033E47d90003D41EC34EcaEda94";
pub const RECIPIENT: &str = "0x1111111111111111111111111111111111111111";
/// 与 TEST_PHRASE 无关的另一把私钥
pub const OTHER_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

pub fn addr(s: &str) -> Address {
    s.parse().expect("valid test address")
}

pub fn eth(amount: u64) -> U256 {
    U256::exp10(18) * U256::from(amount)
}

pub fn test_chains() -> Vec<ChainConfig> {
    vec![
        ChainConfig {
            chain_id: SEPOLIA,
            name: "Sepolia".to_string(),
            symbol: "ETH".to_string(),
            rpc_url: "http://127.0.0.1:8545".to_string(),
            explorer_url: "https://sepolia.etherscan.io".to_string(),
            color: "#627EEA".to_string(),
        },
        ChainConfig {
            chain_id: POLYGON,
            name: "Polygon".to_string(),
            symbol: "MATIC".to_string(),
            rpc_url: "http://127.0.0.1:8546".to_string(),
            explorer_url: "https://polygonscan.com".to_string(),
            color: "#8247E5".to_string(),
        },
    ]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MockChainRpc
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 回执轮询的脚本化结果，队列耗尽后一直返回 NotYet
#[derive(Debug, Clone, Copy)]
pub enum ReceiptStep {
    NotYet,
    Error,
    Mined(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastFailure {
    Reject,
    Transport,
}

pub struct MockChainRpc {
    pub balances: Mutex<HashMap<Address, U256>>,
    pub code: Mutex<HashMap<Address, Bytes>>,
    pub probe_delays: Mutex<HashMap<Address, Duration>>,
    pub receipts: Mutex<VecDeque<ReceiptStep>>,
    pub gas_limit: Mutex<U256>,
    pub gas_price: Mutex<U256>,
    pub nonce: Mutex<U256>,
    pub fail_balance: AtomicBool,
    pub fail_probe: AtomicBool,
    pub fail_estimate: AtomicBool,
    pub broadcast_failure: Mutex<Option<BroadcastFailure>>,
    pub sent: Mutex<Vec<Bytes>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl Default for MockChainRpc {
    fn default() -> Self {
        Self {
            balances: Mutex::new(HashMap::new()),
            code: Mutex::new(HashMap::new()),
            probe_delays: Mutex::new(HashMap::new()),
            receipts: Mutex::new(VecDeque::new()),
            gas_limit: Mutex::new(U256::from(21_000u64)),
            gas_price: Mutex::new(U256::from(1_000_000_000u64)),
            nonce: Mutex::new(U256::zero()),
            fail_balance: AtomicBool::new(false),
            fail_probe: AtomicBool::new(false),
            fail_estimate: AtomicBool::new(false),
            broadcast_failure: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl MockChainRpc {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_balance(&self, address: &str, wei: U256) {
        self.balances.lock().unwrap().insert(addr(address), wei);
    }

    pub fn set_code(&self, address: &str, code: &[u8]) {
        self.code
            .lock()
            .unwrap()
            .insert(addr(address), Bytes::from(code.to_vec()));
    }

    pub fn set_probe_delay(&self, address: &str, delay: Duration) {
        self.probe_delays.lock().unwrap().insert(addr(address), delay);
    }

    pub fn script_receipts(&self, steps: &[ReceiptStep]) {
        self.receipts.lock().unwrap().extend(steps.iter().copied());
    }

    pub fn fail_broadcast(&self, failure: BroadcastFailure) {
        *self.broadcast_failure.lock().unwrap() = Some(failure);
    }

    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    fn hit(&self, method: &'static str) {
        *self.calls.lock().unwrap().entry(method).or_insert(0) += 1;
    }

    async fn probe_delay(&self, address: &Address) {
        let delay = self.probe_delays.lock().unwrap().get(address).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ChainRpc for MockChainRpc {
    async fn get_balance(&self, address: Address) -> RpcResult<U256> {
        self.hit("get_balance");
        self.probe_delay(&address).await;
        if self.fail_balance.load(Ordering::SeqCst) {
            return Err(RpcFailure::Unavailable("connection refused".into()));
        }
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn get_gas_price(&self) -> RpcResult<U256> {
        self.hit("get_gas_price");
        if self.fail_estimate.load(Ordering::SeqCst) {
            return Err(RpcFailure::Unavailable("timeout".into()));
        }
        Ok(*self.gas_price.lock().unwrap())
    }

    async fn estimate_gas(&self, _tx: &TypedTransaction) -> RpcResult<U256> {
        self.hit("estimate_gas");
        if self.fail_estimate.load(Ordering::SeqCst) {
            return Err(RpcFailure::Rejected("execution reverted (code -32000)".into()));
        }
        Ok(*self.gas_limit.lock().unwrap())
    }

    async fn get_transaction_count(&self, _address: Address) -> RpcResult<U256> {
        self.hit("get_transaction_count");
        Ok(*self.nonce.lock().unwrap())
    }

    async fn get_transaction(&self, _hash: H256) -> RpcResult<Option<Transaction>> {
        self.hit("get_transaction");
        Ok(None)
    }

    async fn get_transaction_receipt(&self, _hash: H256) -> RpcResult<Option<TransactionReceipt>> {
        self.hit("get_transaction_receipt");
        let step = self
            .receipts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ReceiptStep::NotYet);
        match step {
            ReceiptStep::NotYet => Ok(None),
            ReceiptStep::Error => Err(RpcFailure::Unavailable("connection reset".into())),
            ReceiptStep::Mined(status) => {
                let mut receipt = TransactionReceipt::default();
                receipt.status = Some(U64::from(status));
                Ok(Some(receipt))
            }
        }
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> RpcResult<H256> {
        self.hit("send_raw_transaction");
        let failure = *self.broadcast_failure.lock().unwrap();
        match failure {
            Some(BroadcastFailure::Reject) => {
                Err(RpcFailure::Rejected("nonce too low (code -32000)".into()))
            }
            Some(BroadcastFailure::Transport) => {
                Err(RpcFailure::Unavailable("connection refused".into()))
            }
            None => {
                let hash = H256::from(keccak256(&raw));
                self.sent.lock().unwrap().push(raw);
                Ok(hash)
            }
        }
    }

    async fn get_code(&self, address: Address) -> RpcResult<Bytes> {
        self.hit("get_code");
        self.probe_delay(&address).await;
        if self.fail_probe.load(Ordering::SeqCst) {
            return Err(RpcFailure::Unavailable("connection refused".into()));
        }
        Ok(self
            .code
            .lock()
            .unwrap()
            .get(&address)
            .cloned()
            .unwrap_or_default())
    }
}

/// 所有链共用同一个 mock
pub fn registry_with(mock: Arc<MockChainRpc>) -> Arc<ChainRegistry> {
    let factory: RpcFactory =
        Arc::new(move |_: &ChainConfig| -> anyhow::Result<Arc<dyn ChainRpc>> {
            Ok(mock.clone() as Arc<dyn ChainRpc>)
        });
    Arc::new(ChainRegistry::with_factory(test_chains(), None, factory).unwrap())
}

/// 每条链一个独立的 mock
pub fn registry_per_chain(mocks: HashMap<u64, Arc<MockChainRpc>>) -> Arc<ChainRegistry> {
    let factory: RpcFactory =
        Arc::new(move |config: &ChainConfig| -> anyhow::Result<Arc<dyn ChainRpc>> {
            let mock = mocks
                .get(&config.chain_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no mock for chain {}", config.chain_id))?;
            Ok(mock as Arc<dyn ChainRpc>)
        });
    Arc::new(ChainRegistry::with_factory(test_chains(), None, factory).unwrap())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MockHistory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct MockHistory {
    /// page -> records
    pub native: Mutex<HashMap<u32, Vec<TransactionRecord>>>,
    pub tokens: Mutex<HashMap<u32, Vec<TokenTransferRecord>>>,
    pub delay: Mutex<Option<Duration>>,
    pub fail: AtomicBool,
    pub native_calls: AtomicUsize,
    pub token_calls: AtomicUsize,
}

impl MockHistory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_native_page(&self, page: u32, records: Vec<TransactionRecord>) {
        self.native.lock().unwrap().insert(page, records);
    }

    pub fn set_token_page(&self, page: u32, records: Vec<TokenTransferRecord>) {
        self.tokens.lock().unwrap().insert(page, records);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    async fn pause(&self) -> AppResult<()> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::network_unavailable("explorer unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl HistoryProvider for MockHistory {
    async fn native_transfers(
        &self,
        _address: &str,
        _chain_id: u64,
        page: u32,
        _offset: u32,
    ) -> AppResult<Vec<TransactionRecord>> {
        self.native_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await?;
        Ok(self.native.lock().unwrap().get(&page).cloned().unwrap_or_default())
    }

    async fn token_transfers(
        &self,
        _address: &str,
        _chain_id: u64,
        page: u32,
        _offset: u32,
    ) -> AppResult<Vec<TokenTransferRecord>> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await?;
        Ok(self.tokens.lock().unwrap().get(&page).cloned().unwrap_or_default())
    }
}

pub fn native_record(hash: &str, status: TxStatus) -> TransactionRecord {
    TransactionRecord {
        hash: hash.to_string(),
        from: TEST_ADDRESS.to_string(),
        to: RECIPIENT.to_string(),
        value: "0.1".to_string(),
        timestamp: 1_700_000_000,
        status,
    }
}

pub fn token_record(hash: &str) -> TokenTransferRecord {
    TokenTransferRecord {
        hash: hash.to_string(),
        from: TEST_ADDRESS.to_string(),
        to: RECIPIENT.to_string(),
        value: "12.5".to_string(),
        timestamp: 1_700_000_000,
        status: TxStatus::Confirmed,
        contract_address: "0x2222222222222222222222222222222222222222".to_string(),
        symbol: "USDC".to_string(),
        token_name: "USD Coin".to_string(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 会话
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 不依赖环境变量的测试配置
pub fn test_config() -> Config {
    Config {
        chains: test_chains(),
        default_chain_id: None,
        explorer: ExplorerConfig {
            api_url: "http://127.0.0.1:9/api".to_string(),
            api_key: None,
            page_size: 25,
        },
        tracker: TrackerConfig {
            poll_interval_secs: 5,
            max_polls: None,
            backoff_max_secs: None,
        },
        validator: ValidatorConfig {
            existence_policy: ExistencePolicy::RequireActivity,
            debounce_ms: 0,
        },
        activity: ActivityConfig {
            failure_threshold: 3,
        },
        storage: StorageConfig {
            path: "unused".to_string(),
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: "text".to_string(),
        },
    }
}

pub struct Harness {
    pub session: WalletSession,
    pub rpc: Arc<MockChainRpc>,
    pub history: Arc<MockHistory>,
    pub store: Arc<MemoryCredentialStore>,
}

pub fn harness_with(config: Config) -> Harness {
    let rpc = MockChainRpc::new();
    let history = MockHistory::new();
    let store = Arc::new(MemoryCredentialStore::new());
    let session = WalletSession::with_components(
        config,
        registry_with(rpc.clone()),
        store.clone(),
        history.clone(),
    );
    Harness {
        session,
        rpc,
        history,
        store,
    }
}

pub fn harness() -> Harness {
    harness_with(test_config())
}
