//! 钱包会话
//!
//! 持有当前身份、链选择以及所有服务，替代全局单例。
//! 启动时从 SecretStore 恢复身份；交易确认后由 tracker 回调刷新余额与活动记录。

use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

use crate::{
    config::Config,
    domain::{
        chain_config::ChainRegistry,
        identity::{generate_recovery_phrase, Identity, RecoveryPhrase, WordCount},
        transaction::{parse_hash, CostEstimate, Submission, TokenTransferRecord, TransactionRecord, TransactionRequest},
    },
    error::{AppError, AppResult},
    infrastructure::{
        explorer_client::{EtherscanClient, HistoryProvider},
        log_redact::{redact_address, redact_phrase},
        secure_store::SecureCredentialStore,
    },
    service::{
        activity_aggregator::{ActivityAggregator, ActivityTab, LoadMoreOutcome},
        address_validator::{AddressValidator, ValidationSnapshot},
        balance_oracle::BalanceOracle,
        confirmation_tracker::{ConfirmationTracker, TrackHandle},
        secret_store::SecretStore,
        transaction_engine::TransactionEngine,
    },
};

/// 合并后的活动视图
#[derive(Debug, Clone, Default)]
pub struct ActivityView {
    pub chain_id: u64,
    pub native_txs: Vec<TransactionRecord>,
    pub token_txs: Vec<TokenTransferRecord>,
    /// 历史接口连续失败，展示时应提示
    pub degraded: bool,
}

pub struct WalletSession {
    pub config: Arc<Config>,
    pub registry: Arc<ChainRegistry>,
    pub secrets: Arc<SecretStore>,
    pub oracle: Arc<BalanceOracle>,
    pub engine: Arc<TransactionEngine>,
    pub tracker: ConfirmationTracker,
    pub activity: Arc<ActivityAggregator>,
    pub validator: Arc<AddressValidator>,
    identity: RwLock<Option<Arc<Identity>>>,
}

impl WalletSession {
    /// 使用 ethers HTTP Provider 与 Etherscan 历史接口
    pub fn new(config: Config, store: Arc<dyn SecureCredentialStore>) -> anyhow::Result<Self> {
        let registry = Arc::new(ChainRegistry::new(config.chains.clone(), config.default_chain_id)?);
        let history: Arc<dyn HistoryProvider> = Arc::new(EtherscanClient::new(&config.explorer)?);
        Ok(Self::with_components(config, registry, store, history))
    }

    /// 注入自定义组件（测试中使用 mock RPC 与历史接口）
    pub fn with_components(
        config: Config,
        registry: Arc<ChainRegistry>,
        store: Arc<dyn SecureCredentialStore>,
        history: Arc<dyn HistoryProvider>,
    ) -> Self {
        let secrets = Arc::new(SecretStore::new(store));
        let oracle = Arc::new(BalanceOracle::new(registry.clone()));
        let engine = Arc::new(TransactionEngine::new(registry.clone(), oracle.clone()));
        let activity = Arc::new(ActivityAggregator::new(
            history,
            config.explorer.page_size,
            config.activity.failure_threshold,
        ));
        let validator = Arc::new(AddressValidator::new(registry.clone(), config.validator.clone()));

        let tracker = ConfirmationTracker::new(registry.clone(), config.tracker.clone());
        tracker.add_hook(oracle.clone());
        tracker.add_hook(activity.clone());

        Self {
            config: Arc::new(config),
            registry,
            secrets,
            oracle,
            engine,
            tracker,
            activity,
            validator,
            identity: RwLock::new(None),
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 身份
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// 从持久化存储恢复身份，返回地址；没有钱包时返回 None
    pub async fn restore(&self) -> AppResult<Option<String>> {
        let Some(secret) = self.secrets.load().await else {
            tracing::debug!("No stored wallet");
            return Ok(None);
        };

        let identity = Identity::from_secret(&secret).map_err(|e| {
            tracing::error!(kind = %e.kind, "Stored wallet secret could not be decoded");
            e
        })?;
        let address = identity.address_string();
        self.set_identity(Some(identity));

        tracing::info!(address = %redact_address(&address), "Wallet restored");
        Ok(Some(address))
    }

    /// 生成新助记词并持久化；返回助记词供用户备份
    pub async fn create_wallet(&self, word_count: WordCount) -> AppResult<RecoveryPhrase> {
        let phrase = generate_recovery_phrase(word_count)?;
        let identity = Identity::from_recovery_phrase(phrase.expose())?;

        self.secrets.save(phrase.expose()).await?;
        let address = identity.address_string();
        self.set_identity(Some(identity));

        tracing::info!(
            address = %redact_address(&address),
            phrase = %redact_phrase(phrase.expose()),
            "Wallet created"
        );
        Ok(phrase)
    }

    /// 导入助记词或私钥并持久化，返回地址
    pub async fn import(&self, secret: &str) -> AppResult<String> {
        let identity = Identity::from_secret(secret)?;
        self.secrets.save(&identity.secret()).await?;

        let address = identity.address_string();
        let from_phrase = identity.has_phrase();
        self.set_identity(Some(identity));

        tracing::info!(address = %redact_address(&address), from_phrase, "Wallet imported");
        Ok(address)
    }

    /// 删除持久化的钱包；失败时内存中的身份保持不变
    pub async fn erase_wallet(&self) -> AppResult<()> {
        self.secrets.erase().await?;
        self.set_identity(None);
        Ok(())
    }

    pub fn identity(&self) -> AppResult<Arc<Identity>> {
        let guard = match self.identity.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clone().ok_or_else(AppError::no_wallet)
    }

    pub fn address(&self) -> AppResult<String> {
        Ok(self.identity()?.address_string())
    }

    fn set_identity(&self, identity: Option<Identity>) {
        let mut guard = match self.identity.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = identity.map(Arc::new);
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 链与余额
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn select_chain(&self, chain_id: u64) -> AppResult<()> {
        self.registry.select(chain_id)
    }

    pub fn selected_chain(&self) -> u64 {
        self.registry.selected()
    }

    pub async fn balances(&self) -> AppResult<BTreeMap<u64, String>> {
        let address = self.address()?;
        Ok(self.oracle.get_all_balances(&address).await)
    }

    pub async fn gas_price(&self, chain_id: Option<u64>) -> AppResult<String> {
        self.oracle
            .get_gas_price(chain_id.unwrap_or_else(|| self.selected_chain()))
            .await
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 交易
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub async fn validate_recipient(&self, input: &str, chain_id: Option<u64>) -> ValidationSnapshot {
        self.validator
            .on_input(input, chain_id.unwrap_or_else(|| self.selected_chain()))
            .await
    }

    pub async fn estimate(&self, request: &TransactionRequest) -> AppResult<CostEstimate> {
        let identity = self.identity()?;
        self.engine.estimate_cost(request, identity.address()).await
    }

    /// 广播并开始跟踪；返回的 handle 可等待最终状态
    pub async fn send(&self, request: &TransactionRequest) -> AppResult<(Submission, TrackHandle)> {
        let identity = self.identity()?;
        let submission = self.engine.send(request, &identity).await?;

        let hash = parse_hash(&submission.hash)?;
        let handle = self
            .tracker
            .track(submission.chain_id, hash, submission.record.clone())?;
        Ok((submission, handle))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 活动记录
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// 加载第一页并合并正在跟踪的交易
    pub async fn activity(&self, chain_id: Option<u64>) -> AppResult<ActivityView> {
        let address = self.address()?;
        let chain_id = chain_id.unwrap_or_else(|| self.selected_chain());
        self.registry.get(chain_id)?;

        if let Err(e) = self
            .activity
            .load(&address, chain_id, 1, self.activity.page_size())
            .await
        {
            // 历史接口不可用时仍展示已跟踪的交易
            tracing::warn!(chain_id, error = %e, "Activity load failed");
        }
        Ok(self.activity_view(chain_id))
    }

    pub async fn load_more(&self, chain_id: u64, tab: ActivityTab) -> AppResult<LoadMoreOutcome> {
        let address = self.address()?;
        let next_page = self.activity.next_page(chain_id, tab);
        self.activity.load_more(&address, chain_id, tab, next_page).await
    }

    pub fn activity_view(&self, chain_id: u64) -> ActivityView {
        let tracked = self
            .address()
            .ok()
            .and_then(|address| self.tracker.latest(&address, chain_id));
        ActivityView {
            chain_id,
            native_txs: self.activity.native_feed(chain_id, tracked.as_ref()),
            token_txs: self.activity.token_feed(chain_id),
            degraded: self.activity.is_degraded(chain_id),
        }
    }
}
