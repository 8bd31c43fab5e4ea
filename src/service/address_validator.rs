//! 收款地址实时校验
//!
//! 每次输入都会递增代数（generation），只有代数仍为最新的结果才会被发布，
//! 迟到的旧结果直接丢弃。校验分两步：结构检查（同步）与链上存在性探测（异步）。

use std::{
    collections::HashSet,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
    time::Duration,
};

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{
    config::ValidatorConfig,
    domain::chain_config::ChainRegistry,
    infrastructure::log_redact::redact_address,
    metrics,
    utils::address_format::{self, FormatError, ADDRESS_LEN},
};

/// 存在性策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistencePolicy {
    /// 既无合约代码也无余额的地址视为无效（可逐个地址手动确认）
    RequireActivity,
    /// 仅做格式检查
    FormatOnly,
}

impl ExistencePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "require_activity" | "strict" => Some(Self::RequireActivity),
            "format_only" | "lenient" => Some(Self::FormatOnly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValidationState {
    Idle,
    Invalid,
    Validating,
    Valid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    Length,
    Format(FormatError),
    NoOnChainActivity,
    ProbeFailed,
    UnsupportedChain,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Length => "address must be 42 characters",
            Self::Format(e) => e.as_str(),
            Self::NoOnChainActivity => "address has no on-chain activity",
            Self::ProbeFailed => "could not verify address on chain",
            Self::UnsupportedChain => "chain is not configured",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationSnapshot {
    pub input: String,
    pub chain_id: u64,
    pub state: ValidationState,
    pub reason: Option<InvalidReason>,
}

impl ValidationSnapshot {
    fn idle() -> Self {
        Self {
            input: String::new(),
            chain_id: 0,
            state: ValidationState::Idle,
            reason: None,
        }
    }

    fn with(input: &str, chain_id: u64, state: ValidationState, reason: Option<InvalidReason>) -> Self {
        Self {
            input: input.to_string(),
            chain_id,
            state,
            reason,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.state == ValidationState::Valid
    }
}

pub struct AddressValidator {
    registry: Arc<ChainRegistry>,
    config: ValidatorConfig,
    generation: AtomicU64,
    state: watch::Sender<ValidationSnapshot>,
    // 用户手动确认过的无活动地址：(chain_id, 小写地址)
    overrides: RwLock<HashSet<(u64, String)>>,
}

impl AddressValidator {
    pub fn new(registry: Arc<ChainRegistry>, config: ValidatorConfig) -> Self {
        let (state, _) = watch::channel(ValidationSnapshot::idle());
        Self {
            registry,
            config,
            generation: AtomicU64::new(0),
            state,
            overrides: RwLock::new(HashSet::new()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ValidationSnapshot> {
        self.state.subscribe()
    }

    pub fn current(&self) -> ValidationSnapshot {
        self.state.borrow().clone()
    }

    /// 处理一次输入，返回处理结束时的最新快照
    ///
    /// 如果在探测期间有更新的输入，返回的是那次输入对应的快照。
    pub async fn on_input(&self, text: &str, chain_id: u64) -> ValidationSnapshot {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let input = text.trim();

        if input.is_empty() {
            self.publish(generation, ValidationSnapshot::with(input, chain_id, ValidationState::Idle, None));
            return self.current();
        }
        if input.len() != ADDRESS_LEN {
            return self.finish(generation, input, chain_id, Some(InvalidReason::Length));
        }

        self.publish(
            generation,
            ValidationSnapshot::with(input, chain_id, ValidationState::Validating, None),
        );

        if let Err(e) = address_format::check_evm_address(input) {
            return self.finish(generation, input, chain_id, Some(InvalidReason::Format(e)));
        }
        if !self.registry.contains(chain_id) {
            return self.finish(generation, input, chain_id, Some(InvalidReason::UnsupportedChain));
        }
        if self.config.existence_policy == ExistencePolicy::FormatOnly || self.is_overridden(chain_id, input) {
            return self.finish(generation, input, chain_id, None);
        }

        // 防抖：被更新的输入取代时不再探测
        if self.config.debounce_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.debounce_ms)).await;
            if !self.is_current(generation) {
                metrics::count_validation("superseded");
                return self.current();
            }
        }

        let reason = self.probe(input, chain_id).await;
        self.finish(generation, input, chain_id, reason)
    }

    /// 对当前"无链上活动"的地址做显式确认
    pub fn confirm_unseen(&self) -> Option<ValidationSnapshot> {
        let current = self.current();
        if current.reason != Some(InvalidReason::NoOnChainActivity) {
            return None;
        }

        let key = (current.chain_id, address_format::normalize(&current.input));
        match self.overrides.write() {
            Ok(mut guard) => guard.insert(key),
            Err(poisoned) => poisoned.into_inner().insert(key),
        };

        let generation = self.generation.load(Ordering::SeqCst);
        let snapshot = ValidationSnapshot::with(
            &current.input,
            current.chain_id,
            ValidationState::Valid,
            None,
        );
        tracing::info!(
            address = %redact_address(&current.input),
            "Recipient without on-chain activity confirmed by user"
        );
        self.publish(generation, snapshot);
        Some(self.current())
    }

    /// 合约代码非空或余额大于 0 即视为存在
    async fn probe(&self, input: &str, chain_id: u64) -> Option<InvalidReason> {
        let Ok(address) = Address::from_str(input) else {
            return Some(InvalidReason::Format(FormatError::Charset));
        };
        let client = match self.registry.get_client(chain_id) {
            Ok(client) => client,
            Err(_) => return Some(InvalidReason::ProbeFailed),
        };

        let (code, balance) = tokio::join!(client.get_code(address), client.get_balance(address));

        let has_code = matches!(&code, Ok(bytes) if !bytes.is_empty());
        let has_balance = matches!(&balance, Ok(wei) if *wei > U256::zero());
        if has_code || has_balance {
            return None;
        }

        if code.is_err() || balance.is_err() {
            tracing::debug!(
                chain_id,
                address = %redact_address(input),
                code_error = ?code.err(),
                balance_error = ?balance.err(),
                "Address existence probe failed"
            );
            return Some(InvalidReason::ProbeFailed);
        }
        Some(InvalidReason::NoOnChainActivity)
    }

    fn finish(
        &self,
        generation: u64,
        input: &str,
        chain_id: u64,
        reason: Option<InvalidReason>,
    ) -> ValidationSnapshot {
        let state = if reason.is_some() {
            ValidationState::Invalid
        } else {
            ValidationState::Valid
        };
        let applied = self.publish(generation, ValidationSnapshot::with(input, chain_id, state, reason));
        if applied {
            metrics::count_validation(match state {
                ValidationState::Valid => "valid",
                _ => "invalid",
            });
        } else {
            metrics::count_validation("superseded");
        }
        self.current()
    }

    /// 只有代数仍为最新时才发布
    fn publish(&self, generation: u64, snapshot: ValidationSnapshot) -> bool {
        self.state.send_if_modified(|current| {
            if !self.is_current(generation) {
                return false;
            }
            *current = snapshot;
            true
        })
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn is_overridden(&self, chain_id: u64, input: &str) -> bool {
        let key = (chain_id, address_format::normalize(input));
        match self.overrides.read() {
            Ok(guard) => guard.contains(&key),
            Err(poisoned) => poisoned.into_inner().contains(&key),
        }
    }
}
