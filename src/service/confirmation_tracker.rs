//! 交易确认跟踪
//!
//! 每个已广播的交易一个后台任务：先补全交易基本信息，再按固定间隔串行轮询回执，
//! 直到拿到回执进入终态。网络错误不会终止轮询。
//! 进入终态后依次调用结算回调（余额刷新、活动记录重载）并广播事件。

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use ethers::types::H256;
use tokio::{sync::broadcast, task::JoinHandle};

use crate::{
    config::TrackerConfig,
    domain::{
        chain_config::ChainRegistry,
        transaction::{format_ether, format_hash, TransactionRecord},
        transaction_status::TxStatus,
    },
    error::{AppError, AppResult},
    infrastructure::{log_redact::redact_hex_string, rpc_client::ChainRpc},
    metrics,
    utils::address_format,
};

/// 交易进入终态后的回调
#[async_trait]
pub trait SettlementHook: Send + Sync {
    async fn on_settled(&self, chain_id: u64, record: &TransactionRecord);
}

/// 终态事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerEvent {
    pub chain_id: u64,
    pub record: TransactionRecord,
}

/// 等待某笔交易的最终结果
#[derive(Debug)]
pub struct TrackHandle {
    pub hash: String,
    join: JoinHandle<TransactionRecord>,
}

impl TrackHandle {
    pub async fn wait(self) -> AppResult<TransactionRecord> {
        self.join
            .await
            .map_err(|e| AppError::network_unavailable(format!("Tracker task aborted: {}", e)))
    }
}

#[derive(Clone)]
pub struct ConfirmationTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    registry: Arc<ChainRegistry>,
    config: TrackerConfig,
    // 小写 hash -> (chain_id, record)
    records: RwLock<HashMap<String, (u64, TransactionRecord)>>,
    // (小写发送地址, chain_id) -> 最近一次跟踪的 hash
    latest: RwLock<HashMap<(String, u64), String>>,
    hooks: RwLock<Vec<Arc<dyn SettlementHook>>>,
    events: broadcast::Sender<TrackerEvent>,
}

impl ConfirmationTracker {
    pub fn new(registry: Arc<ChainRegistry>, config: TrackerConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(TrackerInner {
                registry,
                config,
                records: RwLock::new(HashMap::new()),
                latest: RwLock::new(HashMap::new()),
                hooks: RwLock::new(Vec::new()),
                events,
            }),
        }
    }

    pub fn add_hook(&self, hook: Arc<dyn SettlementHook>) {
        write(&self.inner.hooks).push(hook);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.inner.events.subscribe()
    }

    /// 开始跟踪；立即返回，轮询在后台任务中进行
    pub fn track(&self, chain_id: u64, hash: H256, seed: TransactionRecord) -> AppResult<TrackHandle> {
        let client = self.inner.registry.get_client(chain_id)?;
        let hash_str = format_hash(hash);
        let sender = address_format::normalize(&seed.from);

        write(&self.inner.records).insert(hash_str.clone(), (chain_id, seed));
        write(&self.inner.latest).insert((sender, chain_id), hash_str.clone());
        self.inner.prune();

        tracing::info!(
            chain_id,
            tx_hash = %redact_hex_string(&hash_str, 10),
            "Tracking transaction"
        );

        let inner = self.inner.clone();
        let join = tokio::spawn(async move { inner.run(client, chain_id, hash).await });
        Ok(TrackHandle {
            hash: hash_str,
            join,
        })
    }

    pub fn get(&self, hash: &str) -> Option<TransactionRecord> {
        read(&self.inner.records)
            .get(&hash.to_lowercase())
            .map(|(_, record)| record.clone())
    }

    /// 该地址在该链上最近一次跟踪的交易（用于合并到活动记录）
    pub fn latest(&self, address: &str, chain_id: u64) -> Option<TransactionRecord> {
        let key = (address_format::normalize(address), chain_id);
        let hash = read(&self.inner.latest).get(&key).cloned()?;
        self.get(&hash)
    }

    pub fn tracked_count(&self) -> usize {
        read(&self.inner.records).len()
    }

    pub fn pending_count(&self) -> usize {
        read(&self.inner.records)
            .values()
            .filter(|(_, r)| r.status == TxStatus::Pending)
            .count()
    }
}

impl TrackerInner {
    async fn run(&self, client: Arc<dyn ChainRpc>, chain_id: u64, hash: H256) -> TransactionRecord {
        let key = format_hash(hash);

        // 补全乐观记录的基本字段
        match client.get_transaction(hash).await {
            Ok(Some(tx)) => self.update(&key, |record| {
                record.from = address_format::to_checksum(&tx.from);
                if let Some(to) = tx.to {
                    record.to = address_format::to_checksum(&to);
                }
                record.value = format_ether(tx.value);
            }),
            Ok(None) => tracing::debug!(chain_id, tx_hash = %key, "Transaction not yet visible"),
            Err(e) => tracing::debug!(chain_id, tx_hash = %key, error = %e, "Transaction lookup failed"),
        }

        let mut polls: u32 = 0;
        let mut failures: u32 = 0;
        loop {
            metrics::count_receipt_poll();
            match client.get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    let status = TxStatus::from_receipt_status(receipt.status.map(|s| s.as_u64()));
                    return self.settle(chain_id, &key, status).await;
                }
                Ok(None) => failures = 0,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    // 单次失败不上报，只记录
                    tracing::debug!(
                        chain_id,
                        tx_hash = %key,
                        failures,
                        error = %e,
                        "Receipt poll failed, will retry"
                    );
                }
            }

            polls = polls.saturating_add(1);
            if let Some(max) = self.config.max_polls {
                if polls >= max {
                    tracing::warn!(chain_id, tx_hash = %key, polls, "Giving up on receipt");
                    return self.settle(chain_id, &key, TxStatus::Stuck).await;
                }
            }

            tokio::time::sleep(self.next_delay(failures)).await;
        }
    }

    /// 固定间隔；配置了退避上限时，连续失败按 2^n 放大间隔
    fn next_delay(&self, failures: u32) -> Duration {
        let base = self.config.poll_interval();
        match self.config.backoff_max_secs {
            Some(max_secs) if failures > 0 => {
                let factor = 2u32.saturating_pow(failures.min(16) - 1);
                base.saturating_mul(factor)
                    .min(Duration::from_secs(max_secs))
                    .max(base)
            }
            _ => base,
        }
    }

    async fn settle(&self, chain_id: u64, key: &str, status: TxStatus) -> TransactionRecord {
        self.update(key, |record| {
            if record.status.can_transition_to(&status) {
                record.status = status;
            }
        });

        let record = read(&self.records)
            .get(key)
            .map(|(_, r)| r.clone())
            .unwrap_or_else(|| TransactionRecord {
                hash: key.to_string(),
                from: String::new(),
                to: String::new(),
                value: "0".to_string(),
                timestamp: chrono::Utc::now().timestamp(),
                status,
            });

        metrics::count_settled(record.status.as_str());
        tracing::info!(
            chain_id,
            tx_hash = %redact_hex_string(key, 10),
            status = %record.status,
            "Transaction settled"
        );

        let hooks: Vec<Arc<dyn SettlementHook>> = read(&self.hooks).clone();
        for hook in hooks {
            hook.on_settled(chain_id, &record).await;
        }

        let _ = self.events.send(TrackerEvent {
            chain_id,
            record: record.clone(),
        });
        self.prune();
        record
    }

    /// 丢弃已进入终态且不再是任何地址最近一笔的记录
    fn prune(&self) {
        let latest: HashSet<String> = read(&self.latest).values().cloned().collect();
        write(&self.records)
            .retain(|hash, (_, record)| !record.status.is_final() || latest.contains(hash));
    }

    fn update(&self, key: &str, f: impl FnOnce(&mut TransactionRecord)) {
        if let Some((_, record)) = write(&self.records).get_mut(key) {
            f(record);
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
