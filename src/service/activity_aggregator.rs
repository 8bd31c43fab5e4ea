//! 活动记录聚合
//!
//! 每条链维护两个分页 feed（原生币转账、代币转账）。
//! - `load` 并发拉取两个 feed 的某一页并替换已有内容
//! - `load_more` 追加下一页；同一 (链, 标签页) 同时只允许一个请求，重复触发被抑制
//! - 加载期间 feed 被重载（代数变化）时，迟到的结果被丢弃
//! - 正在跟踪的交易总是排在原生 feed 第一位，并按 hash 去重

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
};

use async_trait::async_trait;
use serde::Serialize;

use crate::{
    domain::{
        transaction::{TokenTransferRecord, TransactionRecord},
        transaction_status::TxStatus,
    },
    error::{AppError, AppResult},
    infrastructure::{explorer_client::HistoryProvider, log_redact::redact_address},
    metrics,
    service::confirmation_tracker::SettlementHook,
    utils::address_format,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ActivityTab {
    Transactions,
    Transfers,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivityPage {
    pub native_txs: Vec<TransactionRecord>,
    pub token_txs: Vec<TokenTransferRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMoreOutcome {
    /// 追加了 n 条新记录
    Appended(usize),
    /// 下一页为空，什么也没做
    Empty,
    /// 已有同一标签页的请求在进行
    Suppressed,
    /// 请求期间 feed 被重载，结果作废
    Discarded,
    /// 历史接口不可用，计入连续失败次数，稍后可重试
    Failed,
}

#[derive(Debug, Clone, Default)]
struct ChainFeed {
    address: String,
    native: Vec<TransactionRecord>,
    tokens: Vec<TokenTransferRecord>,
    native_page: u32,
    token_page: u32,
    page_size: u32,
    generation: u64,
    consecutive_failures: u32,
}

impl ChainFeed {
    /// 记录一次失败；恰好达到阈值时告警一次
    fn note_failure(&mut self, chain_id: u64, threshold: u32) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures == threshold {
            tracing::warn!(
                chain_id,
                address = %redact_address(&self.address),
                failures = self.consecutive_failures,
                "History has been unavailable for several consecutive loads"
            );
        }
    }
}

type FlightKey = (u64, ActivityTab);

/// 释放时清除 in-flight 标记
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<FlightKey>>,
    key: FlightKey,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<FlightKey>>, key: FlightKey) -> Option<Self> {
        let mut flights = match set.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !flights.insert(key) {
            return None;
        }
        Some(Self { set, key })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut flights = match self.set.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        flights.remove(&self.key);
    }
}

pub struct ActivityAggregator {
    history: Arc<dyn HistoryProvider>,
    default_page_size: u32,
    failure_threshold: u32,
    feeds: RwLock<HashMap<u64, ChainFeed>>,
    in_flight: Mutex<HashSet<FlightKey>>,
    generations: AtomicU64,
}

impl ActivityAggregator {
    pub fn new(history: Arc<dyn HistoryProvider>, page_size: u32, failure_threshold: u32) -> Self {
        Self {
            history,
            default_page_size: page_size,
            failure_threshold,
            feeds: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            generations: AtomicU64::new(0),
        }
    }

    pub fn page_size(&self) -> u32 {
        self.default_page_size
    }

    /// 加载某一页（通常为第 1 页），两个 feed 并发请求
    ///
    /// 单个 feed 失败时保留其旧内容；两个都失败时返回 NetworkUnavailable。
    pub async fn load(
        &self,
        address: &str,
        chain_id: u64,
        page: u32,
        page_size: u32,
    ) -> AppResult<ActivityPage> {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut feeds = self.write_feeds();
            let feed = feeds.entry(chain_id).or_default();
            if !feed.address.eq_ignore_ascii_case(address) {
                *feed = ChainFeed {
                    address: address.to_string(),
                    ..ChainFeed::default()
                };
            }
            feed.generation = generation;
            feed.page_size = page_size;
        }

        let (native, tokens) = tokio::join!(
            self.history.native_transfers(address, chain_id, page, page_size),
            self.history.token_transfers(address, chain_id, page, page_size),
        );

        let both_failed = native.is_err() && tokens.is_err();
        let any_failed = native.is_err() || tokens.is_err();
        if let Err(e) = &native {
            metrics::count_history_error();
            tracing::debug!(chain_id, error = %e, "Native history fetch failed");
        }
        if let Err(e) = &tokens {
            metrics::count_history_error();
            tracing::debug!(chain_id, error = %e, "Token history fetch failed");
        }

        let mut feeds = self.write_feeds();
        let feed = feeds.entry(chain_id).or_default();
        if feed.generation != generation {
            tracing::debug!(chain_id, "Feed reloaded during fetch, discarding result");
            return Ok(ActivityPage {
                native_txs: native.unwrap_or_default(),
                token_txs: tokens.unwrap_or_default(),
            });
        }

        if let Ok(records) = native {
            feed.native = records;
            feed.native_page = page;
        }
        if let Ok(records) = tokens {
            feed.tokens = records;
            feed.token_page = page;
        }

        if any_failed {
            feed.note_failure(chain_id, self.failure_threshold);
        } else {
            feed.consecutive_failures = 0;
        }

        if both_failed {
            return Err(AppError::network_unavailable(format!(
                "History for chain {} is unavailable",
                chain_id
            )));
        }

        Ok(ActivityPage {
            native_txs: feed.native.clone(),
            token_txs: feed.tokens.clone(),
        })
    }

    /// 为当前标签页追加下一页
    ///
    /// 接口失败不返回错误，只计入连续失败次数，由 `is_degraded` 统一提示。
    pub async fn load_more(
        &self,
        address: &str,
        chain_id: u64,
        tab: ActivityTab,
        next_page: u32,
    ) -> AppResult<LoadMoreOutcome> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, (chain_id, tab)) else {
            tracing::debug!(chain_id, ?tab, "Load more already in flight, suppressed");
            return Ok(LoadMoreOutcome::Suppressed);
        };

        let (generation, page_size) = {
            let mut feeds = self.write_feeds();
            let feed = feeds.entry(chain_id).or_default();
            if feed.address.is_empty() {
                feed.address = address.to_string();
            }
            if feed.page_size == 0 {
                feed.page_size = self.default_page_size;
            }
            (feed.generation, feed.page_size)
        };

        let fetched = match tab {
            ActivityTab::Transactions => self
                .history
                .native_transfers(address, chain_id, next_page, page_size)
                .await
                .map(FetchedPage::Native),
            ActivityTab::Transfers => self
                .history
                .token_transfers(address, chain_id, next_page, page_size)
                .await
                .map(FetchedPage::Tokens),
        };

        let mut feeds = self.write_feeds();
        let feed = feeds.entry(chain_id).or_default();

        let fetched = match fetched {
            Ok(page) => page,
            Err(e) => {
                metrics::count_history_error();
                tracing::debug!(chain_id, ?tab, page = next_page, error = %e, "Load more failed");
                feed.note_failure(chain_id, self.failure_threshold);
                return Ok(LoadMoreOutcome::Failed);
            }
        };

        if feed.generation != generation || !feed.address.eq_ignore_ascii_case(address) {
            return Ok(LoadMoreOutcome::Discarded);
        }
        feed.consecutive_failures = 0;

        match fetched {
            FetchedPage::Native(records) if records.is_empty() => Ok(LoadMoreOutcome::Empty),
            FetchedPage::Tokens(records) if records.is_empty() => Ok(LoadMoreOutcome::Empty),
            FetchedPage::Native(records) => {
                let known: HashSet<String> =
                    feed.native.iter().map(|r| r.hash.to_lowercase()).collect();
                let before = feed.native.len();
                feed.native.extend(
                    records
                        .into_iter()
                        .filter(|r| !known.contains(&r.hash.to_lowercase())),
                );
                feed.native_page = next_page;
                Ok(LoadMoreOutcome::Appended(feed.native.len() - before))
            }
            FetchedPage::Tokens(records) => {
                let appended = records.len();
                feed.tokens.extend(records);
                feed.token_page = next_page;
                Ok(LoadMoreOutcome::Appended(appended))
            }
        }
    }

    /// 原生 feed，合并正在跟踪的交易
    pub fn native_feed(&self, chain_id: u64, tracked: Option<&TransactionRecord>) -> Vec<TransactionRecord> {
        let feeds = self.read_feeds();
        let history = feeds.get(&chain_id).map(|f| f.native.as_slice()).unwrap_or(&[]);
        merge_tracked(tracked, history)
    }

    pub fn token_feed(&self, chain_id: u64) -> Vec<TokenTransferRecord> {
        self.read_feeds()
            .get(&chain_id)
            .map(|f| f.tokens.clone())
            .unwrap_or_default()
    }

    /// 下一次 load_more 应请求的页码
    pub fn next_page(&self, chain_id: u64, tab: ActivityTab) -> u32 {
        let feeds = self.read_feeds();
        let current = feeds
            .get(&chain_id)
            .map(|f| match tab {
                ActivityTab::Transactions => f.native_page,
                ActivityTab::Transfers => f.token_page,
            })
            .unwrap_or(0);
        current + 1
    }

    /// 连续失败达到阈值，应提示用户历史记录暂不可用
    pub fn is_degraded(&self, chain_id: u64) -> bool {
        self.read_feeds()
            .get(&chain_id)
            .map(|f| f.consecutive_failures >= self.failure_threshold)
            .unwrap_or(false)
    }

    fn read_feeds(&self) -> std::sync::RwLockReadGuard<'_, HashMap<u64, ChainFeed>> {
        match self.feeds.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_feeds(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<u64, ChainFeed>> {
        match self.feeds.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

enum FetchedPage {
    Native(Vec<TransactionRecord>),
    Tokens(Vec<TokenTransferRecord>),
}

/// 跟踪中的交易放在最前，按 hash 去重
///
/// 重复项保留第一次出现的位置，状态取最后一次出现的值；
/// Pending 不会覆盖已经是终态的状态。
pub fn merge_tracked(
    tracked: Option<&TransactionRecord>,
    history: &[TransactionRecord],
) -> Vec<TransactionRecord> {
    let mut merged: Vec<TransactionRecord> = Vec::with_capacity(history.len() + 1);
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in tracked.into_iter().chain(history.iter()) {
        let key = address_format::normalize(&record.hash);
        match index.get(&key) {
            Some(&pos) => {
                let existing = &mut merged[pos];
                if !(record.status == TxStatus::Pending && existing.status.is_final()) {
                    existing.status = record.status;
                }
            }
            None => {
                index.insert(key, merged.len());
                merged.push(record.clone());
            }
        }
    }
    merged
}

#[async_trait]
impl SettlementHook for ActivityAggregator {
    async fn on_settled(&self, chain_id: u64, _record: &TransactionRecord) {
        let loaded = self
            .read_feeds()
            .get(&chain_id)
            .filter(|f| !f.address.is_empty())
            .map(|f| (f.address.clone(), f.page_size.max(1)));

        let Some((address, page_size)) = loaded else {
            return;
        };
        if let Err(e) = self.load(&address, chain_id, 1, page_size).await {
            tracing::warn!(chain_id, error = %e, "Activity reload after settlement failed");
        }
    }
}
