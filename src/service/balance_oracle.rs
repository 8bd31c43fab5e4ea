//! 余额与 Gas 价格查询
//!
//! 多链余额并发查询并等待全部完成；单链失败以 "0" 代替并通过诊断通道上报，
//! 不会影响其他链的结果。

use std::{
    collections::{BTreeMap, HashMap},
    str::FromStr,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use futures::future::join_all;
use tokio::sync::broadcast;

use crate::{
    domain::{
        chain_config::ChainRegistry,
        transaction::{format_ether, format_gwei, TransactionRecord},
    },
    error::{AppError, AppResult},
    infrastructure::log_redact::redact_address,
    service::confirmation_tracker::SettlementHook,
    utils::address_format,
};

/// 会话内的余额缓存条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceEntry {
    pub wei: U256,
    pub formatted: String,
    pub fetched_at: DateTime<Utc>,
    /// 相关交易已确认但尚未重新查询成功
    pub stale: bool,
}

/// 单链查询失败的诊断信息
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub chain_id: u64,
    pub address: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

type BookKey = (String, u64);

pub struct BalanceOracle {
    registry: Arc<ChainRegistry>,
    book: RwLock<HashMap<BookKey, BalanceEntry>>,
    diagnostics: broadcast::Sender<Diagnostic>,
}

impl BalanceOracle {
    pub fn new(registry: Arc<ChainRegistry>) -> Self {
        let (diagnostics, _) = broadcast::channel(64);
        Self {
            registry,
            book: RwLock::new(HashMap::new()),
            diagnostics,
        }
    }

    pub fn subscribe_diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.diagnostics.subscribe()
    }

    /// 原生币余额（ether 十进制字符串）
    pub async fn get_balance(&self, address: &str, chain_id: u64) -> AppResult<String> {
        let addr = parse_address(address)?;
        let wei = self.fetch_wei(addr, chain_id).await?;
        Ok(format_ether(wei))
    }

    /// 查询余额（wei）并写入缓存
    pub async fn fetch_wei(&self, address: Address, chain_id: u64) -> AppResult<U256> {
        let client = self.registry.get_client(chain_id)?;
        let wei = client.get_balance(address).await.map_err(|e| {
            AppError::network_unavailable(format!("Balance query on chain {} failed: {}", chain_id, e))
        })?;

        let entry = BalanceEntry {
            wei,
            formatted: format_ether(wei),
            fetched_at: Utc::now(),
            stale: false,
        };
        self.write_book()
            .insert((book_key(&address), chain_id), entry);
        Ok(wei)
    }

    /// 当前 gas 价格（gwei 十进制字符串）
    pub async fn get_gas_price(&self, chain_id: u64) -> AppResult<String> {
        let client = self.registry.get_client(chain_id)?;
        let price = client.get_gas_price().await.map_err(|e| {
            AppError::network_unavailable(format!("Gas price query on chain {} failed: {}", chain_id, e))
        })?;
        Ok(format_gwei(price))
    }

    /// 查询所有已配置链的余额，每条链必有一个条目
    pub async fn get_all_balances(&self, address: &str) -> BTreeMap<u64, String> {
        let chain_ids = self.registry.chain_ids();
        let parsed = parse_address(address);

        let futures = chain_ids.iter().map(|&chain_id| {
            let parsed = parsed.clone();
            async move {
                let result = match parsed {
                    Ok(addr) => self.fetch_wei(addr, chain_id).await.map(format_ether),
                    Err(e) => Err(e),
                };
                (chain_id, result)
            }
        });

        let mut balances = BTreeMap::new();
        for (chain_id, result) in join_all(futures).await {
            match result {
                Ok(balance) => {
                    balances.insert(chain_id, balance);
                }
                Err(e) => {
                    tracing::warn!(
                        chain_id,
                        address = %redact_address(address),
                        error = %e,
                        "Balance query failed, reporting zero"
                    );
                    // 没有订阅者时发送失败是正常的
                    let _ = self.diagnostics.send(Diagnostic {
                        chain_id,
                        address: address.to_string(),
                        message: e.message.clone(),
                        at: Utc::now(),
                    });
                    balances.insert(chain_id, "0".to_string());
                }
            }
        }
        balances
    }

    pub fn cached(&self, address: &str, chain_id: u64) -> Option<BalanceEntry> {
        let key = (address_format::normalize(address), chain_id);
        self.read_book().get(&key).cloned()
    }

    /// 未过期的缓存余额（wei）
    pub fn fresh_balance(&self, address: &Address, chain_id: u64) -> Option<U256> {
        self.read_book()
            .get(&(book_key(address), chain_id))
            .filter(|e| !e.stale)
            .map(|e| e.wei)
    }

    pub fn mark_stale(&self, address: &str, chain_id: u64) {
        let key = (address_format::normalize(address), chain_id);
        if let Some(entry) = self.write_book().get_mut(&key) {
            entry.stale = true;
        }
    }

    /// 重新查询；失败时缓存保持 stale
    pub async fn refresh(&self, address: &str, chain_id: u64) -> AppResult<String> {
        self.get_balance(address, chain_id).await
    }

    fn read_book(&self) -> std::sync::RwLockReadGuard<'_, HashMap<BookKey, BalanceEntry>> {
        match self.book.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_book(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<BookKey, BalanceEntry>> {
        match self.book.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl SettlementHook for BalanceOracle {
    async fn on_settled(&self, chain_id: u64, record: &TransactionRecord) {
        let mut targets = vec![record.from.clone()];
        // 收款方如果也在本会话中查询过，一并刷新
        if self.cached(&record.to, chain_id).is_some() {
            targets.push(record.to.clone());
        }

        for address in targets {
            self.mark_stale(&address, chain_id);
            if let Err(e) = self.refresh(&address, chain_id).await {
                tracing::warn!(
                    chain_id,
                    address = %redact_address(&address),
                    error = %e,
                    "Balance refresh after settlement failed"
                );
            }
        }
    }
}

fn parse_address(address: &str) -> AppResult<Address> {
    Address::from_str(address.trim())
        .map_err(|_| AppError::invalid_request(format!("Invalid address: {}", address)))
}

fn book_key(address: &Address) -> String {
    format!("{:#x}", address)
}
