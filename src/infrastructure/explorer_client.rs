//! 区块浏览器历史接口
//!
//! Etherscan v2 统一端点：`?chainid=..&module=account&action=txlist|tokentx&page=..&offset=..&sort=desc`

use std::time::Duration;

use async_trait::async_trait;
use ethers::types::U256;
use serde::Deserialize;

use crate::{
    config::ExplorerConfig,
    domain::{
        transaction::{format_decimals, format_ether, TokenTransferRecord, TransactionRecord},
        transaction_status::TxStatus,
    },
    error::{AppError, AppResult},
    infrastructure::log_redact::redact_address,
};

/// 历史记录来源
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// 原生币转账，按时间倒序
    async fn native_transfers(
        &self,
        address: &str,
        chain_id: u64,
        page: u32,
        offset: u32,
    ) -> AppResult<Vec<TransactionRecord>>;

    /// 代币转账，按时间倒序
    async fn token_transfers(
        &self,
        address: &str,
        chain_id: u64,
        page: u32,
        offset: u32,
    ) -> AppResult<Vec<TokenTransferRecord>>;
}

#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    status: String,
    message: String,
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNativeTx {
    hash: String,
    from: String,
    #[serde(default)]
    to: String,
    value: String,
    time_stamp: String,
    #[serde(default)]
    is_error: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTokenTx {
    hash: String,
    from: String,
    #[serde(default)]
    to: String,
    value: String,
    time_stamp: String,
    contract_address: String,
    #[serde(default)]
    token_symbol: String,
    #[serde(default)]
    token_name: String,
    #[serde(default)]
    token_decimal: String,
}

impl From<RawNativeTx> for TransactionRecord {
    fn from(raw: RawNativeTx) -> Self {
        let value = U256::from_dec_str(&raw.value).unwrap_or_default();
        Self {
            hash: raw.hash,
            from: raw.from,
            to: raw.to,
            value: format_ether(value),
            timestamp: raw.time_stamp.parse().unwrap_or(0),
            status: if raw.is_error == "1" {
                TxStatus::Failed
            } else {
                TxStatus::Confirmed
            },
        }
    }
}

impl From<RawTokenTx> for TokenTransferRecord {
    fn from(raw: RawTokenTx) -> Self {
        let value = U256::from_dec_str(&raw.value).unwrap_or_default();
        let decimals = raw.token_decimal.parse::<u32>().unwrap_or(18);
        Self {
            hash: raw.hash,
            from: raw.from,
            to: raw.to,
            value: format_decimals(value, decimals),
            timestamp: raw.time_stamp.parse().unwrap_or(0),
            status: TxStatus::Confirmed,
            contract_address: raw.contract_address,
            symbol: raw.token_symbol,
            token_name: raw.token_name,
        }
    }
}

/// Etherscan 兼容客户端
#[derive(Debug, Clone)]
pub struct EtherscanClient {
    http: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

impl EtherscanClient {
    pub fn new(config: &ExplorerConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        if config.api_key.is_none() {
            tracing::warn!("EXPLORER_API_KEY not set, history requests may be rate limited");
        }
        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        action: &str,
        address: &str,
        chain_id: u64,
        page: u32,
        offset: u32,
    ) -> AppResult<Vec<T>> {
        let mut query: Vec<(&str, String)> = vec![
            ("chainid", chain_id.to_string()),
            ("module", "account".to_string()),
            ("action", action.to_string()),
            ("address", address.to_string()),
            ("page", page.to_string()),
            ("offset", offset.to_string()),
            ("sort", "desc".to_string()),
        ];
        if let Some(key) = &self.api_key {
            query.push(("apikey", key.clone()));
        }

        let resp = self
            .http
            .get(&self.api_url)
            .query(&query)
            .send()
            .await
            .map_err(|e| AppError::network_unavailable(format!("Explorer request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(AppError::network_unavailable(format!(
                "Explorer HTTP {}",
                resp.status()
            )));
        }

        let body: ExplorerResponse = resp
            .json()
            .await
            .map_err(|e| AppError::network_unavailable(format!("Explorer decode failed: {}", e)))?;

        parse_result(action, body)
    }
}

/// status = "0" 时区分"没有记录"和真正的错误
fn parse_result<T: serde::de::DeserializeOwned>(
    action: &str,
    body: ExplorerResponse,
) -> AppResult<Vec<T>> {
    if body.status != "1" {
        if body.message.starts_with("No transactions found")
            || body.message.starts_with("No token transfers found")
            || body.result.as_array().map(|a| a.is_empty()).unwrap_or(false)
        {
            return Ok(Vec::new());
        }
        let detail = body
            .result
            .as_str()
            .map(|s| s.to_string())
            .unwrap_or_else(|| body.message.clone());
        return Err(AppError::network_unavailable(format!(
            "Explorer {} error: {}",
            action, detail
        )));
    }

    serde_json::from_value(body.result)
        .map_err(|e| AppError::network_unavailable(format!("Explorer {} decode: {}", action, e)))
}

#[async_trait]
impl HistoryProvider for EtherscanClient {
    async fn native_transfers(
        &self,
        address: &str,
        chain_id: u64,
        page: u32,
        offset: u32,
    ) -> AppResult<Vec<TransactionRecord>> {
        tracing::debug!(
            address = %redact_address(address),
            chain_id,
            page,
            "Fetching native history"
        );
        let raw: Vec<RawNativeTx> = self.fetch("txlist", address, chain_id, page, offset).await?;
        Ok(raw.into_iter().map(TransactionRecord::from).collect())
    }

    async fn token_transfers(
        &self,
        address: &str,
        chain_id: u64,
        page: u32,
        offset: u32,
    ) -> AppResult<Vec<TokenTransferRecord>> {
        tracing::debug!(
            address = %redact_address(address),
            chain_id,
            page,
            "Fetching token history"
        );
        let raw: Vec<RawTokenTx> = self.fetch("tokentx", address, chain_id, page, offset).await?;
        Ok(raw.into_iter().map(TokenTransferRecord::from).collect())
    }
}
