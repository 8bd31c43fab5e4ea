//! 配置管理模块
//! 支持从环境变量和配置文件加载配置

use std::{collections::HashSet, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    domain::chain_config::{default_chains, ChainConfig},
    service::address_validator::ExistencePolicy,
};

/// 应用配置结构体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_chains")]
    pub chains: Vec<ChainConfig>,
    /// 启动时选中的链，缺省为列表第一项
    #[serde(default)]
    pub default_chain_id: Option<u64>,
    #[serde(default)]
    pub explorer: ExplorerConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub activity: ActivityConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 区块浏览器历史接口配置（Etherscan v2 兼容）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorerConfig {
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub page_size: u32,
}

/// 交易确认轮询配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub poll_interval_secs: u64,
    /// 最大轮询次数，None 表示一直等到回执出现
    #[serde(default)]
    pub max_polls: Option<u32>,
    /// 网络错误时的指数退避上限，None 表示固定间隔重试
    #[serde(default)]
    pub backoff_max_secs: Option<u64>,
}

/// 收款地址校验配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    pub existence_policy: ExistencePolicy,
    pub debounce_ms: u64,
}

/// 活动记录配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityConfig {
    /// 连续加载失败达到该次数后视为持续不可用
    pub failure_threshold: u32,
}

/// 安全存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: String,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            api_url: std::env::var("EXPLORER_API_URL")
                .unwrap_or_else(|_| "https://api.etherscan.io/v2/api".into()),
            api_key: std::env::var("EXPLORER_API_KEY").ok().filter(|k| !k.is_empty()),
            page_size: std::env::var("HISTORY_PAGE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(25),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: std::env::var("TRACKER_POLL_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            max_polls: std::env::var("TRACKER_MAX_POLLS")
                .ok()
                .and_then(|s| s.parse().ok()),
            backoff_max_secs: std::env::var("TRACKER_BACKOFF_MAX_SECS")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }
}

impl TrackerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            existence_policy: std::env::var("ADDRESS_EXISTENCE_POLICY")
                .ok()
                .and_then(|v| ExistencePolicy::parse(&v))
                .unwrap_or(ExistencePolicy::RequireActivity),
            debounce_ms: std::env::var("ADDRESS_DEBOUNCE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
        }
    }
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            failure_threshold: std::env::var("HISTORY_FAILURE_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: std::env::var("WALLET_STORE_PATH").unwrap_or_else(|_| "./wallet.store".into()),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
        }
    }
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            chains: default_chains(),
            default_chain_id: std::env::var("DEFAULT_CHAIN_ID")
                .ok()
                .and_then(|s| s.parse().ok()),
            explorer: ExplorerConfig::default(),
            tracker: TrackerConfig::default(),
            validator: ValidatorConfig::default(),
            activity: ActivityConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        })
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// 从环境变量和配置文件合并加载（配置文件优先级更高，缺失的段落回落到环境变量）
    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut config = Self::from_env()?;

        if let Some(path) = path {
            if path.as_ref().exists() {
                config = Self::from_file(path)?;
            }
        }

        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            anyhow::bail!("At least one chain must be configured");
        }

        let mut seen = HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.chain_id) {
                anyhow::bail!("Duplicate chain_id {} in chain list", chain.chain_id);
            }
            if !chain.rpc_url.starts_with("http://") && !chain.rpc_url.starts_with("https://") {
                anyhow::bail!(
                    "Chain {} rpc_url must start with http:// or https://",
                    chain.chain_id
                );
            }
        }

        if let Some(id) = self.default_chain_id {
            if !seen.contains(&id) {
                anyhow::bail!("DEFAULT_CHAIN_ID {} is not in the chain list", id);
            }
        }

        if self.tracker.poll_interval_secs == 0 {
            anyhow::bail!("TRACKER_POLL_INTERVAL_SECS must be greater than 0");
        }

        if self.explorer.page_size == 0 || self.explorer.page_size > 10_000 {
            anyhow::bail!("HISTORY_PAGE_SIZE must be between 1 and 10000");
        }

        // 验证日志级别
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("LOG_LEVEL must be one of: {:?}", valid_levels);
        }

        // 验证日志格式
        if self.logging.format != "json" && self.logging.format != "text" {
            anyhow::bail!("LOG_FORMAT must be 'json' or 'text'");
        }

        Ok(())
    }
}
