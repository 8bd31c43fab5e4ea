//! 多链配置模块
//!
//! 定义支持的 EVM 链、当前选中的链，以及按链懒加载的 RPC 客户端

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppResult},
    infrastructure::rpc_client::{ChainRpc, EthersRpcClient},
};

/// 链配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// 链 ID (EIP-155)
    pub chain_id: u64,
    /// 链名称
    pub name: String,
    /// 原生币符号
    pub symbol: String,
    /// JSON-RPC 端点
    pub rpc_url: String,
    /// 区块浏览器根地址
    pub explorer_url: String,
    /// 展示色
    pub color: String,
}

impl ChainConfig {
    pub fn explorer_tx_url(&self, hash: &str) -> String {
        format!("{}/tx/{}", self.explorer_url.trim_end_matches('/'), hash)
    }

    pub fn explorer_address_url(&self, address: &str) -> String {
        format!("{}/address/{}", self.explorer_url.trim_end_matches('/'), address)
    }
}

/// 默认支持的链（RPC 端点可通过环境变量覆盖）
pub fn default_chains() -> Vec<ChainConfig> {
    vec![
        ChainConfig {
            chain_id: 11155111,
            name: "Sepolia".to_string(),
            symbol: "ETH".to_string(),
            rpc_url: std::env::var("SEPOLIA_RPC_URL")
                .unwrap_or_else(|_| "https://ethereum-sepolia-rpc.publicnode.com".into()),
            explorer_url: "https://sepolia.etherscan.io".to_string(),
            color: "#627EEA".to_string(),
        },
        ChainConfig {
            chain_id: 137,
            name: "Polygon".to_string(),
            symbol: "MATIC".to_string(),
            rpc_url: std::env::var("POLYGON_RPC_URL")
                .unwrap_or_else(|_| "https://polygon-rpc.com/".into()),
            explorer_url: "https://polygonscan.com".to_string(),
            color: "#8247E5".to_string(),
        },
        ChainConfig {
            chain_id: 8453,
            name: "Base".to_string(),
            symbol: "ETH".to_string(),
            rpc_url: std::env::var("BASE_RPC_URL")
                .unwrap_or_else(|_| "https://mainnet.base.org".into()),
            explorer_url: "https://basescan.org".to_string(),
            color: "#0052FF".to_string(),
        },
    ]
}

/// RPC 客户端构造器
pub type RpcFactory = Arc<dyn Fn(&ChainConfig) -> anyhow::Result<Arc<dyn ChainRpc>> + Send + Sync>;

/// 链注册表
///
/// 链列表在构造后不可变；选中指针和客户端缓存是仅有的可变状态，
/// 锁只在同步代码段内持有，不跨 await。
pub struct ChainRegistry {
    configs: Vec<ChainConfig>,
    selected: RwLock<u64>,
    clients: RwLock<HashMap<u64, Arc<dyn ChainRpc>>>,
    factory: RpcFactory,
}

impl std::fmt::Debug for ChainRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainRegistry")
            .field("chains", &self.chain_ids())
            .field("selected", &self.selected())
            .finish()
    }
}

impl ChainRegistry {
    /// 使用 ethers HTTP Provider 作为客户端
    pub fn new(configs: Vec<ChainConfig>, default_chain_id: Option<u64>) -> AppResult<Self> {
        let factory: RpcFactory = Arc::new(|config: &ChainConfig| {
            let client = EthersRpcClient::new(&config.rpc_url)?;
            Ok(Arc::new(client) as Arc<dyn ChainRpc>)
        });
        Self::with_factory(configs, default_chain_id, factory)
    }

    /// 自定义客户端构造器（测试中注入 mock）
    pub fn with_factory(
        configs: Vec<ChainConfig>,
        default_chain_id: Option<u64>,
        factory: RpcFactory,
    ) -> AppResult<Self> {
        let first = configs
            .first()
            .map(|c| c.chain_id)
            .ok_or_else(|| AppError::invalid_request("Chain list is empty"))?;

        let selected = match default_chain_id {
            Some(id) if configs.iter().any(|c| c.chain_id == id) => id,
            Some(id) => return Err(AppError::unsupported_chain(id)),
            None => first,
        };

        Ok(Self {
            configs,
            selected: RwLock::new(selected),
            clients: RwLock::new(HashMap::new()),
            factory,
        })
    }

    pub fn list(&self) -> &[ChainConfig] {
        &self.configs
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        self.configs.iter().map(|c| c.chain_id).collect()
    }

    pub fn get(&self, chain_id: u64) -> AppResult<&ChainConfig> {
        self.configs
            .iter()
            .find(|c| c.chain_id == chain_id)
            .ok_or_else(|| AppError::unsupported_chain(chain_id))
    }

    pub fn contains(&self, chain_id: u64) -> bool {
        self.configs.iter().any(|c| c.chain_id == chain_id)
    }

    pub fn selected(&self) -> u64 {
        match self.selected.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn selected_config(&self) -> &ChainConfig {
        let id = self.selected();
        // selected 只会被设置为列表中的 id
        self.configs
            .iter()
            .find(|c| c.chain_id == id)
            .unwrap_or(&self.configs[0])
    }

    /// 切换当前链；未知链 id 直接报错，选中状态不变
    pub fn select(&self, chain_id: u64) -> AppResult<()> {
        if !self.contains(chain_id) {
            return Err(AppError::unsupported_chain(chain_id));
        }
        let mut guard = match self.selected.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = chain_id;
        tracing::info!(chain_id, "Selected chain changed");
        Ok(())
    }

    /// 获取（或首次构造）某条链的 RPC 客户端，客户端在会话期间不关闭
    pub fn get_client(&self, chain_id: u64) -> AppResult<Arc<dyn ChainRpc>> {
        {
            let cache = match self.clients.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(client) = cache.get(&chain_id) {
                return Ok(client.clone());
            }
        }

        let config = self.get(chain_id)?;
        let mut cache = match self.clients.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // 双重检查：等写锁期间可能已被其他任务创建
        if let Some(client) = cache.get(&chain_id) {
            return Ok(client.clone());
        }

        let client = (self.factory)(config).map_err(|e| {
            tracing::error!(chain_id, error = ?e, "Failed to construct RPC client");
            AppError::network_unavailable(format!("Cannot create RPC client: {}", e))
        })?;
        tracing::debug!(chain_id, rpc_url = %config.rpc_url, "RPC client created");
        cache.insert(chain_id, client.clone());
        Ok(client)
    }
}
