//! 区块链 RPC 客户端
//!
//! `ChainRpc` 是引擎与链节点之间的唯一接缝，默认实现基于 ethers `Provider<Http>`。
//! 错误分为节点拒绝（有 JSON-RPC error 响应）与传输不可用两类，调用方据此映射业务错误。

use async_trait::async_trait;
use ethers::{
    providers::{Http, Middleware, Provider, ProviderError, RpcError as _},
    types::{
        transaction::eip2718::TypedTransaction, Address, BlockId, BlockNumber, Bytes, Transaction,
        TransactionReceipt, H256, U256,
    },
};

use crate::{infrastructure::log_redact::scrub, metrics};

/// RPC 调用失败
#[derive(Debug, thiserror::Error)]
pub enum RpcFailure {
    /// 节点返回了 JSON-RPC 错误（余额不足、nonce 冲突、格式错误等）
    #[error("rpc rejected: {0}")]
    Rejected(String),
    /// 连接失败、超时、HTTP 错误
    #[error("rpc unavailable: {0}")]
    Unavailable(String),
    /// 响应无法解析
    #[error("rpc decode error: {0}")]
    Decode(String),
}

impl RpcFailure {
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

impl From<ProviderError> for RpcFailure {
    fn from(err: ProviderError) -> Self {
        if let Some(resp) = err.as_error_response() {
            return Self::Rejected(scrub(&format!("{} (code {})", resp.message, resp.code)));
        }
        match err {
            ProviderError::SerdeJson(e) => Self::Decode(e.to_string()),
            ProviderError::HexError(e) => Self::Decode(e.to_string()),
            other => Self::Unavailable(scrub(&other.to_string())),
        }
    }
}

pub type RpcResult<T> = Result<T, RpcFailure>;

/// 单条链的 JSON-RPC 能力
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn get_balance(&self, address: Address) -> RpcResult<U256>;

    async fn get_gas_price(&self) -> RpcResult<U256>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> RpcResult<U256>;

    /// pending 区块视角的 nonce
    async fn get_transaction_count(&self, address: Address) -> RpcResult<U256>;

    async fn get_transaction(&self, hash: H256) -> RpcResult<Option<Transaction>>;

    async fn get_transaction_receipt(&self, hash: H256) -> RpcResult<Option<TransactionReceipt>>;

    async fn send_raw_transaction(&self, raw: Bytes) -> RpcResult<H256>;

    async fn get_code(&self, address: Address) -> RpcResult<Bytes>;
}

/// 基于 ethers HTTP Provider 的实现
#[derive(Debug, Clone)]
pub struct EthersRpcClient {
    provider: Provider<Http>,
}

impl EthersRpcClient {
    pub fn new(rpc_url: &str) -> anyhow::Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| anyhow::anyhow!("Invalid RPC url {}: {}", rpc_url, e))?;
        Ok(Self { provider })
    }
}

/// 记录一次 RPC 调用结果
fn observe<T>(method: &'static str, result: Result<T, ProviderError>) -> RpcResult<T> {
    match result {
        Ok(v) => {
            metrics::count_rpc_ok(method);
            Ok(v)
        }
        Err(e) => {
            metrics::count_rpc_err(method);
            let failure = RpcFailure::from(e);
            tracing::debug!(method, error = %failure, "RPC call failed");
            Err(failure)
        }
    }
}

#[async_trait]
impl ChainRpc for EthersRpcClient {
    async fn get_balance(&self, address: Address) -> RpcResult<U256> {
        observe("eth_getBalance", self.provider.get_balance(address, None).await)
    }

    async fn get_gas_price(&self) -> RpcResult<U256> {
        observe("eth_gasPrice", self.provider.get_gas_price().await)
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> RpcResult<U256> {
        observe("eth_estimateGas", self.provider.estimate_gas(tx, None).await)
    }

    async fn get_transaction_count(&self, address: Address) -> RpcResult<U256> {
        let block: BlockId = BlockNumber::Pending.into();
        observe(
            "eth_getTransactionCount",
            self.provider.get_transaction_count(address, Some(block)).await,
        )
    }

    async fn get_transaction(&self, hash: H256) -> RpcResult<Option<Transaction>> {
        observe(
            "eth_getTransactionByHash",
            self.provider.get_transaction(hash).await,
        )
    }

    async fn get_transaction_receipt(&self, hash: H256) -> RpcResult<Option<TransactionReceipt>> {
        observe(
            "eth_getTransactionReceipt",
            self.provider.get_transaction_receipt(hash).await,
        )
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> RpcResult<H256> {
        let pending = observe(
            "eth_sendRawTransaction",
            self.provider.send_raw_transaction(raw).await,
        )?;
        Ok(pending.tx_hash())
    }

    async fn get_code(&self, address: Address) -> RpcResult<Bytes> {
        observe("eth_getCode", self.provider.get_code(address, None).await)
    }
}
