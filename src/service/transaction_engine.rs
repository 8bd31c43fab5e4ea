//! 交易引擎：校验 → 估算 → 签名 → 广播
//!
//! 广播成功后立即返回交易哈希与乐观的 Pending 记录，确认由 ConfirmationTracker 负责。
//! 任何一步失败都不会产生乐观记录。

use std::sync::Arc;

use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, TransactionRequest as EthTxRequest, U256,
};

use crate::{
    domain::{
        chain_config::ChainRegistry,
        identity::Identity,
        transaction::{
            format_ether, format_hash, CostEstimate, Submission, TransactionRecord,
            TransactionRequest, ValidatedRequest,
        },
    },
    error::{AppError, AppResult},
    infrastructure::{
        log_redact::{redact_address, redact_hex_string},
        rpc_client::ChainRpc,
    },
    metrics,
    service::balance_oracle::BalanceOracle,
};

pub struct TransactionEngine {
    registry: Arc<ChainRegistry>,
    oracle: Arc<BalanceOracle>,
}

impl TransactionEngine {
    pub fn new(registry: Arc<ChainRegistry>, oracle: Arc<BalanceOracle>) -> Self {
        Self { registry, oracle }
    }

    /// 估算手续费；失败返回 EstimationFailed，由调用方决定是否继续
    pub async fn estimate_cost(
        &self,
        request: &TransactionRequest,
        from: Address,
    ) -> AppResult<CostEstimate> {
        let validated = request.validate_shape()?;
        let client = self.registry.get_client(validated.chain_id)?;
        let tx = build_transaction(from, &validated).into();
        estimate(client.as_ref(), &tx, validated.chain_id).await
    }

    /// 发送原生币转账
    pub async fn send(&self, request: &TransactionRequest, identity: &Identity) -> AppResult<Submission> {
        // 1. 结构校验（不访问网络）
        let validated = request.validate_shape()?;
        let chain_id = validated.chain_id;
        let client = self.registry.get_client(chain_id)?;
        let from = identity.address();

        let balance = match self.oracle.fresh_balance(&from, chain_id) {
            Some(balance) => balance,
            None => self.oracle.fetch_wei(from, chain_id).await?,
        };
        if validated.value > balance {
            return Err(AppError::invalid_request(format!(
                "Insufficient balance: {} available, {} requested",
                format_ether(balance),
                format_ether(validated.value)
            )));
        }

        // 2. 估算 gas、获取 nonce
        let draft = build_transaction(from, &validated);
        let estimate = estimate(client.as_ref(), &draft.clone().into(), chain_id).await?;
        let nonce = client.get_transaction_count(from).await.map_err(|e| {
            AppError::estimation_failed(format!("Failed to fetch nonce on chain {}: {}", chain_id, e))
        })?;

        let total = validated.value.checked_add(estimate.fee_wei()).unwrap_or(U256::MAX);
        if total > balance {
            return Err(AppError::invalid_request(format!(
                "Insufficient balance for amount plus fee: {} available, {} required",
                format_ether(balance),
                format_ether(total)
            )));
        }

        // 3. 签名
        let tx: TypedTransaction = draft
            .gas(estimate.gas_limit)
            .gas_price(estimate.gas_price)
            .nonce(nonce)
            .into();
        let signed = identity.sign(&tx).map_err(|e| {
            tracing::error!(chain_id, error = %e, "Transaction signing failed");
            e
        })?;

        // 4. 广播
        let hash = match client.send_raw_transaction(signed.raw.clone()).await {
            Ok(hash) => {
                metrics::count_broadcast(true);
                hash
            }
            Err(e) if e.is_rejection() => {
                metrics::count_broadcast(false);
                tracing::warn!(chain_id, error = %e, "Broadcast rejected by node");
                return Err(AppError::broadcast_rejected(e.to_string()));
            }
            Err(e) => {
                tracing::warn!(chain_id, error = %e, "Broadcast transport failed");
                return Err(AppError::network_unavailable(format!(
                    "Broadcast on chain {} failed: {}",
                    chain_id, e
                )));
            }
        };

        if hash != signed.hash {
            tracing::warn!(
                chain_id,
                local = %redact_hex_string(&format_hash(signed.hash), 10),
                remote = %redact_hex_string(&format_hash(hash), 10),
                "Node returned a different transaction hash"
            );
        }

        tracing::info!(
            chain_id,
            from = %redact_address(&identity.address_string()),
            nonce = %nonce,
            tx_hash = %redact_hex_string(&format_hash(hash), 10),
            "Transaction broadcast"
        );

        // 5. 乐观记录
        let record = TransactionRecord::pending(hash, from, validated.to, validated.value);
        Ok(Submission {
            hash: record.hash.clone(),
            chain_id,
            record,
        })
    }
}

/// EIP-155 legacy 交易草稿（gas / nonce 稍后填充）
fn build_transaction(from: Address, request: &ValidatedRequest) -> EthTxRequest {
    EthTxRequest::new()
        .from(from)
        .to(request.to)
        .value(request.value)
        .chain_id(request.chain_id)
}

async fn estimate(client: &dyn ChainRpc, tx: &TypedTransaction, chain_id: u64) -> AppResult<CostEstimate> {
    let (gas_limit, gas_price) = tokio::try_join!(client.estimate_gas(tx), client.get_gas_price())
        .map_err(|e| {
            tracing::debug!(chain_id, error = %e, "Gas estimation failed");
            AppError::estimation_failed(format!("Gas estimation on chain {} failed: {}", chain_id, e))
        })?;
    Ok(CostEstimate::new(gas_limit, gas_price))
}
