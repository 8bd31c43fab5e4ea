//! 交易领域模型
//!
//! 金额在边界处统一为十进制字符串（以 ether 为单位），链上计算使用 wei (`U256`)。

use std::str::FromStr;

use ethers::{
    types::{Address, H256, U256},
    utils::{format_units, parse_units},
};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    domain::transaction_status::TxStatus,
    error::{AppError, AppResult},
    utils::address_format,
};

/// 原生币精度
pub const NATIVE_DECIMALS: u32 = 18;

/// 用户发起的原生币转账
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub to_address: String,
    /// 十进制字符串，单位 ether
    pub amount: String,
    pub chain_id: u64,
}

impl TransactionRequest {
    pub fn new(to_address: impl Into<String>, amount: impl Into<String>, chain_id: u64) -> Self {
        Self {
            to_address: to_address.into(),
            amount: amount.into(),
            chain_id,
        }
    }

    /// 结构校验（不访问网络）：收款地址格式、金额为正且不超过 18 位小数
    pub fn validate_shape(&self) -> AppResult<ValidatedRequest> {
        if !address_format::is_valid_evm_address(&self.to_address) {
            return Err(AppError::invalid_request(format!(
                "Recipient {} is not a valid address",
                self.to_address
            )));
        }
        let to = Address::from_str(&self.to_address)
            .map_err(|e| AppError::invalid_request(format!("Invalid recipient: {}", e)))?;
        let value = parse_amount(&self.amount)?;
        Ok(ValidatedRequest {
            to,
            value,
            chain_id: self.chain_id,
        })
    }
}

/// 通过结构校验的请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub to: Address,
    pub value: U256,
    pub chain_id: u64,
}

/// 交易记录（原生币）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: String,
    pub from: String,
    pub to: String,
    /// 十进制字符串，单位 ether
    pub value: String,
    /// Unix 秒
    pub timestamp: i64,
    pub status: TxStatus,
}

impl TransactionRecord {
    /// 广播成功时创建的乐观记录
    pub fn pending(hash: H256, from: Address, to: Address, value: U256) -> Self {
        Self {
            hash: format_hash(hash),
            from: address_format::to_checksum(&from),
            to: address_format::to_checksum(&to),
            value: format_ether(value),
            timestamp: chrono::Utc::now().timestamp(),
            status: TxStatus::Pending,
        }
    }
}

/// 代币转账记录，浏览器只返回已上链的转账
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransferRecord {
    pub hash: String,
    pub from: String,
    pub to: String,
    pub value: String,
    pub timestamp: i64,
    pub status: TxStatus,
    pub contract_address: String,
    pub symbol: String,
    pub token_name: String,
}

/// 手续费估算
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CostEstimate {
    pub gas_limit: U256,
    /// wei
    pub gas_price: U256,
    pub gas_price_gwei: String,
    /// gas_limit × gas_price，单位 ether
    pub total_fee: String,
}

impl CostEstimate {
    pub fn new(gas_limit: U256, gas_price: U256) -> Self {
        let fee = gas_limit.saturating_mul(gas_price);
        Self {
            gas_limit,
            gas_price,
            gas_price_gwei: format_gwei(gas_price),
            total_fee: format_ether(fee),
        }
    }

    pub fn fee_wei(&self) -> U256 {
        self.gas_limit.saturating_mul(self.gas_price)
    }
}

/// 广播结果：立即返回，不等待确认
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub hash: String,
    pub chain_id: u64,
    pub record: TransactionRecord,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 金额换算
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 只接受纯十进制写法，拒绝指数、下划线和符号
static AMOUNT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+(?:\.[0-9]+)?$").unwrap());

/// 解析用户输入的 ether 金额为 wei，必须为正数且最多 18 位有效小数
pub fn parse_amount(amount: &str) -> AppResult<U256> {
    let trimmed = amount.trim();
    if !AMOUNT_RE.is_match(trimmed) {
        return Err(AppError::invalid_request(format!(
            "Amount '{}' is not a plain decimal number",
            amount
        )));
    }
    let decimal = Decimal::from_str(trimmed)
        .map_err(|_| AppError::invalid_request(format!("Amount '{}' is not a number", amount)))?;
    if decimal <= Decimal::ZERO {
        return Err(AppError::invalid_request("Amount must be greater than zero"));
    }
    let decimal = decimal.normalize();
    if decimal.scale() > NATIVE_DECIMALS {
        return Err(AppError::invalid_request(
            "Amount has more than 18 decimal places",
        ));
    }
    let wei: U256 = parse_units(decimal.to_string(), NATIVE_DECIMALS)
        .map_err(|e| AppError::invalid_request(format!("Amount out of range: {}", e)))?
        .into();
    if wei.is_zero() {
        return Err(AppError::invalid_request("Amount must be greater than zero"));
    }
    Ok(wei)
}

/// wei → ether 十进制字符串（去掉多余的 0，至少保留一位小数）
pub fn format_ether(wei: U256) -> String {
    format_decimals(wei, NATIVE_DECIMALS)
}

pub fn format_gwei(wei: U256) -> String {
    format_decimals(wei, 9)
}

/// 按代币精度格式化
pub fn format_decimals(amount: U256, decimals: u32) -> String {
    match format_units(amount, decimals) {
        Ok(s) => trim_decimal(s),
        Err(_) => amount.to_string(),
    }
}

fn trim_decimal(mut s: String) -> String {
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.push('0');
        }
    }
    s
}

pub fn format_hash(hash: H256) -> String {
    format!("{:#x}", hash)
}

pub fn parse_hash(hash: &str) -> AppResult<H256> {
    H256::from_str(hash).map_err(|e| AppError::invalid_request(format!("Invalid tx hash: {}", e)))
}
