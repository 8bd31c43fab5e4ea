//! 统一错误类型
//!
//! 钱包引擎所有对外操作返回 `AppResult<T>`，错误按 `FailureKind` 分类：
//! - 校验类错误（InvalidPhrase/InvalidKey/InvalidRequest）可由用户修正
//! - EstimationFailed 可降级为警告
//! - BroadcastRejected/StorageWrite 终止当前操作，不留下部分状态

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidPhrase,
    InvalidKey,
    InvalidRequest,
    EstimationFailed,
    SigningFailed,
    BroadcastRejected,
    StorageWrite,
    NetworkUnavailable,
    UnsupportedChain,
    NoWallet,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidPhrase => "invalid_phrase",
            Self::InvalidKey => "invalid_key",
            Self::InvalidRequest => "invalid_request",
            Self::EstimationFailed => "estimation_failed",
            Self::SigningFailed => "signing_failed",
            Self::BroadcastRejected => "broadcast_rejected",
            Self::StorageWrite => "storage_write",
            Self::NetworkUnavailable => "network_unavailable",
            Self::UnsupportedChain => "unsupported_chain",
            Self::NoWallet => "no_wallet",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct AppError {
    pub kind: FailureKind,
    pub message: String,
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn new(kind: FailureKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
        }
    }

    pub fn invalid_phrase(msg: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidPhrase, msg)
    }

    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidKey, msg)
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidRequest, msg)
    }

    pub fn estimation_failed(msg: impl Into<String>) -> Self {
        Self::new(FailureKind::EstimationFailed, msg)
    }

    pub fn signing_failed(msg: impl Into<String>) -> Self {
        Self::new(FailureKind::SigningFailed, msg)
    }

    pub fn broadcast_rejected(msg: impl Into<String>) -> Self {
        Self::new(FailureKind::BroadcastRejected, msg)
    }

    pub fn storage_write(msg: impl Into<String>) -> Self {
        Self::new(FailureKind::StorageWrite, msg)
    }

    pub fn network_unavailable(msg: impl Into<String>) -> Self {
        Self::new(FailureKind::NetworkUnavailable, msg)
    }

    pub fn unsupported_chain(chain_id: u64) -> Self {
        Self::new(
            FailureKind::UnsupportedChain,
            format!("Chain {} is not configured", chain_id),
        )
    }

    pub fn no_wallet() -> Self {
        Self::new(FailureKind::NoWallet, "No wallet is loaded in this session")
    }

    /// 用户可修正的错误（输入有误，重新输入即可）
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self.kind,
            FailureKind::InvalidPhrase
                | FailureKind::InvalidKey
                | FailureKind::InvalidRequest
                | FailureKind::NoWallet
        )
    }

    /// 签名失败说明身份数据损坏，属于程序缺陷
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, FailureKind::SigningFailed)
    }

    /// 可静默重试（轮询/历史加载场景）
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, FailureKind::NetworkUnavailable)
    }

    /// 给终端用户展示的提示
    pub fn user_message(&self) -> String {
        match self.kind {
            FailureKind::InvalidPhrase => "助记词无效，请检查单词拼写和数量（12 或 24 个）".into(),
            FailureKind::InvalidKey => "私钥格式无效，应为 64 位十六进制字符串".into(),
            FailureKind::InvalidRequest => format!("交易参数无效: {}", self.message),
            FailureKind::EstimationFailed => "无法估算手续费，网络费用未知".into(),
            FailureKind::SigningFailed => "签名失败，请重新导入钱包".into(),
            FailureKind::BroadcastRejected => format!("节点拒绝了交易: {}", self.message),
            FailureKind::StorageWrite => "安全存储写入失败，请重试".into(),
            FailureKind::NetworkUnavailable => "网络错误，请检查网络连接后重试".into(),
            FailureKind::UnsupportedChain => self.message.clone(),
            FailureKind::NoWallet => "尚未创建或导入钱包".into(),
        }
    }
}
