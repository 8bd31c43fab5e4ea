//! 交易状态定义
//! 广播时记为 Pending，收到回执后进入终态

use std::fmt;

use serde::{Deserialize, Serialize};

/// 交易状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxStatus {
    /// 已广播，等待回执
    Pending,

    /// 回执 status = 1
    Confirmed,

    /// 回执 status != 1，或浏览器标记 isError
    Failed,

    /// 达到最大轮询次数仍无回执（仅在配置了轮询上限时出现）
    Stuck,
}

impl TxStatus {
    /// 获取状态描述
    pub fn description(&self) -> &'static str {
        match self {
            Self::Pending => "交易待确认",
            Self::Confirmed => "交易已确认",
            Self::Failed => "交易失败",
            Self::Stuck => "交易长时间未确认",
        }
    }

    /// 是否为最终状态（不可再转换）
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// 验证状态转换合法性
    pub fn can_transition_to(&self, target: &Self) -> bool {
        use TxStatus::*;

        matches!(
            (self, target),
            (Pending, Confirmed) | (Pending, Failed) | (Pending, Stuck)
        )
    }

    /// 从回执 status 字段映射
    pub fn from_receipt_status(status: Option<u64>) -> Self {
        match status {
            Some(1) => Self::Confirmed,
            _ => Self::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::Stuck => "stuck",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use TxStatus::*;

        assert!(Pending.can_transition_to(&Confirmed));
        assert!(Pending.can_transition_to(&Failed));
        assert!(Pending.can_transition_to(&Stuck));

        // 最终状态不可转换
        assert!(!Confirmed.can_transition_to(&Pending));
        assert!(!Failed.can_transition_to(&Confirmed));
        assert!(!Stuck.can_transition_to(&Confirmed));
    }

    #[test]
    fn test_is_final() {
        assert!(!TxStatus::Pending.is_final());
        assert!(TxStatus::Confirmed.is_final());
        assert!(TxStatus::Failed.is_final());
        assert!(TxStatus::Stuck.is_final());
    }

    #[test]
    fn test_from_receipt_status() {
        assert_eq!(TxStatus::from_receipt_status(Some(1)), TxStatus::Confirmed);
        assert_eq!(TxStatus::from_receipt_status(Some(0)), TxStatus::Failed);
        assert_eq!(TxStatus::from_receipt_status(None), TxStatus::Failed);
    }
}
