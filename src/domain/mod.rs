//! Domain 模块
//!
//! 身份、链配置与交易模型

pub mod chain_config;
pub mod identity;
pub mod transaction;
pub mod transaction_status;

// 重新导出常用类型
pub use chain_config::{default_chains, ChainConfig, ChainRegistry};
pub use identity::{generate_recovery_phrase, Identity, RecoveryPhrase, WordCount};
pub use transaction::{
    CostEstimate, Submission, TokenTransferRecord, TransactionRecord, TransactionRequest,
};
pub use transaction_status::TxStatus;
