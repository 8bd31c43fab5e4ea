//! IronWallet - 自托管多链 EVM 钱包与交易引擎
//!
//! 私钥只存在于本地：助记词/私钥经加密存储在本机，签名在进程内完成。

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod metrics;
pub mod service;
pub mod session;
pub mod utils;

// 重新导出常用类型
pub use error::{AppError, AppResult, FailureKind};
pub use session::WalletSession;

pub mod prelude {
    pub use crate::{
        config::Config,
        domain::{
            ChainConfig, ChainRegistry, Identity, TransactionRecord, TransactionRequest, TxStatus,
        },
        error::{AppError, AppResult, FailureKind},
        session::WalletSession,
    };
}
