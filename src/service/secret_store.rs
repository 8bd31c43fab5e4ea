//! 钱包秘密持久化
//!
//! 持久化布局固定为两个条目：`wallet_mnemonic`（助记词或私钥）与 `has_wallet`（"true"）。
//! 所有操作串行执行，写入/删除任一步失败都会回滚另一步，对调用方保证二者同在或同无。

use std::sync::Arc;

use tokio::sync::Mutex;
use zeroize::Zeroizing;

use crate::{
    error::{AppError, AppResult},
    infrastructure::secure_store::SecureCredentialStore,
};

pub const SECRET_KEY: &str = "wallet_mnemonic";
pub const FLAG_KEY: &str = "has_wallet";
const FLAG_VALUE: &str = "true";

pub struct SecretStore {
    store: Arc<dyn SecureCredentialStore>,
    // 串行化所有读写
    lock: Mutex<()>,
}

impl SecretStore {
    pub fn new(store: Arc<dyn SecureCredentialStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// 保存秘密：先写秘密再写标志，标志写失败时撤销秘密
    pub async fn save(&self, secret: &str) -> AppResult<()> {
        let _guard = self.lock.lock().await;

        let previous = self.store.get(SECRET_KEY).await.unwrap_or_else(|e| {
            tracing::warn!(error = ?e, "Failed to read previous secret before overwrite");
            None
        });

        self.store.set(SECRET_KEY, secret).await.map_err(|e| {
            tracing::error!(error = ?e, "Failed to write wallet secret");
            AppError::storage_write(format!("Failed to write secret: {}", e))
        })?;

        if let Err(e) = self.store.set(FLAG_KEY, FLAG_VALUE).await {
            tracing::error!(error = ?e, "Failed to write wallet flag, rolling back secret");
            let rollback = match previous {
                Some(old) => self.store.set(SECRET_KEY, &old).await,
                None => self.store.delete(SECRET_KEY).await,
            };
            if let Err(rollback_err) = rollback {
                tracing::error!(error = ?rollback_err, "Secret rollback failed");
            }
            return Err(AppError::storage_write(format!(
                "Failed to write wallet flag: {}",
                e
            )));
        }

        tracing::info!("Wallet secret saved");
        Ok(())
    }

    /// 读取秘密；标志缺失时视为没有钱包
    pub async fn load(&self) -> Option<Zeroizing<String>> {
        let _guard = self.lock.lock().await;
        if !self.flag_set().await {
            return None;
        }
        match self.store.get(SECRET_KEY).await {
            Ok(secret) => secret,
            Err(e) => {
                tracing::warn!(error = ?e, "Failed to read wallet secret");
                None
            }
        }
    }

    /// 标志为 "true" 且秘密存在
    pub async fn exists(&self) -> bool {
        let _guard = self.lock.lock().await;
        if !self.flag_set().await {
            return false;
        }
        matches!(self.store.get(SECRET_KEY).await, Ok(Some(_)))
    }

    /// 删除钱包：先删标志再删秘密，秘密删除失败时恢复标志
    pub async fn erase(&self) -> AppResult<()> {
        let _guard = self.lock.lock().await;

        let had_flag = self.flag_set().await;
        self.store.delete(FLAG_KEY).await.map_err(|e| {
            tracing::error!(error = ?e, "Failed to delete wallet flag");
            AppError::storage_write(format!("Failed to delete wallet flag: {}", e))
        })?;

        if let Err(e) = self.store.delete(SECRET_KEY).await {
            tracing::error!(error = ?e, "Failed to delete wallet secret, restoring flag");
            if had_flag {
                if let Err(restore_err) = self.store.set(FLAG_KEY, FLAG_VALUE).await {
                    tracing::error!(error = ?restore_err, "Failed to restore wallet flag");
                }
            }
            return Err(AppError::storage_write(format!(
                "Failed to delete wallet secret: {}",
                e
            )));
        }

        tracing::info!("Wallet erased");
        Ok(())
    }

    async fn flag_set(&self) -> bool {
        match self.store.get(FLAG_KEY).await {
            Ok(Some(v)) => v.as_str() == FLAG_VALUE,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = ?e, "Failed to read wallet flag");
                false
            }
        }
    }
}
