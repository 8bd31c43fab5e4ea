//! 安全凭据存储
//!
//! `SecureCredentialStore` 是平台安全存储能力的抽象：按 key 读写敏感字符串。
//! 提供内存实现（测试/临时会话）与基于口令加密的本地文件实现。

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use zeroize::Zeroizing;

use crate::infrastructure::{
    encryption::{decrypt_data, encrypt_data},
    pbkdf2::{random_salt, StoreKey, PBKDF2_ITERATIONS},
};

/// 平台安全存储
#[async_trait]
pub trait SecureCredentialStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Zeroizing<String>>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 内存实现
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: RwLock<HashMap<String, Zeroizing<String>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecureCredentialStore for MemoryCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<Zeroizing<String>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), Zeroizing::new(value.to_string()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 加密文件实现
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const STORE_VERSION: u32 = 1;
const VERIFIER_PLAINTEXT: &[u8] = b"ironwallet-store";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    salt: String,
    iterations: u32,
    /// 用于打开时校验口令
    verifier: String,
    /// key -> hex(nonce + ciphertext)
    entries: HashMap<String, String>,
}

/// 口令加密的本地文件存储
///
/// 每次写入都整体重写文件（先写临时文件再 rename），
/// 写入失败时内存中的条目回滚，保证内存与磁盘一致。
pub struct EncryptedFileStore {
    path: PathBuf,
    key: StoreKey,
    file: Mutex<StoreFile>,
}

impl EncryptedFileStore {
    pub async fn open(path: impl AsRef<Path>, passphrase: &str) -> Result<Self> {
        Self::open_with_iterations(path, passphrase, PBKDF2_ITERATIONS).await
    }

    /// 指定新建文件时的迭代次数（已有文件以文件中记录的为准）
    pub async fn open_with_iterations(
        path: impl AsRef<Path>,
        passphrase: &str,
        iterations: u32,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let passphrase = Zeroizing::new(passphrase.to_string());

        let existing = match tokio::fs::read_to_string(&path).await {
            Ok(content) => Some(
                serde_json::from_str::<StoreFile>(&content)
                    .with_context(|| format!("Corrupted credential store: {:?}", path))?,
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read credential store: {:?}", path))
            }
        };

        match existing {
            Some(file) => {
                if file.version != STORE_VERSION {
                    return Err(anyhow!("Unsupported credential store version {}", file.version));
                }
                let salt = hex::decode(&file.salt).context("Invalid salt encoding")?;
                let iterations = file.iterations;
                let key = tokio::task::spawn_blocking(move || {
                    StoreKey::derive(&passphrase, &salt, iterations)
                })
                .await
                .context("Key derivation task failed")??;

                let verifier = hex::decode(&file.verifier).context("Invalid verifier encoding")?;
                let plain = decrypt_data(&verifier, &key)
                    .map_err(|_| anyhow!("Wrong passphrase for credential store"))?;
                if plain != VERIFIER_PLAINTEXT {
                    return Err(anyhow!("Wrong passphrase for credential store"));
                }

                tracing::debug!(path = ?path, entries = file.entries.len(), "Credential store opened");
                Ok(Self {
                    path,
                    key,
                    file: Mutex::new(file),
                })
            }
            None => {
                let salt = random_salt();
                let key = tokio::task::spawn_blocking(move || {
                    StoreKey::derive(&passphrase, &salt, iterations)
                })
                .await
                .context("Key derivation task failed")??;

                let verifier = encrypt_data(VERIFIER_PLAINTEXT, &key)?;
                let file = StoreFile {
                    version: STORE_VERSION,
                    salt: hex::encode(salt),
                    iterations,
                    verifier: hex::encode(verifier),
                    entries: HashMap::new(),
                };
                persist(&path, &file).await?;
                tracing::info!(path = ?path, "Credential store created");
                Ok(Self {
                    path,
                    key,
                    file: Mutex::new(file),
                })
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn persist(path: &Path, file: &StoreFile) -> Result<()> {
    let content = serde_json::to_string_pretty(file)?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, content)
        .await
        .with_context(|| format!("Failed to write {:?}", tmp))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {:?}", path))?;
    Ok(())
}

#[async_trait]
impl SecureCredentialStore for EncryptedFileStore {
    async fn get(&self, key: &str) -> Result<Option<Zeroizing<String>>> {
        let file = self.file.lock().await;
        let Some(encoded) = file.entries.get(key) else {
            return Ok(None);
        };
        let encrypted = hex::decode(encoded).context("Invalid entry encoding")?;
        let plain = Zeroizing::new(decrypt_data(&encrypted, &self.key)?);
        let value = String::from_utf8(plain.to_vec()).context("Entry is not UTF-8")?;
        Ok(Some(Zeroizing::new(value)))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let encrypted = hex::encode(encrypt_data(value.as_bytes(), &self.key)?);
        let mut file = self.file.lock().await;
        let previous = file.entries.insert(key.to_string(), encrypted);
        if let Err(e) = persist(&self.path, &file).await {
            match previous {
                Some(old) => file.entries.insert(key.to_string(), old),
                None => file.entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut file = self.file.lock().await;
        let Some(previous) = file.entries.remove(key) else {
            return Ok(());
        };
        if let Err(e) = persist(&self.path, &file).await {
            file.entries.insert(key.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryCredentialStore::new();
        assert!(store.get("k").await.unwrap().is_none());
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap().as_str(), "v");
        store.delete("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_encrypted_store_roundtrip_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallet.store");

        {
            let store = EncryptedFileStore::open_with_iterations(&path, "hunter2", 1_000)
                .await
                .unwrap();
            store.set("wallet_mnemonic", "abandon about").await.unwrap();
            store.set("has_wallet", "true").await.unwrap();
        }

        // 明文不应出现在文件中
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("abandon"));

        let store = EncryptedFileStore::open(&path, "hunter2").await.unwrap();
        assert_eq!(
            store.get("wallet_mnemonic").await.unwrap().unwrap().as_str(),
            "abandon about"
        );
        store.delete("wallet_mnemonic").await.unwrap();
        assert!(store.get("wallet_mnemonic").await.unwrap().is_none());
        assert!(store.get("has_wallet").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_encrypted_store_wrong_passphrase() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallet.store");
        EncryptedFileStore::open_with_iterations(&path, "right", 1_000)
            .await
            .unwrap();

        let err = EncryptedFileStore::open(&path, "wrong").await.err().unwrap();
        assert!(err.to_string().contains("Wrong passphrase"));
    }
}
