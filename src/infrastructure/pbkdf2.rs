//! PBKDF2 密钥派生
//! 从用户口令派生加密存储文件的 AES-256 密钥

use anyhow::{anyhow, Result};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// PBKDF2 密钥派生参数
pub const PBKDF2_ITERATIONS: u32 = 100_000;
pub const SALT_LENGTH: usize = 16;
const KEY_LENGTH: usize = 32; // AES-256

/// 派生出的存储密钥，drop 时清零
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct StoreKey {
    key: [u8; KEY_LENGTH],
}

impl StoreKey {
    /// 用给定盐值派生（打开已有文件）
    pub fn derive(passphrase: &str, salt: &[u8], iterations: u32) -> Result<Self> {
        if salt.len() != SALT_LENGTH {
            return Err(anyhow!("Salt must be {} bytes", SALT_LENGTH));
        }
        if passphrase.is_empty() {
            return Err(anyhow!("Passphrase must not be empty"));
        }

        let mut key = [0u8; KEY_LENGTH];
        pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, &mut key);
        Ok(Self { key })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.key
    }
}

/// 生成随机盐值（新建文件）
pub fn random_salt() -> [u8; SALT_LENGTH] {
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}
