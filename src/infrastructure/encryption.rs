//! AES-256-GCM 加密/解密
//! 加密存储文件中每个条目独立加密，输出为 nonce(12 字节) + ciphertext

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Result};

use crate::infrastructure::pbkdf2::StoreKey;

const NONCE_LENGTH: usize = 12;

/// 加密数据，返回 nonce + ciphertext
pub fn encrypt_data(data: &[u8], key: &StoreKey) -> Result<Vec<u8>> {
    let cipher =
        Aes256Gcm::new_from_slice(key.as_slice()).map_err(|e| anyhow!("Invalid key: {}", e))?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, data)
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    let mut result = nonce.to_vec();
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// 解密 nonce + ciphertext；口令错误或数据被篡改时返回错误
pub fn decrypt_data(encrypted: &[u8], key: &StoreKey) -> Result<Vec<u8>> {
    if encrypted.len() < NONCE_LENGTH {
        return Err(anyhow!("Encrypted data too short"));
    }

    let cipher =
        Aes256Gcm::new_from_slice(key.as_slice()).map_err(|e| anyhow!("Invalid key: {}", e))?;

    let (nonce, ciphertext) = encrypted.split_at(NONCE_LENGTH);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| anyhow!("Decryption failed (wrong passphrase or corrupted data)"))
}
