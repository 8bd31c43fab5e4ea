//! EVM 地址格式校验
//!
//! 统一的地址结构检查：0x 前缀、40 位十六进制、混合大小写时校验 EIP-55 checksum

use ethers::types::Address;
use sha3::{Digest, Keccak256};

/// 带 0x 前缀的地址长度
pub const ADDRESS_LEN: usize = 42;

/// 地址结构检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    Length,
    Prefix,
    Charset,
    Checksum,
}

impl FormatError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Length => "address must be 42 characters",
            Self::Prefix => "address must start with 0x",
            Self::Charset => "address contains non-hex characters",
            Self::Checksum => "address checksum (EIP-55) mismatch",
        }
    }
}

/// 校验 EVM 地址（支持 EIP-55 Checksum）
pub fn check_evm_address(address: &str) -> Result<(), FormatError> {
    // 1. 基本格式检查
    if address.len() != ADDRESS_LEN {
        return Err(FormatError::Length);
    }
    if !address.starts_with("0x") {
        return Err(FormatError::Prefix);
    }

    // 2. 验证hex字符
    let hex_part = &address[2..];
    if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(FormatError::Charset);
    }

    // 3. 全小写或全大写视为未带 checksum
    let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
    if has_upper && has_lower && !verify_eip55_checksum(address) {
        return Err(FormatError::Checksum);
    }

    Ok(())
}

pub fn is_valid_evm_address(address: &str) -> bool {
    check_evm_address(address).is_ok()
}

/// 验证EIP-55 Checksum
/// https://eips.ethereum.org/EIPS/eip-55
pub fn verify_eip55_checksum(address: &str) -> bool {
    if address.len() != ADDRESS_LEN {
        return false;
    }
    let addr_lower = address[2..].to_lowercase();
    let hash = Keccak256::digest(addr_lower.as_bytes());

    for (i, ch) in address[2..].chars().enumerate() {
        if ch.is_ascii_alphabetic() {
            let hash_byte = hash[i / 2];
            let hash_nibble = if i % 2 == 0 {
                hash_byte >> 4
            } else {
                hash_byte & 0x0f
            };

            let should_be_uppercase = hash_nibble >= 8;
            if ch.is_ascii_uppercase() != should_be_uppercase {
                return false;
            }
        }
    }

    true
}

/// 转为 EIP-55 格式
pub fn to_checksum(address: &Address) -> String {
    ethers::utils::to_checksum(address, None)
}

/// 余额缓存、去重等场景使用的规范化 key
pub fn normalize(address: &str) -> String {
    address.trim().to_lowercase()
}
