//! 钱包身份
//!
//! 由助记词（BIP39 + BIP44 路径 m/44'/60'/0'/0/0）或原始私钥派生地址与签名密钥。
//! 私钥只存在于内存中的 `Identity`，只有显式导出时才会以明文返回。

use std::fmt;

use bip39::{Language, Mnemonic};
use coins_bip32::path::DerivationPath;
use ethers::{
    signers::{LocalWallet, Signer},
    types::{transaction::eip2718::TypedTransaction, Address, Bytes, H256},
    utils::keccak256,
};
use k256::ecdsa::SigningKey;
use rand::{rngs::OsRng, RngCore};
use sha3::{Digest, Keccak256};
use zeroize::Zeroizing;

use crate::{
    error::{AppError, AppResult},
    utils::address_format,
};

/// 以太坊默认派生路径
pub const ETH_DERIVATION_PATH: &str = "m/44'/60'/0'/0/0";

/// 助记词长度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordCount {
    Twelve,
    TwentyFour,
}

impl WordCount {
    pub fn entropy_bytes(&self) -> usize {
        match self {
            Self::Twelve => 16,
            Self::TwentyFour => 32,
        }
    }

    pub fn from_count(count: usize) -> AppResult<Self> {
        match count {
            12 => Ok(Self::Twelve),
            24 => Ok(Self::TwentyFour),
            n => Err(AppError::invalid_phrase(format!(
                "Recovery phrase must have 12 or 24 words, got {}",
                n
            ))),
        }
    }
}

/// 助记词，Debug 输出脱敏，drop 时清零
#[derive(Clone, PartialEq, Eq)]
pub struct RecoveryPhrase(Zeroizing<String>);

impl RecoveryPhrase {
    /// 规范化：小写、单空格分隔
    pub fn normalized(raw: &str) -> Self {
        let joined = raw
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");
        Self(Zeroizing::new(joined))
    }

    pub fn word_count(&self) -> usize {
        self.0.split(' ').filter(|w| !w.is_empty()).count()
    }

    /// 明文助记词，仅用于备份展示和持久化
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RecoveryPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecoveryPhrase([REDACTED; {} words])", self.word_count())
    }
}

/// 生成新助记词，每次调用都使用新的系统熵
pub fn generate_recovery_phrase(word_count: WordCount) -> AppResult<RecoveryPhrase> {
    let mut entropy = Zeroizing::new(vec![0u8; word_count.entropy_bytes()]);
    OsRng.fill_bytes(&mut entropy);

    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
        .map_err(|e| AppError::invalid_phrase(format!("Failed to encode entropy: {}", e)))?;

    Ok(RecoveryPhrase(Zeroizing::new(mnemonic.to_string())))
}

/// 已签名交易
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    /// RLP 编码的已签名交易
    pub raw: Bytes,
    /// keccak256(raw)
    pub hash: H256,
}

/// 密钥来源
#[derive(Clone, PartialEq, Eq)]
enum IdentitySource {
    Phrase(RecoveryPhrase),
    PrivateKey,
}

/// 当前会话的唯一签名身份
#[derive(Clone)]
pub struct Identity {
    address: Address,
    wallet: LocalWallet,
    source: IdentitySource,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address_string())
            .field(
                "source",
                &match self.source {
                    IdentitySource::Phrase(_) => "phrase",
                    IdentitySource::PrivateKey => "private_key",
                },
            )
            .finish()
    }
}

impl Identity {
    /// 从助记词派生；必须恰好 12 或 24 个词且校验和正确
    pub fn from_recovery_phrase(phrase: &str) -> AppResult<Self> {
        let phrase = RecoveryPhrase::normalized(phrase);
        WordCount::from_count(phrase.word_count())?;

        // 解析助记词
        let mnemonic = Mnemonic::parse_in(Language::English, phrase.expose())
            .map_err(|e| AppError::invalid_phrase(format!("Invalid recovery phrase: {}", e)))?;

        // 生成种子
        let seed = Zeroizing::new(mnemonic.to_seed(""));

        let key_bytes = derive_ethereum_key(&seed[..], ETH_DERIVATION_PATH)
            .map_err(|e| AppError::invalid_phrase(format!("Key derivation failed: {}", e)))?;

        Self::from_key_bytes(&key_bytes, IdentitySource::Phrase(phrase))
            .map_err(|e| AppError::invalid_phrase(e.message))
    }

    /// 从原始私钥导入（64 位十六进制，可带 0x）
    pub fn from_private_key(key: &str) -> AppResult<Self> {
        let trimmed = key.trim();
        let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        if hex_part.len() != 64 {
            return Err(AppError::invalid_key(format!(
                "Private key must be 64 hex characters, got {}",
                hex_part.len()
            )));
        }
        let bytes = Zeroizing::new(
            hex::decode(hex_part)
                .map_err(|_| AppError::invalid_key("Private key contains non-hex characters"))?,
        );
        Self::from_key_bytes(&bytes, IdentitySource::PrivateKey)
    }

    /// 从存储中的秘密恢复：12/24 个词视为助记词，否则视为私钥
    pub fn from_secret(secret: &str) -> AppResult<Self> {
        let words = secret.split_whitespace().count();
        if words == 12 || words == 24 {
            Self::from_recovery_phrase(secret)
        } else {
            Self::from_private_key(secret)
        }
    }

    fn from_key_bytes(bytes: &[u8], source: IdentitySource) -> AppResult<Self> {
        // 超出曲线阶或为 0 的标量会在这里被拒绝
        let signing_key = SigningKey::from_slice(bytes)
            .map_err(|_| AppError::invalid_key("Private key is not a valid secp256k1 scalar"))?;
        let address = address_from_signing_key(&signing_key);

        let wallet = LocalWallet::from_bytes(bytes)
            .map_err(|e| AppError::invalid_key(format!("Invalid private key: {}", e)))?;

        Ok(Self {
            address,
            wallet,
            source,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// EIP-55 格式地址
    pub fn address_string(&self) -> String {
        address_format::to_checksum(&self.address)
    }

    pub fn has_phrase(&self) -> bool {
        matches!(self.source, IdentitySource::Phrase(_))
    }

    /// 需要持久化到安全存储的秘密（助记词或私钥）
    pub fn secret(&self) -> Zeroizing<String> {
        match &self.source {
            IdentitySource::Phrase(phrase) => Zeroizing::new(phrase.expose().to_string()),
            IdentitySource::PrivateKey => self.export_private_key(),
        }
    }

    /// 导出私钥用于备份展示
    pub fn export_private_key(&self) -> Zeroizing<String> {
        let bytes = self.wallet.signer().to_bytes();
        Zeroizing::new(format!("0x{}", hex::encode(bytes)))
    }

    /// 导出助记词用于备份展示（私钥导入的身份没有助记词）
    pub fn export_phrase(&self) -> Option<RecoveryPhrase> {
        match &self.source {
            IdentitySource::Phrase(phrase) => Some(phrase.clone()),
            IdentitySource::PrivateKey => None,
        }
    }

    /// 对交易做 EIP-155 签名，交易中的 chain_id 必须已设置
    pub fn sign(&self, tx: &TypedTransaction) -> AppResult<SignedPayload> {
        let chain_id = tx
            .chain_id()
            .ok_or_else(|| AppError::signing_failed("Transaction has no chain_id"))?
            .as_u64();
        let signer = self.wallet.clone().with_chain_id(chain_id);

        let signature = signer
            .sign_transaction_sync(tx)
            .map_err(|e| AppError::signing_failed(format!("Signing failed: {}", e)))?;

        let raw = tx.rlp_signed(&signature);
        let hash = H256::from(keccak256(&raw));
        Ok(SignedPayload { raw, hash })
    }
}

/// BIP32 派生私钥
fn derive_ethereum_key(seed: &[u8], path: &str) -> anyhow::Result<Zeroizing<Vec<u8>>> {
    use anyhow::Context;
    use coins_bip32::prelude::*;

    // 解析派生路径
    let derivation_path = path
        .parse::<DerivationPath>()
        .context("Invalid derivation path")?;

    // 从种子派生密钥
    let master_key = XPriv::root_from_seed(seed, None).context("Failed to derive master key")?;

    let derived_key = master_key
        .derive_path(&derivation_path)
        .context("Failed to derive key")?;

    // XPriv 实现 AsRef<SigningKey>
    let signing_key: &SigningKey = derived_key.as_ref();
    Ok(Zeroizing::new(signing_key.to_bytes().to_vec()))
}

/// 未压缩公钥去掉 0x04 前缀后做 Keccak256，取后 20 字节
fn address_from_signing_key(signing_key: &SigningKey) -> Address {
    let public_key = signing_key.verifying_key().to_encoded_point(false);
    let hash = Keccak256::digest(&public_key.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

#[cfg(test)]
mod tests {
    use ethers::types::{TransactionRequest as EthTxRequest, U256};

    use super::*;
    use crate::error::FailureKind;

    const TEST_PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_known_vector() {
        let identity = Identity::from_recovery_phrase(TEST_PHRASE).unwrap();
        assert_eq!(
            identity.address_string(),
            "0x9858EfFD232B4033E47d90003D41EC34EcaEda94"
        );
        assert!(identity.has_phrase());
    }

    #[test]
    fn test_phrase_normalization() {
        let messy = format!("  {}  ", TEST_PHRASE.to_uppercase().replace(' ', "   "));
        let a = Identity::from_recovery_phrase(&messy).unwrap();
        let b = Identity::from_recovery_phrase(TEST_PHRASE).unwrap();
        assert_eq!(a.address(), b.address());
    }

    #[test]
    fn test_rejects_bad_phrases() {
        // 校验和错误
        let bad_checksum = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon";
        assert_eq!(
            Identity::from_recovery_phrase(bad_checksum).unwrap_err().kind,
            FailureKind::InvalidPhrase
        );
        // 15 个词虽然是合法 BIP39 长度，但这里只接受 12/24
        let fifteen = "abandon ".repeat(14) + "address";
        assert_eq!(
            Identity::from_recovery_phrase(&fifteen).unwrap_err().kind,
            FailureKind::InvalidPhrase
        );
        assert_eq!(
            Identity::from_recovery_phrase("").unwrap_err().kind,
            FailureKind::InvalidPhrase
        );
        // 不在词表中
        let unknown = TEST_PHRASE.replace("about", "bitcoin1");
        assert!(Identity::from_recovery_phrase(&unknown).is_err());
    }

    #[test]
    fn test_private_key_import() {
        let from_phrase = Identity::from_recovery_phrase(TEST_PHRASE).unwrap();
        let exported = from_phrase.export_private_key();

        let imported = Identity::from_private_key(&exported).unwrap();
        assert_eq!(imported.address(), from_phrase.address());
        assert!(!imported.has_phrase());

        let without_prefix = exported.trim_start_matches("0x").to_string();
        let imported = Identity::from_private_key(&without_prefix).unwrap();
        assert_eq!(imported.address(), from_phrase.address());
    }

    #[test]
    fn test_private_key_rejects_invalid() {
        let bad_keys = vec![
            "0x1234".to_string(),
            "zz".repeat(32),
            "00".repeat(32),
            // 大于曲线阶
            "ff".repeat(32),
        ];
        for bad in bad_keys {
            assert_eq!(
                Identity::from_private_key(&bad).unwrap_err().kind,
                FailureKind::InvalidKey,
                "input {}",
                bad
            );
        }
    }

    #[test]
    fn test_from_secret_dispatch() {
        let phrase_identity = Identity::from_secret(TEST_PHRASE).unwrap();
        assert!(phrase_identity.has_phrase());

        let key = phrase_identity.export_private_key();
        let key_identity = Identity::from_secret(&key).unwrap();
        assert!(!key_identity.has_phrase());
        assert_eq!(key_identity.secret().as_str(), key.as_str());
    }

    #[test]
    fn test_generate_phrase() {
        let twelve = generate_recovery_phrase(WordCount::Twelve).unwrap();
        assert_eq!(twelve.word_count(), 12);
        let twenty_four = generate_recovery_phrase(WordCount::TwentyFour).unwrap();
        assert_eq!(twenty_four.word_count(), 24);

        // 生成的助记词必须能被导入
        assert!(Identity::from_recovery_phrase(twelve.expose()).is_ok());
        assert!(Identity::from_recovery_phrase(twenty_four.expose()).is_ok());
    }

    #[test]
    fn test_debug_is_redacted() {
        let identity = Identity::from_recovery_phrase(TEST_PHRASE).unwrap();
        let debug = format!("{:?}", identity);
        assert!(!debug.contains("abandon"));
        assert!(!debug.contains(identity.export_private_key().trim_start_matches("0x")));

        let phrase = RecoveryPhrase::normalized(TEST_PHRASE);
        assert_eq!(format!("{:?}", phrase), "RecoveryPhrase([REDACTED; 12 words])");
    }

    #[test]
    fn test_sign_is_deterministic_and_recoverable() {
        let identity = Identity::from_recovery_phrase(TEST_PHRASE).unwrap();
        let to: Address = "0x000000000000000000000000000000000000dEaD".parse().unwrap();
        let tx: TypedTransaction = EthTxRequest::new()
            .to(to)
            .value(U256::from(1000u64))
            .gas(21_000u64)
            .gas_price(1_000_000_000u64)
            .nonce(0u64)
            .chain_id(11155111u64)
            .into();

        let a = identity.sign(&tx).unwrap();
        let b = identity.sign(&tx).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.hash, H256::from(keccak256(&a.raw)));

        // 解码已签名交易，恢复出的发送方必须是本身份
        let decoded: ethers::types::Transaction = ethers::utils::rlp::decode(a.raw.as_ref()).unwrap();
        assert_eq!(decoded.recover_from().unwrap(), identity.address());
        assert_eq!(decoded.hash, a.hash);
    }

    #[test]
    fn test_sign_requires_chain_id() {
        let identity = Identity::from_recovery_phrase(TEST_PHRASE).unwrap();
        let tx: TypedTransaction = EthTxRequest::new().nonce(0u64).into();
        assert_eq!(
            identity.sign(&tx).unwrap_err().kind,
            FailureKind::SigningFailed
        );
    }
}
