//! 日志脱敏
//! 地址、哈希只显示首尾；助记词和私钥永远不进日志

use once_cell::sync::Lazy;
use regex::Regex;

/// 64 位十六进制（私钥或交易哈希）
static HEX64_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(0x)?[0-9a-f]{64}\b").unwrap());

/// 12~24 个连续小写单词，疑似助记词
static MNEMONIC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:[a-z]+\s+){11,23}[a-z]+\b").unwrap());

/// 脱敏十六进制字符串（显示前缀和后缀）
pub fn redact_hex_string(hex: &str, show_chars: usize) -> String {
    if hex.len() <= show_chars * 2 {
        return "*".repeat(hex.len());
    }

    let prefix = &hex[..show_chars];
    let suffix = &hex[hex.len() - show_chars..];
    format!("{}...{}", prefix, suffix)
}

/// 脱敏地址（显示前6位和后4位）
pub fn redact_address(address: &str) -> String {
    if address.len() < 10 || !address.is_ascii() {
        return "*".repeat(address.chars().count());
    }

    let prefix = &address[..6];
    let suffix = &address[address.len() - 4..];
    format!("{}...{}", prefix, suffix)
}

/// 助记词只保留词数
pub fn redact_phrase(phrase: &str) -> String {
    format!("[{} words]", phrase.split_whitespace().count())
}

/// 清除自由文本（如节点错误信息）中可能出现的私钥或助记词
pub fn scrub(text: &str) -> String {
    let text = HEX64_RE.replace_all(text, "[REDACTED]");
    MNEMONIC_RE.replace_all(&text, "[REDACTED]").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_hex_string() {
        let hex = "0x1234567890abcdef1234567890abcdef12345678";
        let redacted = redact_hex_string(hex, 10);
        assert_eq!(redacted, "0x12345678...ef12345678");
    }

    #[test]
    fn test_redact_address() {
        let address = "0x742d35Cc6634C0532925a3b844Bc9e7595f0bFd2";
        assert_eq!(redact_address(address), "0x742d...bFd2");
        assert_eq!(redact_address("0xabc"), "*****");
    }

    #[test]
    fn test_redact_phrase() {
        assert_eq!(redact_phrase("abandon abandon about"), "[3 words]");
    }

    #[test]
    fn test_scrub_private_key() {
        let key = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
        let text = format!("failed to import 0x{} from input", key);
        let scrubbed = scrub(&text);
        assert!(!scrubbed.contains(key));
        assert_eq!(scrubbed, "failed to import [REDACTED] from input");
    }

    #[test]
    fn test_scrub_phrase() {
        let text = "bad input: abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
        assert_eq!(scrub(text), "bad input: [REDACTED]");
    }
}
