//! 62 进制摘要生成器
//!
//! 为缓存键生成确定性的短摘要，用作制品目录名。
//! 摘要格式：固定长度的 62 进制字符串（0-9, a-z, A-Z）

use sha2::{Digest, Sha256};

/// 62 进制字符集
const BASE62_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// 摘要长度
pub const DIGEST_LENGTH: usize = 16;

/// 将 u128 编码为定长 62 进制字符串
fn encode_base62(mut value: u128, length: usize) -> String {
    let mut result = Vec::with_capacity(length);
    for _ in 0..length {
        let index = (value % 62) as usize;
        result.push(BASE62_CHARS[index] as char);
        value /= 62;
    }

    // 反转得到最终摘要
    result.iter().rev().collect()
}

/// 生成内容的 62 进制摘要
///
/// 对输入做 SHA-256，取前 16 字节编码为 [`DIGEST_LENGTH`] 位 62 进制字符串。
/// 相同输入总是得到相同摘要，跨进程、跨平台稳定。
///
/// # Example
///
/// ```
/// use chips_pipeline::utils::id::digest_id;
///
/// let a = digest_id("index/simple{}");
/// let b = digest_id("index/simple{}");
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 16);
/// ```
pub fn digest_id(content: &str) -> String {
    let hash = Sha256::digest(content.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);
    encode_base62(u128::from_be_bytes(bytes), DIGEST_LENGTH)
}

/// 验证摘要格式是否有效
///
/// # Example
///
/// ```
/// use chips_pipeline::utils::id::is_valid_digest;
///
/// assert!(is_valid_digest("a1B2c3D4e5f6G7h8"));
/// assert!(!is_valid_digest("too-short"));
/// ```
pub fn is_valid_digest(id: &str) -> bool {
    id.len() == DIGEST_LENGTH && id.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_digest_length_and_charset() {
        let id = digest_id("collection/dummy{}");
        assert_eq!(id.len(), DIGEST_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(is_valid_digest(&id));
    }

    #[test]
    fn test_digest_deterministic() {
        assert_eq!(digest_id("same"), digest_id("same"));
        assert_ne!(digest_id("same"), digest_id("other"));
    }

    #[test]
    fn test_digest_spread() {
        let mut ids = HashSet::new();
        for i in 0..1000 {
            assert!(ids.insert(digest_id(&format!("key-{}", i))), "摘要冲突");
        }
    }

    #[test]
    fn test_encode_base62() {
        assert_eq!(encode_base62(0, 4), "0000");
        assert_eq!(encode_base62(61, 2), "0Z");
        assert_eq!(encode_base62(62, 2), "10");
    }

    #[test]
    fn test_is_valid_digest() {
        assert!(is_valid_digest("0000000000000000"));
        assert!(!is_valid_digest(""));
        assert!(!is_valid_digest("a1B2c3D4e5f6G7h!"));
    }
}
