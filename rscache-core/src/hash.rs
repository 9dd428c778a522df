//! Key-hash functions used to place a key on the continuum.
//!
//! These are treated as external collaborators by the design: MD5 and
//! CRC32 come from dedicated crates, while FNV1/FNV1a are a few lines
//! against their documented constants (no crate on crates.io exposes
//! exactly the one-shot, non-incremental 32-bit contract these need).

use md5::{Digest, Md5};

/// 32-bit FNV offset basis, per `spec.md §4.1` "Hash contracts."
const FNV1_32_OFFSET_BASIS: u32 = 0x811C_9DC5;
/// 32-bit FNV prime, per `spec.md §4.1` "Hash contracts."
const FNV1_32_PRIME: u32 = 0x0100_0193;

/// The key-hash function a [`crate::Client`] is configured with.
///
/// The continuum itself is always built with MD5 regardless of this
/// setting (`spec.md §3`); this only controls how a lookup key's hash is
/// computed before searching the continuum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyHash {
    Md5,
    Fnv1_32,
    Fnv1a32,
    Crc32,
}

impl KeyHash {
    pub fn hash(self, key: &[u8]) -> u32 {
        match self {
            KeyHash::Md5 => md5_u32(key),
            KeyHash::Fnv1_32 => fnv1_32(key),
            KeyHash::Fnv1a32 => fnv1a_32(key),
            KeyHash::Crc32 => crc32_ieee(key),
        }
    }
}

/// MD5 digest the key, then take bytes 0..3 as a little-endian `u32`.
pub fn md5_u32(bytes: &[u8]) -> u32 {
    let digest = Md5::digest(bytes);
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Full 16-byte MD5 digest, used directly by the continuum to derive its
/// four subpoints per bucket (`spec.md §4.1` "Construction").
pub fn md5_digest(bytes: &[u8]) -> [u8; 16] {
    Md5::digest(bytes).into()
}

/// FNV-1 (multiply, then xor).
pub fn fnv1_32(bytes: &[u8]) -> u32 {
    let mut hash = FNV1_32_OFFSET_BASIS;
    for &b in bytes {
        hash = hash.wrapping_mul(FNV1_32_PRIME);
        hash ^= b as u32;
    }
    hash
}

/// FNV-1a (xor, then multiply).
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash = FNV1_32_OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(FNV1_32_PRIME);
    }
    hash
}

/// CRC32, IEEE 802.3 polynomial (reflected, init=0xFFFFFFFF, xorout=0xFFFFFFFF).
pub fn crc32_ieee(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1_32_empty() {
        assert_eq!(FNV1_32_OFFSET_BASIS, fnv1_32(b""));
        assert_eq!(FNV1_32_OFFSET_BASIS, fnv1a_32(b""));
    }

    #[test]
    fn test_fnv1_32_known_vector() {
        // FNV test vectors from the reference FNV test suite (fnv1_32("a") / fnv1a_32("a")).
        assert_eq!(0x050c5d7f, fnv1_32(b"a"));
        assert_eq!(0xe40c292c, fnv1a_32(b"a"));
    }

    #[test]
    fn test_crc32_known_vector() {
        assert_eq!(0xcbf43926, crc32_ieee(b"123456789"));
    }

    #[test]
    fn test_md5_u32_matches_digest_prefix() {
        let digest = md5_digest(b"hello");
        let expect = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
        assert_eq!(expect, md5_u32(b"hello"));
    }
}
