//! Key hashing and hash-tag extraction
//!
//! The distribution hash is CRC16 (XMODEM polynomial), the algorithm Redis
//! itself uses for cluster slots. The only requirement on it here is that it
//! is deterministic and uniform enough for modulo or ring placement; any
//! co-located tooling must agree on the choice.

use crc16::{State, XMODEM};

/// Extract the hashable part of a key, honoring the hash-tag convention.
///
/// If the key contains `{...}` with a non-empty interior, only the substring
/// between the first `{` and the first following `}` is hashed. This lets
/// differently-named keys (`{user1000}.following`, `{user1000}.followers`)
/// share a distribution slot. A key without braces, or with an empty `{}`
/// tag, hashes as a whole.
#[must_use]
pub fn hashable_key_part(key: &[u8]) -> &[u8] {
    if let Some(start) = key.iter().position(|&b| b == b'{') {
        if let Some(end) = key[start + 1..].iter().position(|&b| b == b'}') {
            let end = start + 1 + end;
            if end > start + 1 {
                return &key[start + 1..end];
            }
        }
    }
    key
}

/// Compute the distribution hash of a key (after hash-tag extraction)
#[must_use]
pub fn compute_hash(key: &[u8]) -> u64 {
    u64::from(State::<XMODEM>::calculate(hashable_key_part(key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_tag_extraction() {
        assert_eq!(hashable_key_part(b"{user1000}.following"), b"user1000");
        assert_eq!(hashable_key_part(b"foo{bar}baz"), b"bar");
    }

    #[test]
    fn test_no_tag_uses_whole_key() {
        assert_eq!(hashable_key_part(b"plainkey"), b"plainkey");
    }

    #[test]
    fn test_empty_tag_uses_whole_key() {
        assert_eq!(hashable_key_part(b"foo{}bar"), b"foo{}bar");
    }

    #[test]
    fn test_unclosed_brace_uses_whole_key() {
        assert_eq!(hashable_key_part(b"foo{bar"), b"foo{bar");
    }

    #[test]
    fn test_first_closing_brace_wins() {
        // {a}{b}: only "a" is the tag
        assert_eq!(hashable_key_part(b"{a}{b}"), b"a");
    }

    #[test]
    fn test_tagged_keys_hash_equal() {
        assert_eq!(compute_hash(b"{tag}a"), compute_hash(b"{tag}b"));
        assert_eq!(compute_hash(b"{tag}a"), compute_hash(b"tag"));
    }

    #[test]
    fn test_distinct_keys_hash_differently() {
        // Not guaranteed in general, but these known values differ
        assert_ne!(compute_hash(b"foo"), compute_hash(b"bar"));
    }
}
