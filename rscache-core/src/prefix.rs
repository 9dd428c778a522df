//! Key prefixing: `spec.md §4.2` "Prefix rules." A key is never transmitted
//! without the configured prefix applied; a key beginning with `?` has the
//! prefix inserted after the `?` instead of before it.

/// Apply `prefix` to `key` for transmission.
pub fn add_prefix(prefix: &str, key: &[u8]) -> Vec<u8> {
    if prefix.is_empty() {
        return key.to_vec();
    }
    if key.first() == Some(&b'?') {
        let mut out = Vec::with_capacity(1 + prefix.len() + key.len() - 1);
        out.push(b'?');
        out.extend_from_slice(prefix.as_bytes());
        out.extend_from_slice(&key[1..]);
        out
    } else {
        let mut out = Vec::with_capacity(prefix.len() + key.len());
        out.extend_from_slice(prefix.as_bytes());
        out.extend_from_slice(key);
        out
    }
}

/// Strip `prefix` from a transmitted key, the inverse of [`add_prefix`].
pub fn remove_prefix(prefix: &str, key: &[u8]) -> Vec<u8> {
    if prefix.is_empty() {
        return key.to_vec();
    }
    let prefix_bytes = prefix.as_bytes();
    if key.first() == Some(&b'?') {
        let rest = &key[1..];
        if rest.starts_with(prefix_bytes) {
            let mut out = Vec::with_capacity(1 + rest.len() - prefix_bytes.len());
            out.push(b'?');
            out.extend_from_slice(&rest[prefix_bytes.len()..]);
            out
        } else {
            key.to_vec()
        }
    } else if key.starts_with(prefix_bytes) {
        key[prefix_bytes.len()..].to_vec()
    } else {
        key.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_prefix_is_identity() {
        assert_eq!(b"foo".to_vec(), add_prefix("", b"foo"));
        assert_eq!(b"foo".to_vec(), remove_prefix("", b"foo"));
        assert_eq!(b"?foo".to_vec(), add_prefix("", b"?foo"));
        assert_eq!(b"?foo".to_vec(), remove_prefix("", b"?foo"));
    }

    #[test]
    fn test_plain_key_round_trip() {
        let key = b"user:1";
        let wire = add_prefix("app:", key);
        assert_eq!(b"app:user:1".to_vec(), wire);
        assert_eq!(key.to_vec(), remove_prefix("app:", &wire));
    }

    #[test]
    fn test_question_mark_key_inserts_prefix_after_question_mark() {
        let key = b"?user:1";
        let wire = add_prefix("app:", key);
        assert_eq!(b"?app:user:1".to_vec(), wire);
        assert_eq!(key.to_vec(), remove_prefix("app:", &wire));
    }

    #[test]
    fn test_round_trip_property_various_keys() {
        let prefixes = ["", "p", "app:", "/prefix"];
        let keys: &[&[u8]] = &[b"k", b"?k", b"app:k", b"?app:k", b""];
        for &prefix in &prefixes {
            for &key in keys {
                let wire = add_prefix(prefix, key);
                assert_eq!(key.to_vec(), remove_prefix(prefix, &wire));
            }
        }
    }

    #[test]
    fn test_key_containing_prefix_still_round_trips() {
        // A key that happens to already start with the prefix string must
        // still round-trip: add_prefix always prepends, remove_prefix
        // strips exactly one occurrence.
        let key = b"app:app:nested";
        let wire = add_prefix("app:", key);
        assert_eq!(b"app:app:app:nested".to_vec(), wire);
        assert_eq!(key.to_vec(), remove_prefix("app:", &wire));
    }
}
