use std::time::Duration;

/// 31-multiplier string hash. Stable across processes and releases, unlike
/// the std hasher, so every node routes a key the same way.
pub fn stable_hash(key: &str) -> u64 {
    key.bytes()
        .fold(0u64, |hash, b| hash.wrapping_mul(31).wrapping_add(u64::from(b)))
}

/// Millisecond TTL for the store; never zero.
pub fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable() {
        assert_eq!(stable_hash(""), 0);
        assert_eq!(stable_hash("a"), 97);
        assert_eq!(stable_hash("ab"), 97 * 31 + 98);
        assert_eq!(stable_hash("logical-switch-42"), stable_hash("logical-switch-42"));
    }

    #[test]
    fn ttl_is_at_least_one_ms() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(30)), 30_000);
    }
}
