//! Response cache (C8).
//!
//! Read-heavy discovery responses are cached under keys of the form
//! `cache:{endpoint}:{tenant|*}:{principal|*}:{sha256(params)}`. Writes
//! invalidate by pattern: every key mentioning the written tenant, plus all
//! well-known views. Invalidation is best-effort; TTLs are the backstop.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use sha2::Digest;
use sha2::Sha256;

use crate::types::TenantId;

pub use memory::MemoryCache;

/// Pattern matching every cached well-known view.
pub const WELL_KNOWN_PATTERN: &str = "cache:well_known_*";

/// Key-value cache port. All operations are best-effort.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Fetch a cached value, if present and unexpired.
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Store a value with a TTL.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration);

    /// Remove one key.
    async fn del(&self, key: &str);

    /// Remove every key matching a glob pattern (`*` matches any run of
    /// characters). Returns how many keys were removed.
    async fn del_pattern(&self, pattern: &str) -> usize;
}

/// Build a response cache key.
///
/// `tenant` and `principal` collapse to `*` when absent so anonymous views
/// share one slot per parameter fingerprint.
pub fn response_key(
    endpoint: &str,
    tenant: Option<&TenantId>,
    principal: Option<&str>,
    params: &str,
) -> String {
    let digest = Sha256::digest(params.as_bytes());
    let mut fingerprint = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(fingerprint, "{byte:02x}");
    }
    format!(
        "cache:{endpoint}:{}:{}:{fingerprint}",
        tenant.map(TenantId::as_str).unwrap_or("*"),
        principal.unwrap_or("*"),
    )
}

/// Pattern matching every cached response that could mention `tenant`.
///
/// Deliberately coarse: the wildcard crosses segment boundaries, so the
/// pattern may also remove entries where the tenant id appears in another
/// position. Over-invalidation only costs a cache miss.
pub fn tenant_pattern(tenant: &TenantId) -> String {
    format!("cache:*:{}:*", tenant.as_str())
}

/// Glob match where `*` matches any (possibly empty) run of characters.
pub fn glob_match(pattern: &str, input: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let input: Vec<char> = input.chars().collect();
    // Classic two-pointer glob with backtracking over the last star.
    let (mut p, mut i) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while i < input.len() {
        if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, i));
            p += 1;
        } else if p < pattern.len() && pattern[p] == input[i] {
            p += 1;
            i += 1;
        } else if let Some((star_p, star_i)) = star {
            p = star_p + 1;
            i = star_i + 1;
            star = Some((star_p, star_i + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_shape() {
        let tenant = TenantId::new("t1");
        let key = response_key("entitled", Some(&tenant), Some("alice"), "top=20&skip=0");
        assert!(key.starts_with("cache:entitled:t1:alice:"));
        let anonymous = response_key("public", None, None, "top=20&skip=0");
        assert!(anonymous.starts_with("cache:public:*:*:"));
    }

    #[test]
    fn test_same_params_same_key() {
        let a = response_key("public", None, None, "top=20");
        let b = response_key("public", None, None, "top=20");
        let c = response_key("public", None, None, "top=21");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_glob_match_basics() {
        assert!(glob_match("cache:*:t1:*", "cache:entitled:t1:alice:abc"));
        assert!(!glob_match("cache:*:t1:*", "cache:entitled:t2:alice:abc"));
        assert!(glob_match("cache:well_known_*", "cache:well_known_index:*:*:abc"));
        assert!(!glob_match("cache:well_known_*", "cache:public:*:*:abc"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exact-not"));
    }

    #[test]
    fn test_tenant_pattern_matches_its_keys() {
        let tenant = TenantId::new("t1");
        let key = response_key("entitled", Some(&tenant), Some("alice"), "x");
        assert!(glob_match(&tenant_pattern(&tenant), &key));
        let other = response_key("entitled", Some(&TenantId::new("t2")), Some("a"), "x");
        assert!(!glob_match(&tenant_pattern(&tenant), &other));
    }
}
