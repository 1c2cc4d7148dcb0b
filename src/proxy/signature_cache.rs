use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Anything shorter is a truncated tag and is treated as absent.
pub const MIN_SIGNATURE_LENGTH: usize = 50;

/// Public sentinel accepted upstream in place of a real thought signature.
/// Never written to or looked up in the cache.
pub const SKIP_SIGNATURE_VALIDATOR: &str = "skip_thought_signature_validator";

// Node.js proxy uses 2 hours TTL
const DEFAULT_SIGNATURE_TTL: Duration = Duration::from_secs(2 * 60 * 60);
const DEFAULT_CACHE_LIMIT: usize = 1000;
// Minimum gap between two expiry sweeps
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Provenance lookups keyed by `(session, exact thinking text)`.
///
/// Injected by reference into the reconciler so tests can substitute their own contents.
pub trait SignatureStore: Send + Sync {
    /// The tag this system observed for exactly this text in this session.
    fn lookup(&self, session_id: &str, text: &str) -> Option<String>;

    /// Remember a tag observed on a response. Malformed tags are ignored.
    fn record(&self, session_id: &str, text: &str, signature: &str);
}

/// Long enough to be a real tag and not the bypass sentinel
pub fn is_well_formed_signature(signature: &str) -> bool {
    signature.len() >= MIN_SIGNATURE_LENGTH && signature != SKIP_SIGNATURE_VALIDATOR
}

/// A block is trusted iff its own tag literally equals the cached tag for its text.
/// No session means no trust.
pub fn is_trusted(
    store: &dyn SignatureStore,
    session_id: Option<&str>,
    text: &str,
    signature: Option<&str>,
) -> bool {
    let (Some(session_id), Some(signature)) = (session_id, signature) else {
        return false;
    };
    if !is_well_formed_signature(signature) {
        return false;
    }
    store
        .lookup(session_id, text)
        .map(|cached| cached == signature)
        .unwrap_or(false)
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct EntryKey {
    session_id: String,
    text_digest: [u8; 32],
}

impl EntryKey {
    fn new(session_id: &str, text: &str) -> Self {
        let mut text_digest = [0u8; 32];
        text_digest.copy_from_slice(&Sha256::digest(text.as_bytes()));
        Self {
            session_id: session_id.to_string(),
            text_digest,
        }
    }
}

/// Cache entry with timestamp for TTL
#[derive(Clone, Debug)]
struct CacheEntry {
    // Kept verbatim so lookups compare literally, not by digest alone
    text: String,
    signature: String,
    timestamp: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.timestamp.elapsed() >= ttl
    }
}

/// Session-isolated thinking signature cache.
///
/// Entries are keyed by session and text, so one conversation can never
/// validate against a tag minted for another. Reads and writes touch a single
/// `DashMap` shard; the expiry sweep walks shards one at a time.
pub struct SignatureCache {
    entries: DashMap<EntryKey, CacheEntry>,
    ttl: Duration,
    limit: usize,
    last_sweep: Mutex<Instant>,
}

impl Default for SignatureCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureCache {
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_SIGNATURE_TTL, DEFAULT_CACHE_LIMIT)
    }

    pub fn with_settings(ttl: Duration, limit: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            limit,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Global singleton instance, sized from the loaded config
    pub fn global() -> &'static SignatureCache {
        static INSTANCE: OnceLock<SignatureCache> = OnceLock::new();
        INSTANCE.get_or_init(|| {
            let cfg = crate::modules::config::get_config();
            SignatureCache::with_settings(
                Duration::from_secs(cfg.signature_ttl_secs),
                cfg.signature_cache_limit,
            )
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 删除指定会话的全部缓存签名
    pub fn delete_session(&self, session_id: &str) {
        let before = self.entries.len();
        self.entries.retain(|k, _| k.session_id != session_id);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(
                "[SignatureCache] Deleted {} signatures for session: {}",
                removed,
                session_id
            );
        }
    }

    /// Clear all entries (for testing or manual reset)
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn sweep_expired(&self) {
        // Another writer is already sweeping; don't queue up behind it
        let Some(mut last) = self.last_sweep.try_lock() else {
            return;
        };
        if last.elapsed() < SWEEP_INTERVAL {
            return;
        }
        *last = Instant::now();

        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, v| !v.is_expired(ttl));
        let after = self.entries.len();
        if before != after {
            tracing::info!(
                "[SignatureCache] Cache cleanup: {} -> {} entries (limit: {})",
                before,
                after,
                self.limit
            );
        }
    }
}

impl SignatureStore for SignatureCache {
    fn lookup(&self, session_id: &str, text: &str) -> Option<String> {
        let key = EntryKey::new(session_id, text);

        let expired = match self.entries.get(&key) {
            None => return None,
            Some(entry) if entry.is_expired(self.ttl) => true,
            Some(entry) => {
                if entry.text != text {
                    return None;
                }
                tracing::debug!(
                    "[SignatureCache] Session {} -> HIT (len={})",
                    session_id,
                    entry.signature.len()
                );
                return Some(entry.signature.clone());
            }
        };

        if expired {
            let ttl = self.ttl;
            self.entries.remove_if(&key, |_, v| v.is_expired(ttl));
            tracing::debug!("[SignatureCache] Session {} -> EXPIRED", session_id);
        }
        None
    }

    fn record(&self, session_id: &str, text: &str, signature: &str) {
        if session_id.is_empty() || !is_well_formed_signature(signature) {
            return;
        }

        tracing::debug!(
            "[SignatureCache] Session {} -> storing signature (len={}, text_len={})",
            session_id,
            signature.len(),
            text.len()
        );
        self.entries.insert(
            EntryKey::new(session_id, text),
            CacheEntry {
                text: text.to_string(),
                signature: signature.to_string(),
                timestamp: Instant::now(),
            },
        );

        if self.entries.len() > self.limit {
            self.sweep_expired();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_lookup() {
        let cache = SignatureCache::new();
        let sig = "x".repeat(60);

        cache.record("sid-1", "let me think", &sig);
        assert_eq!(cache.lookup("sid-1", "let me think"), Some(sig));
        assert_eq!(cache.lookup("sid-1", "let me think!"), None);
    }

    #[test]
    fn test_min_length_and_sentinel_never_recorded() {
        let cache = SignatureCache::new();
        cache.record("sid-1", "a", "short");
        cache.record("sid-1", "b", SKIP_SIGNATURE_VALIDATOR);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_session_isolation() {
        let cache = SignatureCache::new();
        let sig = "s".repeat(64);
        cache.record("sid-a", "same text", &sig);

        assert!(cache.lookup("sid-b", "same text").is_none());
        assert!(is_trusted(&cache, Some("sid-a"), "same text", Some(&sig)));
        assert!(!is_trusted(&cache, Some("sid-b"), "same text", Some(&sig)));
        assert!(!is_trusted(&cache, None, "same text", Some(&sig)));
    }

    #[test]
    fn test_trust_requires_literal_equality() {
        let cache = SignatureCache::new();
        let sig = "q".repeat(64);
        cache.record("sid-1", "text", &sig);

        let other = "r".repeat(64);
        assert!(!is_trusted(&cache, Some("sid-1"), "text", Some(&other)));
        assert!(!is_trusted(&cache, Some("sid-1"), "text", None));
        assert!(!is_trusted(&cache, Some("sid-1"), "text ", Some(&sig)));
    }

    #[test]
    fn test_last_write_wins() {
        let cache = SignatureCache::new();
        let first = "1".repeat(60);
        let second = "2".repeat(60);
        cache.record("sid-1", "text", &first);
        cache.record("sid-1", "text", &second);
        assert_eq!(cache.lookup("sid-1", "text"), Some(second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entries_are_misses() {
        let cache = SignatureCache::with_settings(Duration::ZERO, 10);
        cache.record("sid-1", "text", &"e".repeat(60));
        assert!(cache.lookup("sid-1", "text").is_none());
        assert!(cache.is_empty(), "expired entry is evicted on read");
    }

    #[test]
    fn test_delete_session_and_clear() {
        let cache = SignatureCache::new();
        let sig = "d".repeat(60);
        cache.record("sid-1", "a", &sig);
        cache.record("sid-1", "b", &sig);
        cache.record("sid-2", "a", &sig);

        cache.delete_session("sid-1");
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup("sid-2", "a").is_some());

        cache.clear();
        assert!(cache.is_empty());
    }
}
