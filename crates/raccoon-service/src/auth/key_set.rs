//! Key set snapshots and the store that publishes them.
//!
//! A [`KeySet`] is built completely before it becomes visible. The
//! [`KeySetStore`] publishes it with a single atomic pointer swap, so readers
//! see the old set or the new one and never a mix. Readers never take a lock.

use crate::auth::jwk::{DecodeError, PublicKey};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use ring::digest;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Hex SHA-256 of the raw JWKS response body.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(raw: &[u8]) -> Self {
        Self(hex::encode(digest::digest(&digest::SHA256, raw)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // short form for logs
        f.write_str(self.0.get(..12).unwrap_or(&self.0))
    }
}

/// Errors obtaining a fresh key set. Cloned to every refresh waiter.
#[derive(Debug, Clone, Error)]
pub enum KeySetError {
    #[error("JWKS request failed: {0}")]
    Fetch(String),

    #[error("JWKS endpoint returned HTTP {0}")]
    Status(u16),

    #[error("JWKS response is not a valid key set document: {0}")]
    Parse(String),

    #[error("JWKS contains an undecodable key: {0}")]
    Decode(#[from] DecodeError),

    #[error("JWKS refresh timed out after {0:?}")]
    Timeout(Duration),

    #[error("JWKS refresh task failed: {0}")]
    TaskFailed(String),
}

impl KeySetError {
    /// Bounded label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            KeySetError::Fetch(_) => "fetch",
            KeySetError::Status(_) => "status",
            KeySetError::Parse(_) => "parse",
            KeySetError::Decode(_) => "decode",
            KeySetError::Timeout(_) => "timeout",
            KeySetError::TaskFailed(_) => "task_failed",
        }
    }
}

/// Immutable `kid -> key` mapping together with where it came from.
#[derive(Debug, Clone)]
pub struct KeySet {
    keys: HashMap<String, Arc<PublicKey>>,
    fingerprint: Fingerprint,
    refreshed_at: DateTime<Utc>,
}

impl KeySet {
    pub fn new(
        keys: HashMap<String, Arc<PublicKey>>,
        fingerprint: Fingerprint,
        refreshed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            keys,
            fingerprint,
            refreshed_at,
        }
    }

    pub fn get(&self, kid: &str) -> Option<Arc<PublicKey>> {
        self.keys.get(kid).cloned()
    }

    pub fn contains(&self, kid: &str) -> bool {
        self.keys.contains_key(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn refreshed_at(&self) -> DateTime<Utc> {
        self.refreshed_at
    }

    /// Whether a miss-triggered refresh is allowed now.
    pub fn cooldown_elapsed(&self, cooldown: Duration) -> bool {
        self.cooldown_elapsed_at(Utc::now(), cooldown)
    }

    /// Deterministic variant of [`KeySet::cooldown_elapsed`].
    ///
    /// Elapsed means `now >= refreshed_at + cooldown`. A cooldown too large
    /// to represent never elapses.
    pub fn cooldown_elapsed_at(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        let Ok(cooldown) = chrono::Duration::from_std(cooldown) else {
            return false;
        };
        match self.refreshed_at.checked_add_signed(cooldown) {
            Some(next_allowed) => now >= next_allowed,
            None => false,
        }
    }
}

/// Holder of the current [`KeySet`].
pub struct KeySetStore {
    current: ArcSwap<KeySet>,
}

impl KeySetStore {
    pub fn new(initial: KeySet) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    /// Snapshot of the latest fully built set.
    pub fn current(&self) -> Arc<KeySet> {
        self.current.load_full()
    }

    /// Publish `next` as the current set.
    ///
    /// `refreshed_at` never moves backwards: a set stamped earlier than the
    /// current one is published with the current timestamp. The clamp and
    /// the swap happen in one compare-and-swap loop, so concurrent writers
    /// cannot interleave between them.
    pub fn replace(&self, next: KeySet) -> Arc<KeySet> {
        let mut published = Arc::new(next);
        self.current.rcu(|previous| {
            if published.refreshed_at < previous.refreshed_at {
                let mut clamped = KeySet::clone(&published);
                clamped.refreshed_at = previous.refreshed_at;
                published = Arc::new(clamped);
            }
            Arc::clone(&published)
        });
        published
    }
}

impl fmt::Debug for KeySetStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.current.load();
        f.debug_struct("KeySetStore")
            .field("key_count", &current.len())
            .field("fingerprint", &current.fingerprint().to_string())
            .field("refreshed_at", &current.refreshed_at())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use rsa::BigUint;

    fn key(exponent: u32) -> Arc<PublicKey> {
        Arc::new(PublicKey::from_components(
            BigUint::from_bytes_be(&[0xb1, 0x7e, 0x33, 0x01]),
            exponent,
        ))
    }

    fn set_with(kids: &[&str], raw: &[u8], refreshed_at: DateTime<Utc>) -> KeySet {
        let keys = kids.iter().map(|kid| (kid.to_string(), key(65537))).collect();
        KeySet::new(keys, Fingerprint::of(raw), refreshed_at)
    }

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        let fp = Fingerprint::of(b"abc");

        assert_eq!(
            fp.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(fp.to_string(), "ba7816bf8f01");
    }

    #[test]
    fn test_fingerprint_distinguishes_bodies() {
        assert_eq!(Fingerprint::of(b"{}"), Fingerprint::of(b"{}"));
        assert_ne!(Fingerprint::of(b"{}"), Fingerprint::of(b"{ }"));
    }

    #[test]
    fn test_key_set_lookup() {
        let set = set_with(&["a", "b"], b"raw", Utc::now());

        assert_eq!(set.len(), 2);
        assert!(set.get("a").is_some());
        assert!(set.contains("b"));
        assert!(set.get("c").is_none());
    }

    #[test]
    fn test_cooldown_boundary() {
        let refreshed_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let set = set_with(&[], b"raw", refreshed_at);
        let hour = Duration::from_secs(3600);

        let just_before = refreshed_at + chrono::Duration::seconds(3599);
        let exactly = refreshed_at + chrono::Duration::seconds(3600);

        assert!(!set.cooldown_elapsed_at(just_before, hour));
        assert!(set.cooldown_elapsed_at(exactly, hour));
    }

    #[test]
    fn test_zero_cooldown_always_elapsed() {
        let refreshed_at = Utc::now();
        let set = set_with(&[], b"raw", refreshed_at);

        assert!(set.cooldown_elapsed_at(refreshed_at, Duration::ZERO));
    }

    #[test]
    fn test_huge_cooldown_never_elapses() {
        let set = set_with(&[], b"raw", Utc::now());

        assert!(!set.cooldown_elapsed(Duration::from_secs(u64::MAX)));
    }

    #[test]
    fn test_store_replace_swaps_whole_set() {
        let store = KeySetStore::new(set_with(&["old"], b"v1", Utc::now()));
        let before = store.current();

        store.replace(set_with(&["new-1", "new-2"], b"v2", Utc::now()));
        let after = store.current();

        // The earlier snapshot is untouched.
        assert!(before.contains("old"));
        assert_eq!(before.len(), 1);

        assert!(!after.contains("old"));
        assert_eq!(after.len(), 2);
        assert_eq!(after.fingerprint(), &Fingerprint::of(b"v2"));
    }

    #[test]
    fn test_store_refreshed_at_only_moves_forward() {
        let later = Utc::now();
        let earlier = later - chrono::Duration::hours(2);
        let store = KeySetStore::new(set_with(&["a"], b"v1", later));

        let published = store.replace(set_with(&["b"], b"v2", earlier));

        assert_eq!(published.refreshed_at(), later);
        assert_eq!(store.current().refreshed_at(), later);
        assert!(store.current().contains("b"));
    }

    #[test]
    fn test_concurrent_replace_keeps_latest_timestamp() {
        let base = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let store = Arc::new(KeySetStore::new(set_with(&["initial"], b"v0", base)));

        let writers: Vec<_> = (1..=16)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let stamp = base + chrono::Duration::seconds(i);
                    for _ in 0..100 {
                        store.replace(set_with(&["k"], b"v", stamp));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(
            store.current().refreshed_at(),
            base + chrono::Duration::seconds(16)
        );
    }

    #[test]
    fn test_kids_lists_every_key() {
        let set = set_with(&["a", "b"], b"raw", Utc::now());

        let mut kids: Vec<_> = set.kids().collect();
        kids.sort_unstable();

        assert_eq!(kids, ["a", "b"]);
    }

    #[test]
    fn test_error_kinds_are_bounded() {
        let errors = [
            KeySetError::Fetch("x".to_string()),
            KeySetError::Status(503),
            KeySetError::Parse("x".to_string()),
            KeySetError::Timeout(Duration::from_secs(10)),
            KeySetError::TaskFailed("x".to_string()),
        ];
        let kinds: Vec<_> = errors.iter().map(KeySetError::kind).collect();

        assert_eq!(kinds, ["fetch", "status", "parse", "timeout", "task_failed"]);
    }
}
