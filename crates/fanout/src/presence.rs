//! Concurrent presence set.
//!
//! Marks keys as "present" (typically: work for this key is in progress) so
//! that concurrent callers can skip or defer duplicate work.
//!
//! Locking is per shard of the underlying [`DashSet`]: operations on keys that
//! hash to different shards never contend, and no lock is held across calls.
//! Nothing here is global; share a set by wrapping it in an `Arc`.

use std::hash::Hash;

use dashmap::DashSet;

pub struct PresenceSet<K: Eq + Hash> {
    keys: DashSet<K>,
}

impl<K: Eq + Hash> Default for PresenceSet<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash> PresenceSet<K> {
    pub fn new() -> Self {
        Self {
            keys: DashSet::new(),
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.keys.contains(key)
    }

    /// Mark `key` present. Returns `false` if it already was.
    pub fn insert(&self, key: K) -> bool {
        self.keys.insert(key)
    }

    /// Clear `key`. Returns `false` if it was not present.
    pub fn remove(&self, key: &K) -> bool {
        self.keys.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<K: Eq + Hash + Clone> PresenceSet<K> {
    /// Atomically mark `key` present if it is absent.
    ///
    /// Returns `None` when another holder already has the key. The returned
    /// guard clears the key when dropped.
    pub fn claim(&self, key: K) -> Option<PresenceGuard<'_, K>> {
        if !self.keys.insert(key.clone()) {
            tracing::trace!("Presence key already claimed");
            return None;
        }
        Some(PresenceGuard {
            set: self,
            key: Some(key),
        })
    }
}

/// Clears its key from the set on drop.
#[must_use = "dropping the guard immediately releases the claim"]
pub struct PresenceGuard<'a, K: Eq + Hash> {
    set: &'a PresenceSet<K>,
    key: Option<K>,
}

impl<K: Eq + Hash> PresenceGuard<'_, K> {
    pub fn key(&self) -> Option<&K> {
        self.key.as_ref()
    }

    /// Keep the key marked present after the guard is gone.
    pub fn persist(mut self) {
        self.key = None;
    }
}

impl<K: Eq + Hash> Drop for PresenceGuard<'_, K> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.set.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::CancellationToken;
    use crate::foreach::go_foreach;

    #[test]
    fn insert_contains_remove() {
        let set = PresenceSet::new();
        assert!(!set.contains(&"job-1"));

        assert!(set.insert("job-1"));
        assert!(!set.insert("job-1"));
        assert!(set.contains(&"job-1"));
        assert_eq!(set.len(), 1);

        assert!(set.remove(&"job-1"));
        assert!(!set.remove(&"job-1"));
        assert!(set.is_empty());
    }

    #[test]
    fn claim_is_exclusive_until_dropped() {
        let set = PresenceSet::new();

        let guard = set.claim(7_u64);
        assert!(guard.is_some());
        assert!(set.claim(7).is_none());
        assert!(set.claim(8).is_some());

        drop(guard);
        assert!(!set.contains(&7));
        assert!(set.claim(7).is_some());
    }

    #[test]
    fn persisted_claim_stays_present() {
        let set = PresenceSet::new();
        set.claim("k".to_string()).unwrap().persist();
        assert!(set.contains(&"k".to_string()));
    }

    #[test]
    fn concurrent_claims_admit_exactly_one_holder() {
        let set = Arc::new(PresenceSet::new());
        let winners = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let set = Arc::clone(&set);
                let winners = Arc::clone(&winners);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    if let Some(guard) = set.claim("shared") {
                        winners.fetch_add(1, Ordering::SeqCst);
                        guard.persist();
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn dedupes_duplicate_keys_inside_foreach() {
        let seen = Arc::new(PresenceSet::new());
        let cancel = CancellationToken::new();

        let inputs = vec!["a", "b", "a", "c", "b", "a"];
        let first_seen = {
            let seen = Arc::clone(&seen);
            go_foreach(
                &cancel,
                inputs,
                move |_, key: &'static str| {
                    let fresh = seen.insert(key);
                    async move { Ok::<_, String>(fresh) }
                },
                false,
                3,
            )
            .await
        };

        assert_eq!(first_seen.iter().filter(|fresh| **fresh).count(), 3);
        assert_eq!(seen.len(), 3);
    }
}
