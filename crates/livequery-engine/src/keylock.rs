//! Per-key write serialization.
//!
//! Read-modify-write callers (entry-processor style) take the key's lock
//! before touching the record, so concurrent writers to the same key
//! observe last-writer-wins order while other keys proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockKey = (String, String);

/// Registry of per-(map, key) async locks.
///
/// Locks are created on demand and garbage-collected once no caller holds
/// or waits on them.
#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<LockKey, Weak<AsyncMutex<()>>>>,
}

/// Guard for one key; the key is writable while this is held.
pub struct KeyGuard {
    _guard: OwnedMutexGuard<()>,
}

impl KeyLocks {
    /// Create an empty lock registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `(map, key)`, waiting behind earlier writers.
    pub async fn lock(&self, map: &str, key: &str) -> KeyGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|_, weak| weak.strong_count() > 0);

            let entry = (map.to_string(), key.to_string());
            match locks.get(&entry).and_then(Weak::upgrade) {
                Some(existing) => existing,
                None => {
                    let fresh = Arc::new(AsyncMutex::new(()));
                    locks.insert(entry, Arc::downgrade(&fresh));
                    fresh
                }
            }
        };
        KeyGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of live locks (for tests).
    pub fn live_locks(&self) -> usize {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|_, weak| weak.strong_count() > 0);
        locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_same_key_serializes() {
        let locks = Arc::new(KeyLocks::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let locks = locks.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("m", "k").await;
                let seen = counter.fetch_add(1, Ordering::SeqCst);
                // while the guard is held no one else may be inside
                tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                assert_eq!(counter.load(Ordering::SeqCst), seen + 1);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_concurrently() {
        let locks = Arc::new(KeyLocks::new());
        let first = locks.lock("m", "a").await;

        // a different key must not block
        let second = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            locks.lock("m", "b"),
        )
        .await;
        assert!(second.is_ok());
        drop(first);
    }

    #[tokio::test]
    async fn test_locks_are_garbage_collected() {
        let locks = KeyLocks::new();
        {
            let _guard = locks.lock("m", "a").await;
            assert_eq!(locks.live_locks(), 1);
        }
        assert_eq!(locks.live_locks(), 0);
    }
}
