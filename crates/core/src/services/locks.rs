//! Per-key async mutexes.
//!
//! Serializes work on one chat (or one chat-creation triple) while letting
//! unrelated keys proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Entries beyond this count trigger a sweep of idle locks.
const SWEEP_THRESHOLD: usize = 1024;

/// Guard for a held key; the key is released on drop.
pub struct KeyGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Registry of named locks.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl KeyedLocks {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let lock = {
            let mut locks = self.locks.lock().await;

            if locks.len() > SWEEP_THRESHOLD {
                // Only the registry holds a reference to an idle lock
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }

            Arc::clone(
                locks
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };

        KeyGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of keys currently tracked.
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Whether no keys are tracked.
    pub async fn is_empty(&self) -> bool {
        self.locks.lock().await.is_empty()
    }
}
