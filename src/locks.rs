use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Prune idle entries once the table grows past this many keys.
const PRUNE_THRESHOLD: usize = 256;

/// One async mutex per key. Holding the guard serializes every
/// read-modify-write on that entity; different keys never contend.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if map.len() > PRUNE_THRESHOLD {
                map.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            map.entry(key.to_owned()).or_default().clone()
        };
        entry.lock_owned().await
    }

    /// Locks two keys in a fixed order so concurrent callers can't deadlock.
    pub async fn lock_pair(&self, a: &str, b: &str) -> (OwnedMutexGuard<()>, Option<OwnedMutexGuard<()>>) {
        if a == b {
            return (self.lock(a).await, None);
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first = self.lock(first).await;
        let second = self.lock(second).await;
        (first, Some(second))
    }
}
