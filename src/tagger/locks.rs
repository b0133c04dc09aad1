use super::schema::StoragePath;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// In-process, per-StoragePath serialization of resolve → write sequences.
/// Entries are dropped once nobody holds or waits on them.
#[derive(Default)]
pub struct KeyLocks {
    inner: Mutex<HashMap<StoragePath, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, path: &StoragePath) -> KeyGuard<'_> {
        let slot = {
            let mut map = self.inner.lock();
            Arc::clone(map.entry(path.clone()).or_default())
        };
        let guard = slot.lock_owned().await;
        KeyGuard {
            locks: self,
            path: path.clone(),
            guard: Some(guard),
        }
    }

    /// Number of paths currently held or awaited.
    pub fn active(&self) -> usize {
        self.inner.lock().len()
    }
}

pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    path: StoragePath,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.locks.inner.lock();
        if map
            .get(&self.path)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            map.remove(&self.path);
        }
    }
}
