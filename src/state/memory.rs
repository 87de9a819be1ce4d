//! In-memory state storage backend.
//!
//! Used by tests and dry runs; nothing survives the process.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

use crate::error::{CairnError, Result, StateError};

use super::lock::LockInfo;
use super::store::StateStore;
use super::types::StateSnapshot;

/// In-memory state store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    snapshot: Mutex<Option<StateSnapshot>>,
    lock: Mutex<Option<LockInfo>>,
    saves: AtomicUsize,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding an existing snapshot.
    #[must_use]
    pub fn with_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            ..Self::default()
        }
    }

    /// Returns a copy of the stored snapshot.
    pub async fn snapshot(&self) -> Option<StateSnapshot> {
        self.snapshot.lock().await.clone()
    }

    /// Returns how many times the snapshot was saved.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<Option<StateSnapshot>> {
        Ok(self.snapshot.lock().await.clone())
    }

    async fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        *self.snapshot.lock().await = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        let mut guard = self.lock.lock().await;
        if let Some(existing) = guard.as_ref()
            && !existing.is_expired()
        {
            return Err(CairnError::State(StateError::LockedByOther {
                holder: existing.holder.clone(),
                since: existing.acquired_at.to_rfc3339(),
            }));
        }

        let info = LockInfo::new(holder, operation);
        *guard = Some(info.clone());
        Ok(info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        let mut guard = self.lock.lock().await;
        if guard.as_ref().is_some_and(|l| l.lock_id == lock_id) {
            *guard = None;
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<Option<LockInfo>> {
        Ok(self.lock.lock().await.take())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        Ok(self.lock.lock().await.clone())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_counts() {
        let store = MemoryStateStore::new();
        assert!(store.load().await.expect("load").is_none());

        store
            .save(&StateSnapshot::new("web"))
            .await
            .expect("save");
        store
            .save(&StateSnapshot::new("web"))
            .await
            .expect("save");

        assert_eq!(store.save_count(), 2);
        assert_eq!(store.snapshot().await.map(|s| s.stack), Some(String::from("web")));
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let store = MemoryStateStore::new();
        let lock = store.acquire_lock("a", "apply").await.expect("first lock");

        assert!(store.acquire_lock("b", "apply").await.is_err());
        store.release_lock(&lock.lock_id).await.expect("release");
        assert!(store.acquire_lock("b", "apply").await.is_ok());
    }
}
