//! In-process lock store: per-target exclusive token with expiry.
//!
//! The lock's value is cross-task exclusion; the TTL guards against holders
//! that die without releasing. Multi-process deployments use the
//! shared-storage implementation in `vigil-db`, which enforces the same
//! contract across scheduler instances.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::AppError;
use crate::traits::LockStore;

/// [`LockStore`] backed by process memory.
#[derive(Clone, Default)]
pub struct MemoryLockStore {
    locks: Arc<Mutex<HashMap<Uuid, Instant>>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockStore for MemoryLockStore {
    async fn acquire(&self, target_id: Uuid, ttl: Duration) -> Result<bool, AppError> {
        let mut locks = self.locks.lock().await;
        let now = Instant::now();
        match locks.get(&target_id) {
            Some(&expires_at) if expires_at > now => Ok(false),
            _ => {
                locks.insert(target_id, now + ttl);
                Ok(true)
            }
        }
    }

    async fn release(&self, target_id: Uuid) -> Result<(), AppError> {
        self.locks.lock().await.remove(&target_id);
        Ok(())
    }

    async fn is_locked(&self, target_id: Uuid) -> Result<bool, AppError> {
        let locks = self.locks.lock().await;
        Ok(locks
            .get(&target_id)
            .is_some_and(|&expires_at| expires_at > Instant::now()))
    }
}
