//! In-process seen-set: per-target expiring registry of reported
//! fingerprints.
//!
//! The whole set shares one expiry, refreshed on every bulk insert. A posting
//! that disappears and resurfaces after expiry is reported as new again, the
//! accepted cost of keeping long-running targets bounded.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::AppError;
use crate::traits::SeenCache;

/// Default fingerprint lifetime: 7 days.
pub const DEFAULT_SEEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

struct SeenEntry {
    fingerprints: HashSet<String>,
    expires_at: Instant,
}

/// [`SeenCache`] backed by process memory.
///
/// Suitable for a single scheduler process; multi-process deployments use the
/// shared-storage implementation in `vigil-db` instead.
#[derive(Clone)]
pub struct MemorySeenCache {
    ttl: Duration,
    entries: Arc<Mutex<HashMap<Uuid, SeenEntry>>>,
}

impl MemorySeenCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_SEEN_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for MemorySeenCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SeenCache for MemorySeenCache {
    async fn contains(&self, target_id: Uuid, fp: &str) -> Result<bool, AppError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(&target_id)
            .is_some_and(|e| e.expires_at > Instant::now() && e.fingerprints.contains(fp)))
    }

    async fn insert_bulk(&self, target_id: Uuid, fps: &[String]) -> Result<(), AppError> {
        if fps.is_empty() {
            return Ok(());
        }
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let entry = entries.entry(target_id).or_insert_with(|| SeenEntry {
            fingerprints: HashSet::new(),
            expires_at: now + self.ttl,
        });
        if entry.expires_at <= now {
            entry.fingerprints.clear();
        }
        entry.fingerprints.extend(fps.iter().cloned());
        // Set-wide expiry, refreshed as a whole.
        entry.expires_at = now + self.ttl;
        tracing::debug!(%target_id, added = fps.len(), "Added fingerprints to seen set");
        Ok(())
    }

    async fn count(&self, target_id: Uuid) -> Result<usize, AppError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(&target_id)
            .filter(|e| e.expires_at > Instant::now())
            .map_or(0, |e| e.fingerprints.len()))
    }

    async fn clear(&self, target_id: Uuid) -> Result<(), AppError> {
        self.entries.lock().await.remove(&target_id);
        Ok(())
    }
}
