//! In-process transient confirmation cache with per-entry TTL.
//!
//! Eviction is lazy: expired entries are dropped on access and on writes.
//! Losing an entry is always safe; the orchestrator falls back to durable
//! history.

use super::{ConfirmationCache, PendingBatch};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub struct MemoryCache {
    entries: Mutex<HashMap<i64, (PendingBatch, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfirmationCache for MemoryCache {
    async fn get(&self, conversation_id: i64) -> anyhow::Result<Option<PendingBatch>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, (_, expires)| *expires > now);
        Ok(entries.get(&conversation_id).map(|(batch, _)| batch.clone()))
    }

    async fn put(&self, batch: &PendingBatch, ttl: Duration) -> anyhow::Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, (_, expires)| *expires > now);
        entries.insert(batch.conversation_id, (batch.clone(), now + ttl));
        Ok(())
    }

    async fn delete(&self, conversation_id: i64) -> anyhow::Result<()> {
        self.entries.lock().remove(&conversation_id);
        Ok(())
    }
}
