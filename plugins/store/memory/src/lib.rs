use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use relay_api::{Attributes, Clock, EnrichmentRecord, RelayError, TtlStore};

// ═══════════════════════════════════════════════════════════════
//  MemoryTtlStore
// ═══════════════════════════════════════════════════════════════

/// In-memory TTL store.
///
/// Expired records stay in the map until `purge_expired()` runs, but `get`
/// never returns them. Per-key writes are atomic under the map lock.
pub struct MemoryTtlStore {
    records: RwLock<HashMap<String, EnrichmentRecord>>,
    clock: Arc<dyn Clock>,
}

impl MemoryTtlStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Number of physically stored records, expired ones included.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl TtlStore for MemoryTtlStore {
    fn put(
        &self,
        key: &str,
        attributes: Attributes,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let ttl_ms = i64::try_from(ttl.as_millis())
                .map_err(|_| RelayError::config(format!("ttl {ttl:?} out of range")))?;
            let record = EnrichmentRecord {
                attributes,
                expires_at_ms: self.clock.now_ms().saturating_add(ttl_ms),
            };
            self.records.write().await.insert(key, record);
            Ok(())
        })
    }

    fn get(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<EnrichmentRecord>, RelayError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let now = self.clock.now_ms();
            let records = self.records.read().await;
            Ok(records.get(&key).filter(|r| r.is_live(now)).cloned())
        })
    }

    fn purge_expired(&self) -> Pin<Box<dyn Future<Output = Result<usize, RelayError>> + Send + '_>> {
        Box::pin(async move {
            let now = self.clock.now_ms();
            let mut records = self.records.write().await;
            let before = records.len();
            records.retain(|_, r| r.is_live(now));
            let purged = before - records.len();
            if purged > 0 {
                tracing::debug!(purged, remaining = records.len(), "purged expired records");
            }
            Ok(purged)
        })
    }
}
