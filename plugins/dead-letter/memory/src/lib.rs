use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::RwLock;

use relay_api::{DeadLetterEntry, DeadLetterSink, RelayError};

#[derive(Default)]
struct Entries {
    /// event id → position in `ordered`.
    index: HashMap<String, usize>,
    ordered: Vec<DeadLetterEntry>,
}

/// In-memory dead-letter sink. Upserts by event id, last write wins.
#[derive(Default)]
pub struct MemoryDeadLetterSink {
    entries: RwLock<Entries>,
}

impl MemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.ordered.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.ordered.is_empty()
    }

    pub async fn get(&self, event_id: &str) -> Option<DeadLetterEntry> {
        let entries = self.entries.read().await;
        entries.index.get(event_id).map(|&i| entries.ordered[i].clone())
    }
}

impl DeadLetterSink for MemoryDeadLetterSink {
    fn append(
        &self,
        entry: DeadLetterEntry,
    ) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + '_>> {
        Box::pin(async move {
            let mut entries = self.entries.write().await;
            match entries.index.get(&entry.event.id).copied() {
                Some(i) => entries.ordered[i] = entry,
                None => {
                    let i = entries.ordered.len();
                    entries.index.insert(entry.event.id.clone(), i);
                    entries.ordered.push(entry);
                }
            }
            Ok(())
        })
    }

    fn list(&self) -> Pin<Box<dyn Future<Output = Result<Vec<DeadLetterEntry>, RelayError>> + Send + '_>> {
        Box::pin(async move { Ok(self.entries.read().await.ordered.clone()) })
    }
}
