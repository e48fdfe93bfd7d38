use std::future::Future;
use std::pin::Pin;

use crate::error::RelayError;
use crate::outcome::DeadLetterEntry;

/// Append-only sink for dead-lettered messages.
pub trait DeadLetterSink: Send + Sync {
    /// Persist an entry. May be called more than once for the same event id
    /// (duplicate delivery); the latest reason wins and the entry stays whole.
    fn append(
        &self,
        entry: DeadLetterEntry,
    ) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + '_>>;

    /// All entries, one per event id, in first-written order.
    fn list(&self) -> Pin<Box<dyn Future<Output = Result<Vec<DeadLetterEntry>, RelayError>> + Send + '_>>;
}
