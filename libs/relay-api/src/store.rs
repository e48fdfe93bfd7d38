use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::RelayError;
use crate::record::{Attributes, EnrichmentRecord};

/// Key/value store whose values expire.
///
/// The engine doesn't know concrete implementations; for the engine the
/// store is just this trait. Implementations must be safe for concurrent
/// use by many workers (atomic per-key writes).
pub trait TtlStore: Send + Sync {
    /// Store `attributes` under `key` with expiry `now + ttl`, replacing any
    /// previous value. `now` comes from the store's injected clock.
    fn put(
        &self,
        key: &str,
        attributes: Attributes,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + '_>>;

    /// Fetch a live record. `Ok(None)` when missing or expired.
    ///
    /// Backing-store failures are reported as `ErrorKind::Transient`,
    /// never as `Ok(None)`.
    fn get(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<EnrichmentRecord>, RelayError>> + Send + '_>>;

    /// Physically remove expired records. Returns how many were removed.
    ///
    /// Default: no-op, for stores that purge by themselves.
    fn purge_expired(&self) -> Pin<Box<dyn Future<Output = Result<usize, RelayError>> + Send + '_>> {
        Box::pin(async { Ok(0) })
    }
}
