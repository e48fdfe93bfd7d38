use std::future::Future;
use std::pin::Pin;

use crate::error::RelayError;
use crate::record::EnrichedEvent;

/// One outbound call to the third-party endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetRequest {
    /// Substituted into the endpoint URL as the path parameter.
    pub path_param: String,
    /// Sent as `Idempotency-Key`, so redelivery of the same event is tolerable.
    pub idempotency_key: String,
    pub body: serde_json::Value,
}

impl From<&EnrichedEvent> for TargetRequest {
    fn from(event: &EnrichedEvent) -> Self {
        Self {
            path_param: event.correlation_id.clone(),
            idempotency_key: event.event_id.clone(),
            body: event.body(),
        }
    }
}

/// Response of the target, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetResponse {
    pub status: u16,
    pub body: String,
}

/// Transport to the external endpoint.
///
/// Any HTTP response (including 4xx/5xx) is `Ok`; timeouts and connection
/// failures are `Err` with `ErrorKind::Transient`. Classification happens in
/// the dispatcher.
pub trait TargetClient: Send + Sync {
    fn send(
        &self,
        request: TargetRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TargetResponse, RelayError>> + Send + '_>>;
}
