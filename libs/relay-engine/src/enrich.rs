use std::sync::Arc;

use relay_api::{Attributes, Clock, EnrichedEvent, Event, RelayError, TtlStore};

/// Result of a successful lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Enriched(EnrichedEvent),
    /// No live record for the correlation id.
    Absent { correlation_id: String },
}

/// Joins events with the live enrichment record of their correlation id.
pub struct EnrichmentResolver {
    store: Arc<dyn TtlStore>,
    clock: Arc<dyn Clock>,
    correlation_field: String,
    /// Attributes to project; empty means all.
    fields: Vec<String>,
}

impl EnrichmentResolver {
    pub fn new(
        store: Arc<dyn TtlStore>,
        clock: Arc<dyn Clock>,
        correlation_field: impl Into<String>,
        fields: Vec<String>,
    ) -> Self {
        Self {
            store,
            clock,
            correlation_field: correlation_field.into(),
            fields,
        }
    }

    /// Errors: `Permanent` when the event carries no correlation id,
    /// `Transient` when the store fails.
    pub async fn resolve(&self, event: &Event) -> Result<Resolution, RelayError> {
        let correlation_id = event.correlation_id(&self.correlation_field)?;

        let record = self
            .store
            .get(&correlation_id)
            .await
            .map_err(|e| e.with_context(format!("lookup '{correlation_id}'")))?;

        // The store filters expired records too, but expiry may pass between
        // its check and ours.
        let record = match record {
            Some(r) if r.is_live(self.clock.now_ms()) => r,
            Some(_) => {
                tracing::debug!(event_id = %event.id, correlation_id = %correlation_id, "enrichment record expired");
                return Ok(Resolution::Absent { correlation_id });
            }
            None => return Ok(Resolution::Absent { correlation_id }),
        };

        Ok(Resolution::Enriched(EnrichedEvent {
            event_id: event.id.clone(),
            correlation_id,
            attributes: self.project(record.attributes),
        }))
    }

    /// Enriched event with no attributes, for dispatching absent records.
    pub fn empty(&self, event: &Event, correlation_id: String) -> EnrichedEvent {
        EnrichedEvent {
            event_id: event.id.clone(),
            correlation_id,
            attributes: Attributes::new(),
        }
    }

    fn project(&self, mut attributes: Attributes) -> Attributes {
        if self.fields.is_empty() {
            return attributes;
        }
        self.fields
            .iter()
            .filter_map(|f| attributes.remove(f).map(|v| (f.clone(), v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_api::{EnrichmentRecord, ErrorKind, ManualClock};
    use serde_json::json;
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;
    use store_memory::MemoryTtlStore;

    fn event(payload: serde_json::Value) -> Event {
        Event {
            id: "e-1".into(),
            event_type: "PersonCreated".into(),
            source: "de.example.person".into(),
            ts_ms: 0,
            payload,
        }
    }

    fn person() -> Attributes {
        let mut a = Attributes::new();
        a.insert("firstName".into(), json!("John"));
        a.insert("lastName".into(), json!("Doe"));
        a.insert("email".into(), json!("john@example.com"));
        a
    }

    #[tokio::test]
    async fn projects_configured_fields() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(MemoryTtlStore::new(clock.clone()));
        store.put("p-1", person(), Duration::from_secs(120)).await.unwrap();

        let resolver = EnrichmentResolver::new(store, clock, "id", vec!["firstName".into(), "lastName".into()]);
        let Resolution::Enriched(enriched) = resolver.resolve(&event(json!({"id": "p-1"}))).await.unwrap() else {
            panic!("expected enriched");
        };
        assert_eq!(enriched.correlation_id, "p-1");
        assert_eq!(enriched.event_id, "e-1");
        assert_eq!(
            serde_json::Value::Object(enriched.attributes),
            json!({"firstName": "John", "lastName": "Doe"})
        );
    }

    #[tokio::test]
    async fn empty_field_list_keeps_all_attributes() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryTtlStore::new(clock.clone()));
        store.put("p-1", person(), Duration::from_secs(120)).await.unwrap();

        let resolver = EnrichmentResolver::new(store, clock, "id", vec![]);
        match resolver.resolve(&event(json!({"id": "p-1"}))).await.unwrap() {
            Resolution::Enriched(e) => assert_eq!(e.attributes.len(), 3),
            other => panic!("expected enriched, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn expired_or_missing_record_is_absent() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryTtlStore::new(clock.clone()));
        store.put("p-1", person(), Duration::from_secs(120)).await.unwrap();
        let resolver = EnrichmentResolver::new(store, clock.clone(), "id", vec![]);

        clock.advance(Duration::from_secs(120));
        assert_eq!(
            resolver.resolve(&event(json!({"id": "p-1"}))).await.unwrap(),
            Resolution::Absent {
                correlation_id: "p-1".into()
            }
        );
        assert!(matches!(
            resolver.resolve(&event(json!({"id": "p-2"}))).await.unwrap(),
            Resolution::Absent { .. }
        ));
    }

    #[tokio::test]
    async fn nested_correlation_field() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryTtlStore::new(clock.clone()));
        store.put("p-9", person(), Duration::from_secs(120)).await.unwrap();
        let resolver = EnrichmentResolver::new(store, clock, "person.id", vec![]);

        let resolved = resolver.resolve(&event(json!({"person": {"id": "p-9"}}))).await.unwrap();
        assert!(matches!(resolved, Resolution::Enriched(_)));
    }

    #[tokio::test]
    async fn missing_correlation_id_is_permanent() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryTtlStore::new(clock.clone()));
        let resolver = EnrichmentResolver::new(store, clock, "id", vec![]);

        let err = resolver.resolve(&event(json!({}))).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Permanent);
    }

    /// Returns a record that its own check would have filtered: the clock
    /// moved on between the store read and the resolver.
    struct LaggingStore;

    impl TtlStore for LaggingStore {
        fn put(
            &self,
            _key: &str,
            _attributes: Attributes,
            _ttl: Duration,
        ) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn get(
            &self,
            _key: &str,
        ) -> Pin<Box<dyn Future<Output = Result<Option<EnrichmentRecord>, RelayError>> + Send + '_>> {
            Box::pin(async {
                Ok(Some(EnrichmentRecord {
                    attributes: person(),
                    expires_at_ms: 500,
                }))
            })
        }
    }

    struct FailingStore;

    impl TtlStore for FailingStore {
        fn put(
            &self,
            _key: &str,
            _attributes: Attributes,
            _ttl: Duration,
        ) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + '_>> {
            Box::pin(async { Err(RelayError::transient("store down")) })
        }

        fn get(
            &self,
            _key: &str,
        ) -> Pin<Box<dyn Future<Output = Result<Option<EnrichmentRecord>, RelayError>> + Send + '_>> {
            Box::pin(async { Err(RelayError::transient("store down")) })
        }
    }

    #[tokio::test]
    async fn rechecks_expiry_against_clock() {
        let clock = Arc::new(ManualClock::new(500));
        let resolver = EnrichmentResolver::new(Arc::new(LaggingStore), clock, "id", vec![]);
        assert!(matches!(
            resolver.resolve(&event(json!({"id": "p-1"}))).await.unwrap(),
            Resolution::Absent { .. }
        ));
    }

    #[tokio::test]
    async fn store_failure_is_transient_not_absent() {
        let clock = Arc::new(ManualClock::new(0));
        let resolver = EnrichmentResolver::new(Arc::new(FailingStore), clock, "id", vec![]);
        let err = resolver.resolve(&event(json!({"id": "p-1"}))).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transient);
        assert!(err.message.contains("p-1"), "{}", err.message);
    }
}
