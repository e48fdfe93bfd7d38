use serde::{Deserialize, Serialize};

/// Domain attributes of an enrichment record (e.g. `firstName`, `lastName`).
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// Record stored in the TTL store under a correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub attributes: Attributes,
    /// Absolute expiry, Unix milliseconds. The record is authoritative only
    /// while `now_ms < expires_at_ms`.
    pub expires_at_ms: i64,
}

impl EnrichmentRecord {
    pub fn is_live(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at_ms
    }
}

/// An event joined with its enrichment attributes. Lives for one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedEvent {
    /// Id of the source event; sent to the target as the idempotency key.
    pub event_id: String,
    /// Correlation id; sent to the target as the path parameter.
    pub correlation_id: String,
    pub attributes: Attributes,
}

impl EnrichedEvent {
    /// JSON body sent to the target: all attributes plus the correlation id.
    /// An attribute named `id` never replaces the correlation id.
    pub fn body(&self) -> serde_json::Value {
        let mut body = self.attributes.clone();
        body.insert("id".into(), serde_json::Value::String(self.correlation_id.clone()));
        serde_json::Value::Object(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_is_live_until_expiry() {
        let record = EnrichmentRecord {
            attributes: Attributes::new(),
            expires_at_ms: 1_000,
        };
        assert!(record.is_live(999));
        assert!(!record.is_live(1_000));
    }

    #[test]
    fn body_carries_id_and_attributes() {
        let mut attributes = Attributes::new();
        attributes.insert("firstName".into(), json!("John"));
        let enriched = EnrichedEvent {
            event_id: "e-1".into(),
            correlation_id: "p-1".into(),
            attributes,
        };
        assert_eq!(enriched.body(), json!({"id": "p-1", "firstName": "John"}));
    }

    #[test]
    fn id_attribute_does_not_replace_correlation_id() {
        let mut attributes = Attributes::new();
        attributes.insert("id".into(), json!("stale"));
        attributes.insert("lastName".into(), json!("Doe"));
        let enriched = EnrichedEvent {
            event_id: "e-1".into(),
            correlation_id: "p-1".into(),
            attributes,
        };
        assert_eq!(enriched.body(), json!({"id": "p-1", "lastName": "Doe"}));
    }
}
