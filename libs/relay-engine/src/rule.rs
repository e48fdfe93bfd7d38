use relay_api::Event;

use crate::config::RuleConfig;

/// Inbound filter: an event is accepted when its type matches any type
/// pattern and its source matches any source pattern. `*` matches any run of
/// characters, including none. The default rule accepts everything.
#[derive(Debug, Clone)]
pub struct EventRule {
    event_types: Vec<String>,
    sources: Vec<String>,
}

impl Default for EventRule {
    fn default() -> Self {
        Self::from_config(&RuleConfig::default())
    }
}

impl EventRule {
    pub fn from_config(config: &RuleConfig) -> Self {
        Self {
            event_types: config.event_types.clone(),
            sources: config.sources.clone(),
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.event_types.iter().any(|p| wildcard_match(p, &event.event_type))
            && self.sources.iter().any(|p| wildcard_match(p, &event.source))
    }
}

/// Glob match with `*` as the only metacharacter.
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    let mut parts = pattern.split('*');
    // split always yields at least one item
    let first = parts.next().unwrap_or_default();
    let Some(mut rest) = value.strip_prefix(first) else {
        return false;
    };

    let middle: Vec<&str> = parts.collect();
    let Some((last, middle)) = middle.split_last() else {
        // no `*` at all: exact match
        return rest.is_empty();
    };

    for part in middle {
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}
