/// Resolve a dot-notation path in a `serde_json::Value`.
///
/// - `"id"` → `value["id"]`
/// - `"person.id"` → `value["person"]["id"]`
///
/// Returns `None` if any segment is missing.
pub fn resolve_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
