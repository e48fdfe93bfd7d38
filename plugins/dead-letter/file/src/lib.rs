use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use std::io::SeekFrom;

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use relay_api::{DeadLetterEntry, DeadLetterSink, RelayError};

// ════════════════════════════════════════════════════════════════
//  FileDeadLetterSink
// ════════════════════════════════════════════════════════════════

/// Append-only JSONL dead-letter log.
///
/// Each entry is one line written with a single `write_all`, so a duplicate
/// append never interleaves with another entry. Duplicates by event id are
/// collapsed on read, last line wins. A torn final line left by an
/// interrupted write is terminated before the next append, so only the
/// torn entry is lost and never the one after it.
pub struct FileDeadLetterSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileDeadLetterSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn append_line(&self, mut line: String) -> Result<(), RelayError> {
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RelayError::transient(format!("mkdir {}: {e}", parent.display())))?;
        }
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| RelayError::transient(format!("open {}: {e}", self.path.display())))?;
        if !ends_with_newline(&mut f)
            .await
            .map_err(|e| RelayError::transient(format!("read tail {}: {e}", self.path.display())))?
        {
            tracing::warn!(path = %self.path.display(), "dead-letter log ends with a torn line, terminating it");
            line.insert(0, '\n');
        }
        f.write_all(line.as_bytes())
            .await
            .map_err(|e| RelayError::transient(format!("write: {e}")))?;
        f.sync_data()
            .await
            .map_err(|e| RelayError::transient(format!("sync: {e}")))
    }

    async fn read_entries(&self) -> Result<Vec<DeadLetterEntry>, RelayError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(RelayError::transient(format!("read {}: {e}", self.path.display())));
            }
        };

        let mut index: HashMap<String, usize> = HashMap::new();
        let mut ordered: Vec<DeadLetterEntry> = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: DeadLetterEntry = match serde_json::from_str(line) {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), line = line_no + 1, error = %e, "skipping unreadable dead-letter line");
                    continue;
                }
            };
            match index.get(&entry.event.id).copied() {
                Some(i) => ordered[i] = entry,
                None => {
                    index.insert(entry.event.id.clone(), ordered.len());
                    ordered.push(entry);
                }
            }
        }
        Ok(ordered)
    }
}

/// True for an empty file or one whose last byte is `\n`.
/// Appends always go to the end, whatever the read position.
async fn ends_with_newline(f: &mut tokio::fs::File) -> std::io::Result<bool> {
    if f.metadata().await?.len() == 0 {
        return Ok(true);
    }
    f.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    f.read_exact(&mut last).await?;
    Ok(last[0] == b'\n')
}

impl DeadLetterSink for FileDeadLetterSink {
    fn append(
        &self,
        entry: DeadLetterEntry,
    ) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + '_>> {
        Box::pin(async move {
            let mut line = serde_json::to_string(&entry)?;
            line.push('\n');
            self.append_line(line).await
        })
    }

    fn list(&self) -> Pin<Box<dyn Future<Output = Result<Vec<DeadLetterEntry>, RelayError>> + Send + '_>> {
        Box::pin(self.read_entries())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_api::Event;

    fn entry(event_id: &str, reason: &str) -> DeadLetterEntry {
        DeadLetterEntry {
            event: Event {
                id: event_id.into(),
                event_type: "PersonCreated".into(),
                source: "test".into(),
                ts_ms: 1,
                payload: serde_json::json!({"id": "p-1"}),
            },
            receive_count: 2,
            reason: reason.into(),
            dead_lettered_at_ms: 10,
        }
    }

    #[tokio::test]
    async fn missing_file_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileDeadLetterSink::new(dir.path().join("dlq.jsonl"));
        assert!(sink.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicates_collapse_to_last_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dlq.jsonl");
        let sink = FileDeadLetterSink::new(&path);

        sink.append(entry("e-1", "HTTP 503")).await.unwrap();
        sink.append(entry("e-2", "timeout")).await.unwrap();
        sink.append(entry("e-1", "HTTP 400")).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 3);

        let listed = sink.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].event.id, "e-1");
        assert_eq!(listed[0].reason, "HTTP 400");
        assert_eq!(listed[1].event.id, "e-2");
    }

    #[tokio::test]
    async fn torn_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dlq.jsonl");
        let sink = FileDeadLetterSink::new(&path);
        sink.append(entry("e-1", "HTTP 503")).await.unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut f| std::io::Write::write_all(&mut f, b"{\"event\":"))
            .unwrap();

        let listed = sink.list().await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn append_after_torn_line_stays_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dlq.jsonl");
        std::fs::write(&path, b"{\"event\":").unwrap();
        let sink = FileDeadLetterSink::new(&path);

        sink.append(entry("e-9", "HTTP 503")).await.unwrap();
        sink.append(entry("e-10", "timeout")).await.unwrap();

        let listed = sink.list().await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|e| e.event.id.as_str()).collect();
        assert_eq!(ids, vec!["e-9", "e-10"]);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 3);
        assert!(raw.ends_with('\n'));
    }
}
