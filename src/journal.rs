use crate::canonical::Usage;
use crate::translate::Dialect;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

const MAX_JOURNAL_ENTRIES: usize = 10_000;

/// Status recorded when the client goes away before the response finishes.
pub const CLIENT_CLOSED_STATUS: u16 = 499;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Completed,
    Failed,
    Cancelled,
}

/// One served request. Never carries message content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub timestamp: DateTime<Utc>,
    pub dialect: String,
    pub requested_model: String,
    pub resolved_model: String,
    pub stream: bool,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub status: u16,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub duration_ms: u64,
}

impl RequestRecord {
    pub fn new(dialect: Dialect, requested_model: &str, resolved_model: &str, stream: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            dialect: dialect.to_string(),
            requested_model: requested_model.to_string(),
            resolved_model: resolved_model.to_string(),
            stream,
            input_tokens: 0,
            output_tokens: 0,
            status: 200,
            outcome: Outcome::Completed,
            error_type: None,
            duration_ms: 0,
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.input_tokens = usage.input_tokens;
        self.output_tokens = usage.output_tokens;
        self
    }

    pub fn failed(mut self, status: u16, error_type: impl Into<String>) -> Self {
        self.status = status;
        self.outcome = Outcome::Failed;
        self.error_type = Some(error_type.into());
        self
    }

    pub fn cancelled(mut self) -> Self {
        self.status = CLIENT_CLOSED_STATUS;
        self.outcome = Outcome::Cancelled;
        self
    }

    pub fn finished_after(mut self, started: Instant) -> Self {
        self.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self
    }
}

/// Ring buffer of recent requests, optionally mirrored to a JSONL file.
pub struct Journal {
    entries: VecDeque<RequestRecord>,
    file_path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
}

impl Journal {
    pub fn in_memory() -> Self {
        Self {
            entries: VecDeque::with_capacity(64),
            file_path: None,
            writer: None,
        }
    }

    /// Open (or create) a JSONL journal, replaying the tail of any existing file.
    /// A file holding unreadable or evicted lines is rewritten to the replayed tail.
    pub fn open(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file_path = file_path.as_ref().to_path_buf();

        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut entries = VecDeque::with_capacity(MAX_JOURNAL_ENTRIES);
        let mut stale = 0usize;

        if file_path.exists() {
            let reader = BufReader::new(File::open(&file_path)?);
            for line in reader.lines().map_while(std::result::Result::ok) {
                match serde_json::from_str::<RequestRecord>(&line) {
                    Ok(record) => {
                        if entries.len() >= MAX_JOURNAL_ENTRIES {
                            entries.pop_front();
                            stale += 1;
                        }
                        entries.push_back(record);
                    }
                    Err(_) => stale += 1,
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;

        let mut journal = Self {
            entries,
            file_path: Some(file_path),
            writer: Some(BufWriter::new(file)),
        };
        if stale > 0 {
            tracing::info!(stale, kept = journal.entries.len(), "compacting request journal");
            journal.compact()?;
        }
        Ok(journal)
    }

    pub fn record(&mut self, record: RequestRecord) {
        if let Some(ref mut writer) = self.writer {
            if let Ok(json) = serde_json::to_string(&record) {
                if let Err(e) = writeln!(writer, "{}", json).and_then(|()| writer.flush()) {
                    tracing::warn!("Failed to write journal entry: {}", e);
                }
            }
        }
        if self.entries.len() >= MAX_JOURNAL_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }

    /// Most recent first.
    pub fn recent(&self, limit: usize) -> Vec<RequestRecord> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    /// Rewrite the file so it holds only the buffered entries.
    fn compact(&mut self) -> std::io::Result<()> {
        let Some(path) = self.file_path.clone() else {
            return Ok(());
        };
        self.writer = None;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        let mut writer = BufWriter::new(file);
        for record in &self.entries {
            if let Ok(json) = serde_json::to_string(record) {
                writeln!(writer, "{}", json)?;
            }
        }
        writer.flush()?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }
}

#[derive(Clone)]
pub struct SharedJournal(Arc<Mutex<Journal>>);

impl SharedJournal {
    pub fn in_memory() -> Self {
        Self(Arc::new(Mutex::new(Journal::in_memory())))
    }

    pub fn open(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self(Arc::new(Mutex::new(Journal::open(file_path)?))))
    }

    pub fn record(&self, record: RequestRecord) {
        tracing::debug!(
            dialect = %record.dialect,
            model = %record.resolved_model,
            status = record.status,
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            "request journaled"
        );
        if let Ok(mut journal) = self.0.lock() {
            journal.record(record);
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<RequestRecord> {
        self.0.lock().map(|j| j.recent(limit)).unwrap_or_default()
    }

    /// Start timing a request; the record is written when the returned handle resolves.
    pub fn begin(&self, record: RequestRecord) -> PendingRecord {
        PendingRecord {
            journal: self.clone(),
            usage: Usage {
                input_tokens: record.input_tokens,
                output_tokens: record.output_tokens,
            },
            record: Some(record),
            started: Instant::now(),
        }
    }
}

/// A request in flight, journaled exactly once when it completes or fails.
/// Dropped unresolved (the client went away), it is journaled as cancelled
/// with the usage observed so far.
pub struct PendingRecord {
    journal: SharedJournal,
    record: Option<RequestRecord>,
    usage: Usage,
    started: Instant,
}

impl PendingRecord {
    /// Usage so far, kept for the cancelled record.
    pub fn observe(&mut self, usage: Usage) {
        self.usage = usage;
    }

    pub fn completed(mut self, usage: Usage) {
        if let Some(record) = self.record.take() {
            self.journal
                .record(record.with_usage(usage).finished_after(self.started));
        }
    }

    pub fn failed(mut self, usage: Usage, status: u16, error_type: &str) {
        if let Some(record) = self.record.take() {
            self.journal.record(
                record
                    .with_usage(usage)
                    .failed(status, error_type)
                    .finished_after(self.started),
            );
        }
    }
}

impl Drop for PendingRecord {
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            tracing::info!(
                dialect = %record.dialect,
                model = %record.resolved_model,
                "request cancelled before completion"
            );
            self.journal.record(
                record
                    .with_usage(self.usage)
                    .cancelled()
                    .finished_after(self.started),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(model: &str) -> RequestRecord {
        RequestRecord::new(Dialect::OpenAiChat, model, "backend", false).with_usage(Usage {
            input_tokens: 3,
            output_tokens: 4,
        })
    }

    #[test]
    fn test_recent_is_newest_first() {
        let journal = SharedJournal::in_memory();
        journal.record(record("a"));
        journal.record(record("b"));
        journal.record(record("c"));

        let recent = journal.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].requested_model, "c");
        assert_eq!(recent[1].requested_model, "b");
    }

    #[test]
    fn test_persists_and_replays_jsonl() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("journal.jsonl");

        {
            let journal = SharedJournal::open(&path).unwrap();
            journal.record(record("first"));
            journal.record(
                RequestRecord::new(Dialect::Anthropic, "claude", "backend", true)
                    .failed(404, "not_found_error"),
            );
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("\"dialect\":\"anthropic\""));

        let reopened = SharedJournal::open(&path).unwrap();
        let recent = reopened.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].outcome, Outcome::Failed);
        assert_eq!(recent[0].error_type.as_deref(), Some("not_found_error"));
        assert_eq!(recent[1].input_tokens, 3);
    }

    #[test]
    fn test_open_drops_unreadable_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.jsonl");
        let kept = serde_json::to_string(&record("kept")).unwrap();
        std::fs::write(&path, format!("not json\n{kept}\n")).unwrap();

        let journal = SharedJournal::open(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("kept"));

        journal.record(record("appended"));
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn test_pending_resolves_once() {
        let journal = SharedJournal::in_memory();
        journal
            .begin(RequestRecord::new(Dialect::Anthropic, "claude", "backend", true))
            .failed(Usage::default(), 429, "rate_limit_error");

        let recent = journal.recent(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].outcome, Outcome::Failed);
    }

    #[test]
    fn test_dropped_pending_is_cancelled() {
        let journal = SharedJournal::in_memory();
        {
            let mut pending =
                journal.begin(RequestRecord::new(Dialect::OpenAiResponses, "gpt", "backend", true));
            pending.observe(Usage {
                input_tokens: 5,
                output_tokens: 2,
            });
        }

        let recent = journal.recent(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].outcome, Outcome::Cancelled);
        assert_eq!(recent[0].status, CLIENT_CLOSED_STATUS);
        assert_eq!(recent[0].output_tokens, 2);
    }
}
