use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{NOTIFICATIONS_KEY, PendingWrite, SharedStore, load_json};

/// Maximum number of notifications kept in the log.
pub const DEFAULT_LOG_CAPACITY: usize = 50;

static LAST_ID: AtomicI64 = AtomicI64::new(0);

/// Time-based id that never repeats within the process, even for two
/// notifications created in the same millisecond.
fn next_id(now: DateTime<Utc>) -> i64 {
    let candidate = now.timestamp_millis();
    let mut current = LAST_ID.load(Ordering::Relaxed);
    loop {
        let next = candidate.max(current + 1);
        match LAST_ID.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => current = actual,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Danger,
    Info,
    Success,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Danger => "danger",
            Severity::Info => "info",
            Severity::Success => "success",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: i64,
    #[serde(rename = "type")]
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub value: Option<f64>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub fired_at: DateTime<Utc>,
    pub read: bool,
}

impl NotificationRecord {
    pub fn new(
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
        value: Option<f64>,
        fired_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: next_id(fired_at),
            severity,
            title: title.into(),
            message: message.into(),
            value,
            fired_at,
            read: false,
        }
    }
}

/// Bounded newest-first notification log.
///
/// Entries are never removed individually; the oldest fall off the tail once
/// the capacity is exceeded. Mutations only touch memory; callers save with
/// [`persist`](Self::persist) or hand a [`pending_write`](Self::pending_write)
/// to an async writer.
pub struct NotificationLog {
    capacity: usize,
    records: VecDeque<NotificationRecord>,
    store: Option<SharedStore>,
}

impl NotificationLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: VecDeque::new(),
            store: None,
        }
    }

    /// Restore the persisted log, truncated to `capacity`.
    pub fn load(capacity: usize, store: SharedStore) -> Self {
        let mut log = Self::new(capacity);
        let persisted: Vec<NotificationRecord> =
            load_json(store.as_ref(), NOTIFICATIONS_KEY).unwrap_or_default();
        log.records = persisted.into_iter().take(log.capacity).collect();
        if let Some(max_id) = log.records.iter().map(|r| r.id).max() {
            LAST_ID.fetch_max(max_id, Ordering::Relaxed);
        }
        log.store = Some(store);
        log
    }

    pub fn push(&mut self, record: NotificationRecord) {
        self.records.push_front(record);
        self.records.truncate(self.capacity);
    }

    /// Mark one notification read. Returns false for an unknown id.
    pub fn mark_read(&mut self, id: i64) -> bool {
        let Some(record) = self.records.iter_mut().find(|r| r.id == id) else {
            return false;
        };
        record.read = true;
        true
    }

    pub fn mark_all_read(&mut self) {
        for record in self.records.iter_mut() {
            record.read = true;
        }
    }

    pub fn unread_count(&self) -> usize {
        self.records.iter().filter(|r| !r.read).count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Newest first, at most `limit` entries.
    pub fn list(&self, limit: usize) -> Vec<NotificationRecord> {
        self.records.iter().take(limit).cloned().collect()
    }

    /// Snapshot of the log for the backing store, if there is one.
    pub fn pending_write(&self) -> Option<PendingWrite> {
        let store = self.store.as_ref()?;
        let records: Vec<&NotificationRecord> = self.records.iter().collect();
        PendingWrite::encode(store, NOTIFICATIONS_KEY, &records)
    }

    pub fn persist(&self) {
        if let Some(pending) = self.pending_write() {
            pending.commit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn record(title: &str) -> NotificationRecord {
        NotificationRecord::new(Severity::Warning, title, "msg", Some(1.0), Utc::now())
    }

    #[test]
    fn ids_are_strictly_increasing() {
        let now = Utc::now();
        let a = NotificationRecord::new(Severity::Info, "a", "", None, now);
        let b = NotificationRecord::new(Severity::Info, "b", "", None, now);
        assert!(b.id > a.id);
    }

    #[test]
    fn log_is_newest_first_and_bounded() {
        let mut log = NotificationLog::new(3);
        for i in 0..5 {
            log.push(record(&format!("n{i}")));
        }
        let titles: Vec<String> = log.list(10).into_iter().map(|r| r.title).collect();
        assert_eq!(titles, vec!["n4", "n3", "n2"]);
    }

    #[test]
    fn mark_read_and_mark_all_read() {
        let mut log = NotificationLog::new(DEFAULT_LOG_CAPACITY);
        let first = record("first");
        let first_id = first.id;
        log.push(first);
        log.push(record("second"));
        assert_eq!(log.unread_count(), 2);

        assert!(log.mark_read(first_id));
        assert!(!log.mark_read(-1));
        assert_eq!(log.unread_count(), 1);

        log.mark_all_read();
        assert_eq!(log.unread_count(), 0);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn persisted_log_survives_reload() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let mut log = NotificationLog::load(DEFAULT_LOG_CAPACITY, store.clone());
        log.push(record("kept"));
        log.mark_all_read();
        assert!(NotificationLog::load(DEFAULT_LOG_CAPACITY, store.clone()).is_empty());
        log.persist();

        let reloaded = NotificationLog::load(DEFAULT_LOG_CAPACITY, store.clone());
        let records = reloaded.list(10);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "kept");
        assert!(records[0].read);

        let truncated = NotificationLog::load(0, store);
        assert_eq!(truncated.len(), 1, "capacity is at least one");
    }

    #[test]
    fn log_without_store_has_nothing_to_write() {
        let mut log = NotificationLog::new(DEFAULT_LOG_CAPACITY);
        log.push(record("volatile"));
        assert!(log.pending_write().is_none());
    }

    #[test]
    fn severity_serializes_lowercase() {
        let json = serde_json::to_value(record("x")).expect("json");
        assert_eq!(json["type"], "warning");
    }
}
