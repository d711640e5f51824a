use std::collections::HashMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing::debug;

use crate::store::{DEDUP_CACHE_KEY, PendingWrite, SharedStore, load_json};

/// How long a fingerprint suppresses repeats.
pub const DEFAULT_DEDUP_WINDOW: std::time::Duration = std::time::Duration::from_secs(300);

/// Dedup key for a metric value: `metric:rounded_value`.
pub fn fingerprint(metric_key: &str, value: f64) -> String {
    format!("{metric_key}:{}", value.round() as i64)
}

/// Time-windowed cache of alert fingerprints.
///
/// Lookups expire entries on their own; [`cleanup`](Self::cleanup) only
/// bounds memory. Changes are saved through
/// [`take_pending_write`](Self::take_pending_write).
pub struct NotificationDedupCache {
    duration: Duration,
    entries: HashMap<String, DateTime<Utc>>,
    store: Option<SharedStore>,
    dirty: bool,
}

impl NotificationDedupCache {
    pub fn new(duration: std::time::Duration) -> Self {
        Self {
            duration: to_chrono(duration),
            entries: HashMap::new(),
            store: None,
            dirty: false,
        }
    }

    /// Restore persisted entries, discarding those already older than the window.
    pub fn load(duration: std::time::Duration, store: SharedStore, now: DateTime<Utc>) -> Self {
        let mut cache = Self::new(duration);
        let persisted: HashMap<String, i64> =
            load_json(store.as_ref(), DEDUP_CACHE_KEY).unwrap_or_default();
        for (key, millis) in persisted {
            let Some(shown_at) = Utc.timestamp_millis_opt(millis).single() else {
                continue;
            };
            if now.signed_duration_since(shown_at) < cache.duration {
                cache.entries.insert(key, shown_at);
            }
        }
        debug!(entries = cache.entries.len(), "restored notification cache");
        cache.store = Some(store);
        cache
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true and records `now` when the fingerprint is new or expired.
    /// A suppressed lookup leaves the stored timestamp untouched.
    pub fn should_show(&mut self, fingerprint: &str, now: DateTime<Utc>) -> bool {
        if let Some(last_shown) = self.entries.get(fingerprint) {
            if now.signed_duration_since(*last_shown) < self.duration {
                return false;
            }
        }
        self.entries.insert(fingerprint.to_string(), now);
        self.dirty = true;
        true
    }

    /// Drop entries older than the window.
    pub fn cleanup(&mut self, now: DateTime<Utc>) {
        let duration = self.duration;
        let before = self.entries.len();
        self.entries
            .retain(|_, shown_at| now.signed_duration_since(*shown_at) <= duration);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, "purged expired notification cache entries");
            self.dirty = true;
        }
    }

    /// Snapshot of the entries if anything changed since the last one.
    pub fn take_pending_write(&mut self) -> Option<PendingWrite> {
        if !self.dirty {
            return None;
        }
        let store = self.store.as_ref()?;
        self.dirty = false;
        let snapshot: HashMap<&str, i64> = self
            .entries
            .iter()
            .map(|(key, at)| (key.as_str(), at.timestamp_millis()))
            .collect();
        PendingWrite::encode(store, DEDUP_CACHE_KEY, &snapshot)
    }

    pub fn persist(&mut self) {
        if let Some(pending) = self.take_pending_write() {
            pending.commit();
        }
    }
}

pub(crate) fn to_chrono(duration: std::time::Duration) -> Duration {
    Duration::from_std(duration).unwrap_or_else(|_| Duration::seconds(300))
}
