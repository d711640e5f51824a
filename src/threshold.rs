use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dedup::{NotificationDedupCache, fingerprint};
use crate::notifications::{NotificationRecord, Severity};
use crate::store::PendingWrite;

/// Minimum movement before an already-alerting metric alerts again.
pub const DEFAULT_CHANGE_EPSILON: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Above,
    Below,
}

/// Alert definition for one metric key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub metric_key: String,
    pub limit: f64,
    pub direction: Direction,
    pub title: String,
    /// Message template; `{value}` is replaced with the offending value.
    pub message: String,
    pub severity: Severity,
}

impl ThresholdRule {
    pub fn above(metric_key: &str, limit: f64, severity: Severity, title: &str, message: &str) -> Self {
        Self {
            metric_key: metric_key.to_string(),
            limit,
            direction: Direction::Above,
            title: title.to_string(),
            message: message.to_string(),
            severity,
        }
    }

    pub fn below(metric_key: &str, limit: f64, severity: Severity, title: &str, message: &str) -> Self {
        Self {
            direction: Direction::Below,
            ..Self::above(metric_key, limit, severity, title, message)
        }
    }

    pub fn is_crossed(&self, value: f64) -> bool {
        match self.direction {
            Direction::Above => value > self.limit,
            Direction::Below => value < self.limit,
        }
    }

    pub fn render_message(&self, value: f64) -> String {
        self.message.replace("{value}", &value.to_string())
    }
}

/// Hysteresis memory of one metric. `None` means NORMAL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdState {
    pub metric_key: String,
    pub last_fired_value: Option<f64>,
}

impl ThresholdState {
    pub fn is_alerting(&self) -> bool {
        self.last_fired_value.is_some()
    }
}

/// What happened to one evaluated value.
#[derive(Debug, Clone, PartialEq)]
pub enum Assessment {
    /// Missing or non-finite input; state untouched.
    Skipped,
    /// Not crossing the limit; state reset to NORMAL.
    Normal,
    /// Still crossing but within epsilon of the last fired value.
    SuppressedByEpsilon,
    /// Candidate fire swallowed by the dedup cache; state still advanced.
    SuppressedByDedup,
    Fired(NotificationRecord),
}

impl Assessment {
    pub fn into_notification(self) -> Option<NotificationRecord> {
        match self {
            Assessment::Fired(record) => Some(record),
            _ => None,
        }
    }
}

/// Per-metric two-state machine with magnitude and time based suppression.
pub struct ThresholdEvaluator {
    change_epsilon: f64,
    states: HashMap<String, ThresholdState>,
    dedup: NotificationDedupCache,
}

impl ThresholdEvaluator {
    pub fn new(change_epsilon: f64, dedup: NotificationDedupCache) -> Self {
        Self {
            change_epsilon,
            states: HashMap::new(),
            dedup,
        }
    }

    pub fn evaluate(
        &mut self,
        metric_key: &str,
        value: Option<f64>,
        rule: &ThresholdRule,
        now: DateTime<Utc>,
    ) -> Option<NotificationRecord> {
        self.assess(metric_key, value, rule, now).into_notification()
    }

    pub fn assess(
        &mut self,
        metric_key: &str,
        value: Option<f64>,
        rule: &ThresholdRule,
        now: DateTime<Utc>,
    ) -> Assessment {
        let Some(value) = value.filter(|v| v.is_finite()) else {
            return Assessment::Skipped;
        };

        let state = self
            .states
            .entry(metric_key.to_string())
            .or_insert_with(|| ThresholdState {
                metric_key: metric_key.to_string(),
                last_fired_value: None,
            });

        if !rule.is_crossed(value) {
            state.last_fired_value = None;
            return Assessment::Normal;
        }

        let moved_enough = match state.last_fired_value {
            None => true,
            Some(previous) => (value - previous).abs() > self.change_epsilon,
        };
        if !moved_enough {
            return Assessment::SuppressedByEpsilon;
        }

        state.last_fired_value = Some(value);

        if !self.dedup.should_show(&fingerprint(metric_key, value), now) {
            debug!(metric = metric_key, value, "alert suppressed by dedup cache");
            return Assessment::SuppressedByDedup;
        }

        Assessment::Fired(NotificationRecord::new(
            rule.severity,
            rule.title.clone(),
            rule.render_message(value),
            Some(value),
            now,
        ))
    }

    pub fn state(&self, metric_key: &str) -> Option<&ThresholdState> {
        self.states.get(metric_key)
    }

    /// Periodic purge of the dedup cache.
    pub fn cleanup_cache(&mut self, now: DateTime<Utc>) {
        self.dedup.cleanup(now);
    }

    pub fn take_cache_write(&mut self) -> Option<PendingWrite> {
        self.dedup.take_pending_write()
    }
}
