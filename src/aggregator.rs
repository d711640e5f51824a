use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ParseError;
use crate::notifications::NotificationRecord;
use crate::pages::{PageKind, PageProfile};
use crate::snapshot::{FullSnapshot, RowRecord, Snapshot, number_of, row_timestamp};
use crate::store::PendingWrite;
use crate::threshold::{Assessment, ThresholdEvaluator};
use crate::window::{MetricSample, SampleWindow, round_one_decimal};

/// Which value of a window is compared against the rule limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationMode {
    /// Newest sample.
    #[default]
    Latest,
    /// Rounded mean of the window.
    Average,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressionReason {
    Epsilon,
    Dedup,
}

impl SuppressionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SuppressionReason::Epsilon => "epsilon",
            SuppressionReason::Dedup => "dedup",
        }
    }
}

/// Result of one reconciliation step.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub notifications: Vec<NotificationRecord>,
    /// Metric key of each entry in `notifications`, same order.
    pub fired_metrics: Vec<String>,
    pub suppressed: Vec<(String, SuppressionReason)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricView {
    pub values: Vec<f64>,
    pub latest: Option<f64>,
    pub average: f64,
    pub server_average: Option<f64>,
    pub alerting: bool,
}

/// What the rendering side consumes after each step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PageView {
    pub page: Option<PageKind>,
    pub labels: Vec<String>,
    pub metrics: BTreeMap<String, MetricView>,
    pub latest_rows: Vec<RowRecord>,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Owns every window and the threshold state of one page.
pub struct PageAggregator {
    profile: PageProfile,
    mode: EvaluationMode,
    capacity: usize,
    windows: BTreeMap<String, SampleWindow>,
    labels: VecDeque<String>,
    latest_rows: Vec<RowRecord>,
    server_averages: BTreeMap<String, f64>,
    evaluator: ThresholdEvaluator,
    updated_at: Option<DateTime<Utc>>,
}

impl PageAggregator {
    pub fn new(
        profile: PageProfile,
        mode: EvaluationMode,
        capacity: usize,
        evaluator: ThresholdEvaluator,
    ) -> Self {
        let capacity = capacity.max(1);
        let windows = profile
            .series
            .iter()
            .map(|spec| (spec.key.to_string(), SampleWindow::new(capacity)))
            .collect();
        Self {
            profile,
            mode,
            capacity,
            windows,
            labels: VecDeque::with_capacity(capacity),
            latest_rows: Vec::new(),
            server_averages: BTreeMap::new(),
            evaluator,
            updated_at: None,
        }
    }

    pub fn page(&self) -> PageKind {
        self.profile.kind
    }

    pub fn window(&self, key: &str) -> Option<&SampleWindow> {
        self.windows.get(key)
    }

    /// Parse a raw payload and apply it. A malformed payload changes nothing.
    pub fn apply_payload(
        &mut self,
        payload: &str,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, ParseError> {
        let snapshot = Snapshot::parse(payload)?;
        self.apply(&snapshot, now)
    }

    pub fn apply(
        &mut self,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, ParseError> {
        match snapshot {
            Snapshot::Full(full) => self.replace_from(full, now),
            Snapshot::Row(row) => self.push_row(row, now)?,
        }
        self.updated_at = Some(now);
        Ok(self.evaluate(now))
    }

    fn replace_from(&mut self, full: &FullSnapshot, now: DateTime<Utc>) {
        for spec in &self.profile.series {
            if let Some(series) = full.series.get(spec.series_field) {
                let values = series.iter().copied().flatten();
                self.windows.insert(
                    spec.key.to_string(),
                    SampleWindow::from_values(self.capacity, values, now),
                );
            }
            if let Some(avg) = spec.average_field.and_then(|f| full.averages.get(f)) {
                self.server_averages.insert(spec.key.to_string(), *avg);
            }
        }

        if !full.labels.is_empty() {
            let skip = full.labels.len().saturating_sub(self.capacity);
            self.labels = full.labels.iter().skip(skip).cloned().collect();
        }

        self.latest_rows = full.latest.iter().take(self.capacity).cloned().collect();
        debug!(page = %self.profile.kind, "applied full snapshot");
    }

    fn push_row(&mut self, row: &RowRecord, now: DateTime<Utc>) -> Result<(), ParseError> {
        // Validate every field before touching any window.
        let mut values = Vec::with_capacity(self.profile.series.len());
        for spec in &self.profile.series {
            let value = match row.get(spec.row_field) {
                Some(raw) => number_of(spec.row_field, raw)?,
                None => None,
            };
            values.push((spec.key, value));
        }

        let at = row_timestamp(row).unwrap_or(now);
        for (key, value) in values {
            if let (Some(value), Some(window)) = (value, self.windows.get_mut(key)) {
                window.push_sample(MetricSample::new(at, value));
            }
        }

        if self.labels.len() == self.capacity {
            self.labels.pop_front();
        }
        self.labels.push_back(at.format("%H:%M:%S").to_string());

        self.latest_rows.insert(0, row.clone());
        self.latest_rows.truncate(self.capacity);
        Ok(())
    }

    fn current_value(&self, key: &str) -> Option<f64> {
        let window = self.windows.get(key)?;
        match self.mode {
            EvaluationMode::Latest => window.latest(),
            EvaluationMode::Average if window.is_empty() => None,
            EvaluationMode::Average => Some(window.average()),
        }
    }

    fn evaluate(&mut self, now: DateTime<Utc>) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        let rules = self.profile.rules.clone();
        for rule in &rules {
            let value = self.current_value(&rule.metric_key);
            match self.evaluator.assess(&rule.metric_key, value, rule, now) {
                Assessment::Fired(record) => {
                    info!(
                        metric = %rule.metric_key,
                        value = ?record.value,
                        severity = %record.severity,
                        "threshold alert fired"
                    );
                    outcome.notifications.push(record);
                    outcome.fired_metrics.push(rule.metric_key.clone());
                }
                Assessment::SuppressedByEpsilon => outcome
                    .suppressed
                    .push((rule.metric_key.clone(), SuppressionReason::Epsilon)),
                Assessment::SuppressedByDedup => outcome
                    .suppressed
                    .push((rule.metric_key.clone(), SuppressionReason::Dedup)),
                Assessment::Normal | Assessment::Skipped => {}
            }
        }
        outcome
    }

    pub fn cleanup_cache(&mut self, now: DateTime<Utc>) {
        self.evaluator.cleanup_cache(now);
    }

    /// Unsaved dedup cache changes, if any.
    pub fn take_cache_write(&mut self) -> Option<PendingWrite> {
        self.evaluator.take_cache_write()
    }

    pub fn view(&self) -> PageView {
        let metrics = self
            .windows
            .iter()
            .map(|(key, window)| {
                let alerting = self
                    .evaluator
                    .state(key)
                    .map(|s| s.is_alerting())
                    .unwrap_or(false);
                (
                    key.clone(),
                    MetricView {
                        values: window.values(),
                        latest: window.latest(),
                        average: window.average(),
                        server_average: self.server_averages.get(key).map(|v| round_one_decimal(*v)),
                        alerting,
                    },
                )
            })
            .collect();

        PageView {
            page: Some(self.profile.kind),
            labels: self.labels.iter().cloned().collect(),
            metrics,
            latest_rows: self.latest_rows.clone(),
            updated_at: self.updated_at,
        }
    }
}
