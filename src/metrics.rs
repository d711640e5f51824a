use std::sync::Arc;

use anyhow::Result;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

use crate::notifications::Severity;
use crate::transport::TransportState;

/// Metrics registry for the agent scraped by Prometheus.
#[derive(Clone)]
pub struct AppMetrics {
    registry: Arc<Registry>,
    snapshots: SnapshotMetrics,
    alerts: AlertCounters,
    transport: TransportMetrics,
}

impl AppMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new_custom(Some("ecotrack".into()), None)?);

        let snapshots = SnapshotMetrics::register(&registry)?;
        let alerts = AlertCounters::register(&registry)?;
        let transport = TransportMetrics::register(&registry)?;

        Ok(Self {
            registry,
            snapshots,
            alerts,
            transport,
        })
    }

    /// Count an accepted snapshot per delivering transport.
    pub fn inc_snapshot(&self, source: &str) {
        self.snapshots.accepted.with_label_values(&[source]).inc();
    }

    pub fn inc_parse_error(&self, source: &str) {
        self.snapshots
            .parse_errors
            .with_label_values(&[source])
            .inc();
    }

    pub fn inc_alert(&self, metric: &str, severity: Severity) {
        let metric = sanitize_label(metric);
        self.alerts
            .fired
            .with_label_values(&[metric.as_str(), severity.as_str()])
            .inc();
    }

    pub fn inc_suppressed(&self, metric: &str, reason: &str) {
        let metric = sanitize_label(metric);
        self.alerts
            .suppressed
            .with_label_values(&[metric.as_str(), reason])
            .inc();
    }

    pub fn set_transport_state(&self, transport: &str, state: TransportState) {
        self.transport
            .state
            .with_label_values(&[transport])
            .set(state.gauge_value());
    }

    pub fn inc_reconnect_attempt(&self) {
        self.transport.reconnect_attempts.inc();
    }

    pub fn inc_poll_failure(&self) {
        self.transport.poll_failures.inc();
    }

    /// Encode metrics into Prometheus exposition format.
    pub fn encode(&self) -> Result<String> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[derive(Clone)]
struct SnapshotMetrics {
    accepted: IntCounterVec,
    parse_errors: IntCounterVec,
}

impl SnapshotMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let accepted = IntCounterVec::new(
            Opts::new("snapshots_total", "Snapshots applied to the pipeline"),
            &["source"],
        )?;
        registry.register(Box::new(accepted.clone()))?;

        let parse_errors = IntCounterVec::new(
            Opts::new(
                "snapshot_parse_errors_total",
                "Snapshots dropped because the payload was malformed",
            ),
            &["source"],
        )?;
        registry.register(Box::new(parse_errors.clone()))?;

        Ok(Self {
            accepted,
            parse_errors,
        })
    }
}

#[derive(Clone)]
struct AlertCounters {
    fired: IntCounterVec,
    suppressed: IntCounterVec,
}

impl AlertCounters {
    fn register(registry: &Registry) -> Result<Self> {
        let fired = IntCounterVec::new(
            Opts::new(
                "alerts_total",
                "Threshold alerts emitted grouped by metric and severity",
            ),
            &["metric", "severity"],
        )?;
        registry.register(Box::new(fired.clone()))?;

        let suppressed = IntCounterVec::new(
            Opts::new(
                "alerts_suppressed_total",
                "Candidate alerts swallowed by the epsilon or dedup layer",
            ),
            &["metric", "reason"],
        )?;
        registry.register(Box::new(suppressed.clone()))?;

        Ok(Self { fired, suppressed })
    }
}

#[derive(Clone)]
struct TransportMetrics {
    state: IntGaugeVec,
    reconnect_attempts: IntCounter,
    poll_failures: IntCounter,
}

impl TransportMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let state = IntGaugeVec::new(
            Opts::new(
                "transport_state",
                "Transport state (0=disconnected, 1=connecting, 2=connected, 3=error)",
            ),
            &["transport"],
        )?;
        registry.register(Box::new(state.clone()))?;

        let reconnect_attempts = IntCounter::with_opts(Opts::new(
            "push_reconnect_attempts_total",
            "Scheduled push reconnect attempts",
        ))?;
        registry.register(Box::new(reconnect_attempts.clone()))?;

        let poll_failures = IntCounter::with_opts(Opts::new(
            "poll_failures_total",
            "Failed poll fetches",
        ))?;
        registry.register(Box::new(poll_failures.clone()))?;

        Ok(Self {
            state,
            reconnect_attempts,
            poll_failures,
        })
    }
}

fn sanitize_label(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == ':' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
