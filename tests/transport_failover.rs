use std::collections::VecDeque;
use std::future::pending;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

use ecotrack::aggregator::{EvaluationMode, PageAggregator};
use ecotrack::app::AppContext;
use ecotrack::config::AppConfig;
use ecotrack::dedup::{DEFAULT_DEDUP_WINDOW, NotificationDedupCache};
use ecotrack::error::TransportError;
use ecotrack::metrics::AppMetrics;
use ecotrack::notifications::Severity;
use ecotrack::pages::{PageKind, PageProfile};
use ecotrack::state::SharedState;
use ecotrack::threshold::ThresholdEvaluator;
use ecotrack::transport::{
    DriverSettings, PollTransport, PushTransport, Source, TransportDriver, TransportState,
};

const QUIET_SNAPSHOT: &str = r#"{"chart_labels":["12:00:00"],"cpu_data":[20],"ram_data":[30],"latest_data":[]}"#;

enum Frame {
    Text(String),
    Close,
}

#[derive(Default)]
struct PushLog {
    accept: bool,
    /// Connect never resolves, like a server that accepts TCP and goes silent.
    hang: bool,
    connects: usize,
    closes: usize,
}

struct FakePush {
    log: Arc<Mutex<PushLog>>,
    frames: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl PushTransport for FakePush {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let (accept, hang) = {
            let mut log = self.log.lock().unwrap();
            log.connects += 1;
            (log.accept, log.hang)
        };
        if hang {
            pending::<()>().await;
        }
        if accept {
            Ok(())
        } else {
            Err(TransportError::Connect("connection refused".into()))
        }
    }

    async fn next_message(&mut self) -> Option<Result<String, TransportError>> {
        match self.frames.recv().await {
            Some(Frame::Text(text)) => Some(Ok(text)),
            Some(Frame::Close) | None => None,
        }
    }

    async fn close(&mut self) {
        self.log.lock().unwrap().closes += 1;
    }
}

struct FakePoll {
    fetches: Arc<Mutex<Vec<Instant>>>,
    responses: VecDeque<Result<String, TransportError>>,
}

#[async_trait]
impl PollTransport for FakePoll {
    async fn fetch(&mut self) -> Result<String, TransportError> {
        self.fetches.lock().unwrap().push(Instant::now());
        self.responses
            .pop_front()
            .unwrap_or_else(|| Ok(QUIET_SNAPSHOT.to_string()))
    }
}

struct Harness {
    ctx: AppContext,
    push_log: Arc<Mutex<PushLog>>,
    frames: mpsc::UnboundedSender<Frame>,
    fetches: Arc<Mutex<Vec<Instant>>>,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl Harness {
    fn start(accept_push: bool, poll_responses: Vec<Result<String, TransportError>>) -> Self {
        Self::with_push(
            PushLog {
                accept: accept_push,
                ..PushLog::default()
            },
            poll_responses,
        )
    }

    fn with_push(push_log: PushLog, poll_responses: Vec<Result<String, TransportError>>) -> Self {
        let ctx = AppContext::new(
            AppConfig::default(),
            AppMetrics::new().expect("metrics"),
            SharedState::default(),
        );
        let push_log = Arc::new(Mutex::new(push_log));
        let (frames, rx) = mpsc::unbounded_channel();
        let fetches = Arc::new(Mutex::new(Vec::new()));

        let push = FakePush {
            log: push_log.clone(),
            frames: rx,
        };
        let poll = FakePoll {
            fetches: fetches.clone(),
            responses: poll_responses.into(),
        };
        let evaluator =
            ThresholdEvaluator::new(5.0, NotificationDedupCache::new(DEFAULT_DEDUP_WINDOW));
        let aggregator = PageAggregator::new(
            PageProfile::for_page(PageKind::Dashboard),
            EvaluationMode::Latest,
            10,
            evaluator,
        );

        let cancel = CancellationToken::new();
        let handle = TransportDriver::new(
            ctx.clone(),
            push,
            poll,
            aggregator,
            DriverSettings::default(),
        )
        .spawn(cancel.clone());

        Self {
            ctx,
            push_log,
            frames,
            fetches,
            cancel,
            handle,
        }
    }

    fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }

    fn connect_count(&self) -> usize {
        self.push_log.lock().unwrap().connects
    }

    fn set_accept(&self, accept: bool) {
        self.push_log.lock().unwrap().accept = accept;
    }

    async fn shutdown(self) -> Arc<Mutex<PushLog>> {
        self.cancel.cancel();
        self.handle.await.expect("driver task");
        self.push_log
    }
}

#[tokio::test(start_paused = true)]
async fn polling_stops_on_open_and_resumes_on_close() {
    let harness = Harness::start(true, Vec::new());
    sleep(Duration::from_millis(100)).await;

    let status = harness.ctx.state.get_transport().await;
    assert_eq!(status.push, TransportState::Connected);
    assert!(!status.polling);
    assert_eq!(status.authoritative, Some(Source::Push));

    let fetches_while_open = harness.fetch_count();
    sleep(Duration::from_secs(30)).await;
    assert_eq!(harness.fetch_count(), fetches_while_open, "no polling while push is open");

    harness.set_accept(false);
    harness.frames.send(Frame::Close).expect("send close");
    sleep(Duration::from_millis(100)).await;
    assert_eq!(
        harness.fetch_count(),
        fetches_while_open + 1,
        "poll fires within one tick of the close"
    );

    harness.set_accept(true);
    // Reconnect is scheduled 3s after the close.
    sleep(Duration::from_secs(3)).await;
    let status = harness.ctx.state.get_transport().await;
    assert_eq!(status.push, TransportState::Connected);
    assert!(!status.polling);

    let after_reopen = harness.fetch_count();
    sleep(Duration::from_secs(20)).await;
    assert_eq!(harness.fetch_count(), after_reopen, "polling stopped after reopen");

    let notifications = harness.ctx.state.list_notifications(10).await;
    let connected = notifications
        .notifications
        .iter()
        .filter(|n| n.title == "Real-time connection")
        .count();
    assert_eq!(connected, 2);

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_cap_leaves_polling_running() {
    let harness = Harness::start(false, Vec::new());

    // Initial attempt plus five retries three seconds apart.
    sleep(Duration::from_secs(60)).await;
    assert_eq!(harness.connect_count(), 6);

    let status = harness.ctx.state.get_transport().await;
    assert!(status.exhausted);
    assert!(status.polling);
    assert_eq!(status.authoritative, Some(Source::Poll));

    let before = harness.fetch_count();
    sleep(Duration::from_secs(50)).await;
    let polled = harness.fetch_count() - before;
    assert!((9..=11).contains(&polled), "expected ~10 polls, got {polled}");
    assert_eq!(harness.connect_count(), 6, "no reconnects after the cap");

    let fetches = harness.fetches.lock().unwrap().clone();
    let tail = &fetches[fetches.len() - 3..];
    for pair in tail.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_secs(5));
    }

    let notifications = harness.ctx.state.list_notifications(50).await;
    let lost: Vec<_> = notifications
        .notifications
        .iter()
        .filter(|n| n.title == "Connection lost")
        .collect();
    assert_eq!(lost.len(), 1);
    assert_eq!(lost[0].severity, Severity::Danger);

    let metrics = harness.ctx.metrics.encode().expect("encode");
    assert!(metrics.contains("ecotrack_push_reconnect_attempts_total 5"));

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn poll_snapshots_drive_alerts_and_failures_are_counted() {
    let hot = r#"{"chart_labels":"[\"12:00:00\"]","cpu_data":"[91]","ram_data":"[40]","latest_data":[]}"#;
    let harness = Harness::start(
        false,
        vec![
            Err(TransportError::Http { status: 502 }),
            Ok("{not json".to_string()),
            Ok(hot.to_string()),
        ],
    );
    sleep(Duration::from_secs(11)).await;

    let view = harness.ctx.state.get_view().await;
    assert_eq!(view.metrics["cpu"].latest, Some(91.0));
    assert!(view.metrics["cpu"].alerting);

    let list = harness.ctx.state.list_notifications(50).await;
    let high_cpu: Vec<_> = list
        .notifications
        .iter()
        .filter(|n| n.title == "High CPU")
        .collect();
    assert_eq!(high_cpu.len(), 1);
    assert_eq!(high_cpu[0].value, Some(91.0));

    let metrics = harness.ctx.metrics.encode().expect("encode");
    assert!(metrics.contains("ecotrack_poll_failures_total 1"), "{metrics}");
    assert!(
        metrics.contains("ecotrack_snapshot_parse_errors_total{source=\"poll\"} 1"),
        "{metrics}"
    );
    assert!(
        metrics.contains("ecotrack_alerts_total{metric=\"cpu\",severity=\"warning\"} 1"),
        "{metrics}"
    );

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn push_messages_feed_the_same_pipeline() {
    let harness = Harness::start(true, Vec::new());
    sleep(Duration::from_millis(100)).await;

    harness
        .frames
        .send(Frame::Text(
            r#"{"type":"new_data","data":{"cpu_usage":97,"ram_usage":20,"created_at":"2024-05-01T12:00:00+00:00"}}"#
                .to_string(),
        ))
        .expect("send");
    sleep(Duration::from_millis(100)).await;

    let view = harness.ctx.state.get_view().await;
    assert_eq!(view.metrics["cpu"].latest, Some(97.0));
    assert_eq!(view.labels.last().map(String::as_str), Some("12:00:00"));
    assert!(harness.ctx.state.is_ready(Duration::from_secs(15)).await);

    let status = harness.ctx.state.get_transport().await;
    assert_eq!(status.last_source, Some(Source::Push));

    let log = harness.shutdown().await;
    assert_eq!(log.lock().unwrap().closes, 1, "stop closes the open socket");
}

#[tokio::test(start_paused = true)]
async fn hanging_connect_does_not_stall_polling() {
    let started = Instant::now();
    let harness = Harness::with_push(
        PushLog {
            hang: true,
            ..PushLog::default()
        },
        Vec::new(),
    );
    sleep(Duration::from_secs(60)).await;

    let offsets: Vec<Duration> = harness
        .fetches
        .lock()
        .unwrap()
        .iter()
        .map(|at| *at - started)
        .collect();
    assert_eq!(offsets.first(), Some(&Duration::ZERO), "first poll is immediate");
    assert!((12..=13).contains(&offsets.len()), "polls: {offsets:?}");
    for pair in offsets.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_secs(5), "polls: {offsets:?}");
    }

    // Each attempt times out after 10s and is retried 3s later.
    assert!(harness.connect_count() >= 4);
    let status = harness.ctx.state.get_transport().await;
    assert_eq!(status.authoritative, Some(Source::Poll));

    let stopping = Instant::now();
    harness.shutdown().await;
    assert!(
        stopping.elapsed() < Duration::from_secs(1),
        "stop waited {:?}",
        stopping.elapsed()
    );
}
