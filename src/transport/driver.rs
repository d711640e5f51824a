use std::future::{Future, pending};
use std::pin::Pin;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::{
    Command, PollTransport, PushTransport, Signal, Source, TransportReconciler, TransportState,
};
use crate::aggregator::PageAggregator;
use crate::app::AppContext;
use crate::config::AppConfig;
use crate::error::{PipelineError, TransportError};
use crate::notifications::{NotificationRecord, Severity};

/// Timing knobs of the driver loop.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub poll_interval: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub connect_timeout: Duration,
    pub cleanup_interval: Duration,
}

impl DriverSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            poll_interval: config.transport.poll_interval,
            reconnect_delay: config.transport.reconnect_delay,
            max_reconnect_attempts: config.transport.max_reconnect_attempts,
            connect_timeout: config.transport.connect_timeout,
            cleanup_interval: config.alerts.dedup_cleanup_interval,
        }
    }
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// In-flight push connect. Owns the transport until it resolves so the loop
/// keeps polling and watching for shutdown meanwhile.
type ConnectAttempt<P> = Pin<Box<dyn Future<Output = (P, Result<(), TransportError>)> + Send>>;

/// Single task that owns both transports, the reconciler and the page
/// aggregator. Every snapshot, whichever transport delivered it, goes through
/// the same [`PageAggregator`] on this task.
pub struct TransportDriver<P, Q> {
    ctx: AppContext,
    push: Option<P>,
    connecting: Option<ConnectAttempt<P>>,
    poll: Q,
    aggregator: PageAggregator,
    reconciler: TransportReconciler,
    settings: DriverSettings,
    poll_timer: Option<Interval>,
    reconnect_at: Option<Instant>,
}

impl<P, Q> TransportDriver<P, Q>
where
    P: PushTransport + 'static,
    Q: PollTransport + 'static,
{
    pub fn new(
        ctx: AppContext,
        push: P,
        poll: Q,
        aggregator: PageAggregator,
        settings: DriverSettings,
    ) -> Self {
        let reconciler =
            TransportReconciler::new(settings.reconnect_delay, settings.max_reconnect_attempts);
        Self {
            ctx,
            push: Some(push),
            connecting: None,
            poll,
            aggregator,
            reconciler,
            settings,
            poll_timer: None,
            reconnect_at: None,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Run until `cancel` fires, then tear both transports down.
    #[instrument(skip_all, fields(page = %self.aggregator.page()))]
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            poll_interval = ?self.settings.poll_interval,
            reconnect_delay = ?self.settings.reconnect_delay,
            max_reconnect_attempts = self.settings.max_reconnect_attempts,
            "starting transport driver"
        );

        let period = self.settings.cleanup_interval.max(Duration::from_millis(1));
        let mut cleanup = time::interval_at(Instant::now() + period, period);
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let commands = self.reconciler.start();
        self.execute(commands).await;

        loop {
            self.publish_status().await;

            let push_open = self.reconciler.push_state() == TransportState::Connected
                && self.push.is_some();
            let connecting = self.connecting.is_some();
            let polling = self.poll_timer.is_some();
            let reconnect_at = self.reconnect_at;

            let commands = tokio::select! {
                _ = cancel.cancelled() => break,
                message = next_frame(&mut self.push), if push_open => {
                    self.handle_push_message(message).await
                }
                (push, result) = resolve(&mut self.connecting), if connecting => {
                    self.connecting = None;
                    self.push = Some(push);
                    self.finish_push_attempt(result)
                }
                _ = sleep_until(reconnect_at), if reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    self.begin_push_attempt();
                    Vec::new()
                }
                _ = tick(&mut self.poll_timer), if polling => {
                    self.poll_once().await;
                    Vec::new()
                }
                _ = cleanup.tick() => {
                    self.aggregator.cleanup_cache(Utc::now());
                    self.persist_cache().await;
                    Vec::new()
                }
            };
            self.execute(commands).await;
        }

        if self.connecting.take().is_some() {
            debug!("abandoned pending push connect");
        }
        let commands = self.reconciler.stop();
        self.execute(commands).await;
        self.persist_cache().await;
        self.publish_status().await;
        info!("transport driver stopped");
    }

    /// Hand the push transport to a connect future polled by the main loop.
    fn begin_push_attempt(&mut self) {
        if self.connecting.is_some() {
            return;
        }
        let Some(mut push) = self.push.take() else {
            return;
        };
        if !self.reconciler.begin_push_attempt() {
            self.push = Some(push);
            return;
        }

        let timeout = self.settings.connect_timeout;
        self.connecting = Some(Box::pin(async move {
            let result = match time::timeout(timeout, push.connect()).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(timeout)),
            };
            (push, result)
        }));
    }

    fn finish_push_attempt(&mut self, result: Result<(), TransportError>) -> Vec<Command> {
        match result {
            Ok(()) => {
                info!("push transport connected");
                self.reconciler.on_push_open()
            }
            Err(err) => {
                warn!(
                    error = %PipelineError::from(err),
                    attempt = self.reconciler.reconnect_attempts(),
                    "push connection failed"
                );
                self.fail_push()
            }
        }
    }

    async fn handle_push_message(
        &mut self,
        message: Option<Result<String, TransportError>>,
    ) -> Vec<Command> {
        match message {
            Some(Ok(payload)) => {
                if self.reconciler.on_push_message(Utc::now()) {
                    self.ingest(Source::Push, &payload).await;
                }
                Vec::new()
            }
            Some(Err(err)) => {
                warn!(error = %PipelineError::from(err), "push transport failed");
                self.fail_push()
            }
            None => {
                info!("push transport closed");
                self.reconciler.on_push_close()
            }
        }
    }

    fn fail_push(&mut self) -> Vec<Command> {
        let mut commands = self.reconciler.on_push_error();
        commands.extend(self.reconciler.on_push_close());
        commands
    }

    async fn poll_once(&mut self) {
        if !self.reconciler.should_poll() {
            return;
        }
        match self.poll.fetch().await {
            Ok(payload) => {
                if self.reconciler.on_poll_success(Utc::now()) {
                    self.ingest(Source::Poll, &payload).await;
                }
            }
            Err(err) => {
                self.reconciler.on_poll_failure();
                self.ctx.metrics.inc_poll_failure();
                warn!(error = %PipelineError::from(err), "poll fetch failed");
            }
        }
    }

    /// Feed one payload through the aggregator and publish the results.
    async fn ingest(&mut self, source: Source, payload: &str) {
        let now = Utc::now();
        let outcome = match self.aggregator.apply_payload(payload, now) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.ctx.metrics.inc_parse_error(source.as_str());
                warn!(
                    source = source.as_str(),
                    error = %PipelineError::from(err),
                    "dropping malformed snapshot"
                );
                return;
            }
        };

        self.ctx.metrics.inc_snapshot(source.as_str());
        for (metric, reason) in &outcome.suppressed {
            self.ctx.metrics.inc_suppressed(metric, reason.as_str());
        }
        for (metric, record) in outcome.fired_metrics.iter().zip(&outcome.notifications) {
            self.ctx.metrics.inc_alert(metric, record.severity);
        }

        self.ctx.state.update_view(self.aggregator.view(), now).await;
        self.ctx.state.push_notifications(outcome.notifications).await;
        self.persist_cache().await;
    }

    async fn persist_cache(&mut self) {
        if let Some(pending) = self.aggregator.take_cache_write() {
            pending.commit_async().await;
        }
    }

    async fn execute(&mut self, commands: Vec<Command>) {
        for command in commands {
            match command {
                Command::ConnectPush { after } => {
                    if !after.is_zero() {
                        self.ctx.metrics.inc_reconnect_attempt();
                        debug!(
                            delay = ?after,
                            attempt = self.reconciler.reconnect_attempts(),
                            "push reconnect scheduled"
                        );
                    }
                    self.reconnect_at = Some(Instant::now() + after);
                }
                Command::StartPolling => {
                    // First tick completes immediately.
                    let mut timer = time::interval(self.settings.poll_interval);
                    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.poll_timer = Some(timer);
                    info!(interval = ?self.settings.poll_interval, "poll fallback started");
                }
                Command::StopPolling => {
                    self.poll_timer = None;
                    info!("poll fallback stopped");
                }
                Command::ClosePush => {
                    if let Some(push) = self.push.as_mut() {
                        push.close().await;
                    }
                }
                Command::CancelReconnect => self.reconnect_at = None,
                Command::Signal(signal) => self.raise(signal).await,
            }
        }
    }

    async fn raise(&mut self, signal: Signal) {
        let now = Utc::now();
        let record = match signal {
            Signal::Connected => NotificationRecord::new(
                Severity::Success,
                "Real-time connection",
                "Dashboard is receiving live updates",
                None,
                now,
            ),
            Signal::ConnectionLost { attempts } => {
                error!(
                    error = %PipelineError::ExhaustedRetries { attempts },
                    "push transport abandoned; polling only"
                );
                NotificationRecord::new(
                    Severity::Danger,
                    "Connection lost",
                    "Unable to reconnect to the server; data now arrives by polling",
                    None,
                    now,
                )
            }
        };
        self.ctx.state.push_notifications(vec![record]).await;
    }

    async fn publish_status(&mut self) {
        let status = self.reconciler.status();
        self.ctx
            .metrics
            .set_transport_state(Source::Push.as_str(), status.push);
        self.ctx
            .metrics
            .set_transport_state(Source::Poll.as_str(), status.poll);
        self.ctx.state.update_transport(status).await;
    }
}

async fn next_frame<P: PushTransport>(
    push: &mut Option<P>,
) -> Option<Result<String, TransportError>> {
    match push {
        Some(push) => push.next_message().await,
        None => pending().await,
    }
}

async fn resolve<P: 'static>(
    attempt: &mut Option<ConnectAttempt<P>>,
) -> (P, Result<(), TransportError>) {
    match attempt {
        Some(attempt) => attempt.as_mut().await,
        None => pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => pending().await,
    }
}
