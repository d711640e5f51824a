use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use dotenvy::Error as DotenvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ecotrack::aggregator::PageAggregator;
use ecotrack::app::AppContext;
use ecotrack::config;
use ecotrack::dedup::NotificationDedupCache;
use ecotrack::http;
use ecotrack::metrics::AppMetrics;
use ecotrack::notifications::NotificationLog;
use ecotrack::pages::PageKind;
use ecotrack::state::SharedState;
use ecotrack::store::{FileStore, MemoryStore, SharedStore};
use ecotrack::threshold::ThresholdEvaluator;
use ecotrack::transport::{DriverSettings, HttpPoll, TransportDriver, WebSocketPush};

#[derive(Debug, Parser)]
#[command(author, version, about = "ecotrack: live alerting for EcoTrack IoT dashboards")]
struct Cli {
    /// Path to YAML configuration file. Defaults to env ECOTRACK_CONFIG or built-in defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dashboard page to follow; overrides the configuration file.
    #[arg(short, long)]
    page: Option<PageKind>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();

    let mut config = config::load_config(cli.config.as_deref())?;
    if let Some(page) = cli.page {
        config.page = page;
    }
    let bind_addr: SocketAddr = config
        .http
        .bind
        .parse()
        .context("invalid http.bind address")?;

    let store: SharedStore = match &config.data_dir {
        Some(dir) => {
            let store = FileStore::open(dir.clone())
                .with_context(|| format!("failed to open data directory {}", dir.display()))?;
            info!(dir = %dir.display(), "persistence enabled");
            Arc::new(store)
        }
        None => {
            warn!("persistence disabled: ECOTRACK_DATA_DIR not set");
            Arc::new(MemoryStore::new())
        }
    };

    let notifications = NotificationLog::load(config.notifications.capacity, store.clone());
    let dedup = NotificationDedupCache::load(config.alerts.dedup_window, store, Utc::now());
    let evaluator = ThresholdEvaluator::new(config.alerts.change_epsilon, dedup);
    let aggregator = PageAggregator::new(
        config.page_profile(),
        config.alerts.evaluation,
        config.window.capacity,
        evaluator,
    );

    let push_url = config.push_url()?;
    let poll_url = config.poll_url()?;
    info!(page = %config.page, push = %push_url, poll = %poll_url, "resolved server endpoints");

    let push = WebSocketPush::new(push_url);
    let poll = HttpPoll::new(poll_url, config.transport.request_timeout)
        .context("failed to build HTTP client")?;
    let settings = DriverSettings::from_config(&config);

    let metrics = AppMetrics::new()?;
    let state = SharedState::new(notifications);
    let ctx = AppContext::new(config, metrics, state);

    let cancel = CancellationToken::new();
    let driver =
        TransportDriver::new(ctx.clone(), push, poll, aggregator, settings).spawn(cancel.clone());

    let router = http::create_router(ctx.clone());

    info!("ecotrack listening on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .context("failed to bind HTTP listener")?;

    if let Err(err) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = ?err, "server terminated with error");
    }

    cancel.cancel();
    if let Err(err) = driver.await {
        error!(error = ?err, "transport driver terminated abnormally");
    }

    Ok(())
}

fn load_env() {
    if let Err(err) = dotenvy::dotenv() {
        match err {
            DotenvError::Io(io_err) if io_err.kind() == ErrorKind::NotFound => {}
            other => eprintln!("warning: failed to load .env file: {other}"),
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ecotrack=info,axum::rejection=trace"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
