pub mod aggregator;
pub mod app;
pub mod config;
pub mod dedup;
pub mod error;
pub mod http;
pub mod metrics;
pub mod notifications;
pub mod pages;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod threshold;
pub mod transport;
pub mod window;

pub use aggregator::{EvaluationMode, PageAggregator, PageView};
pub use notifications::{NotificationLog, NotificationRecord, Severity};
pub use state::SharedState;
pub use window::SampleWindow;
