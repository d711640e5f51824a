//! Push/poll transport handling.
//!
//! [`TransportReconciler`] is the pure decision core: it is fed connection
//! events and answers with [`Command`]s. [`TransportDriver`] owns the real
//! sockets and timers and executes those commands on a single task, so the
//! reconciliation pipeline is only ever touched from one place.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::TransportError;

mod driver;
mod poll;
mod reconciler;
mod websocket;

pub use driver::{DriverSettings, TransportDriver};
pub use poll::HttpPoll;
pub use reconciler::{Command, Signal, TransportReconciler, TransportStatus};
pub use websocket::WebSocketPush;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl TransportState {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportState::Disconnected => "disconnected",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Error => "error",
        }
    }

    /// Numeric encoding exported on the `transport_state` gauge.
    pub fn gauge_value(self) -> i64 {
        match self {
            TransportState::Disconnected => 0,
            TransportState::Connecting => 1,
            TransportState::Connected => 2,
            TransportState::Error => 3,
        }
    }
}

/// Which transport delivered a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Push,
    Poll,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Push => "push",
            Source::Poll => "poll",
        }
    }
}

/// Long-lived server feed delivering text snapshots.
#[async_trait]
pub trait PushTransport: Send {
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Next text frame. `None` once the connection has closed. Must be
    /// cancel-safe: the driver drops the future whenever another event wins.
    async fn next_message(&mut self) -> Option<Result<String, TransportError>>;

    async fn close(&mut self);
}

/// One-shot snapshot fetch used while the push feed is down.
#[async_trait]
pub trait PollTransport: Send {
    async fn fetch(&mut self) -> Result<String, TransportError>;
}
