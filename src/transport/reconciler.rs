use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Source, TransportState};

/// Side effect requested by the reconciler. The driver executes these in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ConnectPush { after: Duration },
    StartPolling,
    StopPolling,
    ClosePush,
    CancelReconnect,
    Signal(Signal),
}

/// User-facing connection notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Connected,
    /// The reconnect cap was reached; polling stays on as the only source.
    ConnectionLost { attempts: u32 },
}

/// Point-in-time view of the reconciler, served on the HTTP API.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransportStatus {
    pub push: TransportState,
    pub poll: TransportState,
    pub polling: bool,
    pub authoritative: Option<Source>,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub exhausted: bool,
    pub last_source: Option<Source>,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub last_update_at: Option<DateTime<Utc>>,
}

/// State machine arbitrating between the push feed and the poll fallback.
///
/// Push always wins: polling runs exactly while push is not connected.
/// A push close schedules a reconnect after a fixed delay until
/// `max_reconnect_attempts` consecutive retries have failed, after which a
/// single [`Signal::ConnectionLost`] is raised and no retry is scheduled.
#[derive(Debug, Clone)]
pub struct TransportReconciler {
    reconnect_delay: Duration,
    max_reconnect_attempts: u32,
    push: TransportState,
    poll: TransportState,
    polling: bool,
    reconnect_attempts: u32,
    exhausted: bool,
    started: bool,
    stopped: bool,
    last_source: Option<Source>,
    last_update_at: Option<DateTime<Utc>>,
}

impl TransportReconciler {
    pub fn new(reconnect_delay: Duration, max_reconnect_attempts: u32) -> Self {
        Self {
            reconnect_delay,
            max_reconnect_attempts,
            push: TransportState::Disconnected,
            poll: TransportState::Disconnected,
            polling: false,
            reconnect_attempts: 0,
            exhausted: false,
            started: false,
            stopped: false,
            last_source: None,
            last_update_at: None,
        }
    }

    /// Connect push right away and arm the poll fallback alongside it.
    pub fn start(&mut self) -> Vec<Command> {
        if self.started || self.stopped {
            return Vec::new();
        }
        self.started = true;
        let mut commands = vec![Command::ConnectPush {
            after: Duration::ZERO,
        }];
        self.arm_polling(&mut commands);
        commands
    }

    /// Called right before a connection attempt. Returns false when the
    /// attempt should be skipped.
    pub fn begin_push_attempt(&mut self) -> bool {
        if self.stopped || self.push == TransportState::Connected {
            return false;
        }
        self.push = TransportState::Connecting;
        true
    }

    pub fn on_push_open(&mut self) -> Vec<Command> {
        if self.stopped {
            return vec![Command::ClosePush];
        }
        self.push = TransportState::Connected;
        self.reconnect_attempts = 0;
        self.exhausted = false;

        let mut commands = Vec::new();
        if self.polling {
            self.polling = false;
            self.poll = TransportState::Disconnected;
            commands.push(Command::StopPolling);
        }
        commands.push(Command::Signal(Signal::Connected));
        commands
    }

    /// Returns whether the message should be forwarded downstream.
    pub fn on_push_message(&mut self, now: DateTime<Utc>) -> bool {
        if self.stopped || self.push != TransportState::Connected {
            return false;
        }
        self.last_source = Some(Source::Push);
        self.last_update_at = Some(now);
        true
    }

    pub fn on_push_error(&mut self) -> Vec<Command> {
        if self.stopped {
            return Vec::new();
        }
        self.push = TransportState::Error;
        let mut commands = Vec::new();
        self.arm_polling(&mut commands);
        commands
    }

    pub fn on_push_close(&mut self) -> Vec<Command> {
        if self.stopped {
            return Vec::new();
        }
        if self.push != TransportState::Error {
            self.push = TransportState::Disconnected;
        }

        let mut commands = Vec::new();
        self.arm_polling(&mut commands);

        if self.reconnect_attempts < self.max_reconnect_attempts {
            self.reconnect_attempts += 1;
            commands.push(Command::ConnectPush {
                after: self.reconnect_delay,
            });
        } else if !self.exhausted {
            self.exhausted = true;
            commands.push(Command::Signal(Signal::ConnectionLost {
                attempts: self.reconnect_attempts,
            }));
        }
        commands
    }

    /// Whether a poll tick should issue a fetch.
    pub fn should_poll(&self) -> bool {
        self.polling && !self.stopped
    }

    /// Returns whether the fetched snapshot should be forwarded downstream.
    pub fn on_poll_success(&mut self, now: DateTime<Utc>) -> bool {
        if !self.should_poll() {
            return false;
        }
        self.poll = TransportState::Connected;
        self.last_source = Some(Source::Poll);
        self.last_update_at = Some(now);
        true
    }

    pub fn on_poll_failure(&mut self) {
        if self.should_poll() {
            self.poll = TransportState::Error;
        }
    }

    /// Tear everything down. Safe to call repeatedly.
    pub fn stop(&mut self) -> Vec<Command> {
        if self.stopped {
            return Vec::new();
        }
        self.stopped = true;

        let mut commands = vec![Command::CancelReconnect];
        if self.polling {
            self.polling = false;
            commands.push(Command::StopPolling);
        }
        if matches!(
            self.push,
            TransportState::Connected | TransportState::Connecting
        ) {
            commands.push(Command::ClosePush);
        }
        self.push = TransportState::Disconnected;
        self.poll = TransportState::Disconnected;
        commands
    }

    pub fn push_state(&self) -> TransportState {
        self.push
    }

    pub fn poll_state(&self) -> TransportState {
        self.poll
    }

    pub fn is_polling(&self) -> bool {
        self.polling
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// The transport currently driving the pipeline, if any.
    pub fn authoritative(&self) -> Option<Source> {
        if self.push == TransportState::Connected {
            Some(Source::Push)
        } else if self.polling {
            Some(Source::Poll)
        } else {
            None
        }
    }

    pub fn status(&self) -> TransportStatus {
        TransportStatus {
            push: self.push,
            poll: self.poll,
            polling: self.polling,
            authoritative: self.authoritative(),
            reconnect_attempts: self.reconnect_attempts,
            max_reconnect_attempts: self.max_reconnect_attempts,
            exhausted: self.exhausted,
            last_source: self.last_source,
            last_update_at: self.last_update_at,
        }
    }

    fn arm_polling(&mut self, commands: &mut Vec<Command>) {
        if !self.polling {
            self.polling = true;
            self.poll = TransportState::Connecting;
            commands.push(Command::StartPolling);
        }
    }
}
