use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::aggregator::PageView;
use crate::notifications::{DEFAULT_LOG_CAPACITY, NotificationLog, NotificationRecord};
use crate::transport::TransportStatus;

/// Newest-first page of the notification log.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationList {
    pub unread: usize,
    pub total: usize,
    pub notifications: Vec<NotificationRecord>,
}

struct SharedStateInner {
    view: RwLock<PageView>,
    notifications: RwLock<NotificationLog>,
    transport: RwLock<TransportStatus>,
    last_snapshot_at: RwLock<Option<DateTime<Utc>>>,
    // Serialises log writes so an older snapshot never lands after a newer one.
    log_writer: Mutex<()>,
}

/// Read model shared between the transport driver (writer) and the HTTP
/// handlers (readers).
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<SharedStateInner>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(NotificationLog::new(DEFAULT_LOG_CAPACITY))
    }
}

impl SharedState {
    pub fn new(notifications: NotificationLog) -> Self {
        Self {
            inner: Arc::new(SharedStateInner {
                view: RwLock::new(PageView::default()),
                notifications: RwLock::new(notifications),
                transport: RwLock::new(TransportStatus::default()),
                last_snapshot_at: RwLock::new(None),
                log_writer: Mutex::new(()),
            }),
        }
    }

    pub async fn get_view(&self) -> PageView {
        self.inner.view.read().await.clone()
    }

    /// Replace the view after an accepted snapshot.
    pub async fn update_view(&self, view: PageView, accepted_at: DateTime<Utc>) {
        *self.inner.view.write().await = view;
        *self.inner.last_snapshot_at.write().await = Some(accepted_at);
    }

    pub async fn last_snapshot_at(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_snapshot_at.read().await
    }

    /// Apply `change` to the log, then save it once the guard is released.
    /// `change` reports whether anything needs saving.
    async fn modify_log<R>(&self, change: impl FnOnce(&mut NotificationLog) -> (R, bool)) -> R {
        let mut log = self.inner.notifications.write().await;
        let (result, dirty) = change(&mut *log);
        if !dirty {
            return result;
        }
        let pending = log.pending_write();
        let _writer = self.inner.log_writer.lock().await;
        drop(log);
        if let Some(pending) = pending {
            pending.commit_async().await;
        }
        result
    }

    pub async fn push_notifications(&self, records: Vec<NotificationRecord>) {
        if records.is_empty() {
            return;
        }
        self.modify_log(|log| {
            for record in records {
                log.push(record);
            }
            ((), true)
        })
        .await;
    }

    pub async fn list_notifications(&self, limit: usize) -> NotificationList {
        let log = self.inner.notifications.read().await;
        NotificationList {
            unread: log.unread_count(),
            total: log.len(),
            notifications: log.list(limit),
        }
    }

    pub async fn mark_notification_read(&self, id: i64) -> bool {
        self.modify_log(|log| {
            let found = log.mark_read(id);
            (found, found)
        })
        .await
    }

    pub async fn mark_all_notifications_read(&self) {
        self.modify_log(|log| {
            log.mark_all_read();
            ((), true)
        })
        .await;
    }

    pub async fn unread_count(&self) -> usize {
        self.inner.notifications.read().await.unread_count()
    }

    pub async fn get_transport(&self) -> TransportStatus {
        self.inner.transport.read().await.clone()
    }

    pub async fn update_transport(&self, status: TransportStatus) {
        *self.inner.transport.write().await = status;
    }

    /// Ready once a snapshot was accepted within `max_staleness`.
    pub async fn is_ready(&self, max_staleness: Duration) -> bool {
        let Some(last) = self.last_snapshot_at().await else {
            return false;
        };
        let staleness = chrono::Duration::from_std(max_staleness)
            .unwrap_or_else(|_| chrono::Duration::seconds(15));
        Utc::now().signed_duration_since(last) <= staleness
    }
}
