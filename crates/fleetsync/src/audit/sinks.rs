//! Audit sink implementations.

use std::sync::Arc;

use super::{AuditEvent, AuditSink, Severity};
use crate::db::{event_repo, Database};
use crate::worker::BackgroundQueue;

/// Writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, event: AuditEvent) {
        let level = match event.severity {
            Severity::Error => log::Level::Error,
            Severity::Warning => log::Level::Warn,
            Severity::Info | Severity::Success => log::Level::Info,
        };
        log::log!(
            level,
            "[{}] {}{}{}",
            event.event_type,
            event.title,
            if event.description.is_empty() { "" } else { ": " },
            event.description
        );
    }
}

/// Persists events to the `events` table. Runs the insert inline; wrap it in
/// a [`QueuedAuditSink`] to keep callers off the database lock.
#[derive(Clone)]
pub struct SqliteAuditSink {
    db: Database,
}

impl SqliteAuditSink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl AuditSink for SqliteAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Err(e) = event_repo::insert(&self.db, &event) {
            log::warn!("Failed to record audit event '{}': {}", event.event_type, e);
        }
    }
}

/// Forwards events to another sink from the background queue.
pub struct QueuedAuditSink {
    queue: BackgroundQueue,
    inner: Arc<dyn AuditSink>,
}

impl QueuedAuditSink {
    pub fn new(queue: BackgroundQueue, inner: Arc<dyn AuditSink>) -> Self {
        Self { queue, inner }
    }
}

impl AuditSink for QueuedAuditSink {
    fn record(&self, event: AuditEvent) {
        let inner = Arc::clone(&self.inner);
        // A dropped task has already been counted and logged by the queue.
        self.queue.submit("audit", async move {
            inner.record(event);
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::event_types;
    use std::time::Duration;

    #[test]
    fn test_sqlite_sink_persists() {
        let db = Database::open_in_memory().unwrap();
        let sink = SqliteAuditSink::new(db.clone());
        sink.record(AuditEvent::new(
            event_types::ENVIRONMENT_PAIRED,
            Severity::Info,
            "Paired",
        ));
        assert_eq!(event_repo::list_recent(&db, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_queued_sink_forwards() {
        let db = Database::open_in_memory().unwrap();
        let (queue, _handle) = BackgroundQueue::start(4);
        let sink = QueuedAuditSink::new(queue.clone(), Arc::new(SqliteAuditSink::new(db.clone())));

        sink.record(AuditEvent::new(
            event_types::CREDENTIALS_PROPAGATED,
            Severity::Success,
            "Pushed",
        ));

        for _ in 0..50 {
            if queue.stats().completed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(queue.stats().completed, 1);
        assert_eq!(event_repo::list_recent(&db, 10).unwrap().len(), 1);
    }
}
