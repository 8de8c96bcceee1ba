//! Audit dispatch.
//!
//! Every throttle decision produces an [`AuditRecord`] handed to an
//! [`AuditSink`] through a bounded queue. Delivery is strictly best-effort:
//! a full queue drops the record, a failing sink is logged and ignored, and
//! neither ever influences the decision returned to the caller.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;

/// One throttle decision, as reported to the audit collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    /// Governing rule, when a persisted rule matched.
    pub rule_id: Option<Uuid>,
    /// Scope the request was counted under, absent when no rule matched.
    pub scope: Option<String>,
    /// Resolved identifier, absent when no rule matched.
    pub identifier: Option<String>,
    /// The decision.
    pub allowed: bool,
    /// Quota left after the decision.
    pub remaining: Option<u64>,
    /// Client address as resolved for attribution.
    pub ip_address: String,
    /// User agent string, when the caller supplied one.
    pub user_agent: Option<String>,
    /// `"<METHOD> <PATH>"` of the request.
    pub endpoint: String,
    /// Wait hint attached to a denial.
    pub retry_after_secs: Option<u64>,
    /// Denial cause string, absent on allows.
    pub reason: Option<String>,
    /// When the decision was made.
    pub timestamp: DateTime<Utc>,
}

/// Destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Deliver one record. Errors are swallowed by the dispatcher.
    async fn record(&self, record: AuditRecord) -> Result<()>;
}

/// Sink that emits each record as a structured tracing event.
///
/// The default destination when the embedding application does not wire up
/// its own collaborator.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<()> {
        let payload = serde_json::to_string(&record)
            .map_err(|e| crate::error::FloodgateError::Audit(e.to_string()))?;
        info!(target: "floodgate::audit", %payload, "Throttle decision");
        Ok(())
    }
}

enum AuditMessage {
    Record(AuditRecord),
    Shutdown,
}

/// Bounded, fire-and-forget dispatch to an [`AuditSink`].
///
/// A worker task drains the queue and delivers records one at a time.
/// `dispatch` never waits: when the queue is full the record is dropped
/// with a warning, so audit backpressure can never stall the decision path.
pub struct AuditDispatcher {
    tx: mpsc::Sender<AuditMessage>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl AuditDispatcher {
    /// Start the dispatch worker. Must be called within a tokio runtime.
    pub fn spawn(sink: Arc<dyn AuditSink>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));

        let worker = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    AuditMessage::Record(record) => {
                        if let Err(e) = sink.record(record).await {
                            warn!(error = %e, "Audit sink rejected record");
                        }
                    }
                    AuditMessage::Shutdown => break,
                }
            }
        });

        Self {
            tx,
            worker: parking_lot::Mutex::new(Some(worker)),
        }
    }

    /// Enqueue a record without waiting.
    pub fn dispatch(&self, record: AuditRecord) {
        match self.tx.try_send(AuditMessage::Record(record)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Audit queue full, dropping record");
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Audit dispatcher stopped, dropping record");
            }
        }
    }

    /// Drain already-enqueued records, then stop the worker.
    pub async fn shutdown(&self) {
        // The shutdown marker queues behind every pending record, so the
        // sink sees all of them before the worker exits.
        let _ = self.tx.send(AuditMessage::Shutdown).await;
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "Audit worker terminated abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FloodgateError;
    use parking_lot::Mutex;

    fn sample_record(allowed: bool) -> AuditRecord {
        AuditRecord {
            rule_id: None,
            scope: Some("ip".to_string()),
            identifier: Some("10.0.0.1".to_string()),
            allowed,
            remaining: Some(3),
            ip_address: "10.0.0.1".to_string(),
            user_agent: None,
            endpoint: "GET /api/orders".to_string(),
            retry_after_secs: None,
            reason: None,
            timestamp: Utc::now(),
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<AuditRecord>>,
    }

    #[async_trait]
    impl AuditSink for RecordingSink {
        async fn record(&self, record: AuditRecord) -> Result<()> {
            self.records.lock().push(record);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn record(&self, _record: AuditRecord) -> Result<()> {
            Err(FloodgateError::Audit("sink unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_dispatch_delivers_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = AuditDispatcher::spawn(sink.clone(), 16);

        dispatcher.dispatch(sample_record(true));
        dispatcher.dispatch(sample_record(false));
        dispatcher.shutdown().await;

        let records = sink.records.lock();
        assert_eq!(records.len(), 2);
        assert!(records[0].allowed);
        assert!(!records[1].allowed);
    }

    #[tokio::test]
    async fn test_sink_errors_do_not_stop_the_worker() {
        let dispatcher = AuditDispatcher::spawn(Arc::new(FailingSink), 16);

        dispatcher.dispatch(sample_record(true));
        dispatcher.dispatch(sample_record(true));
        // Drains without panicking despite every delivery failing.
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_dispatch_after_shutdown_is_dropped() {
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = AuditDispatcher::spawn(sink.clone(), 16);

        dispatcher.shutdown().await;
        dispatcher.dispatch(sample_record(true));

        assert!(sink.records.lock().is_empty());
    }

    #[test]
    fn test_record_serializes_to_json() {
        let json = serde_json::to_string(&sample_record(true)).unwrap();
        assert!(json.contains("\"endpoint\":\"GET /api/orders\""));
        assert!(json.contains("\"allowed\":true"));
    }
}
