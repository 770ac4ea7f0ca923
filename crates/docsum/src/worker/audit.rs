//! Audit consumer — persists published audit records.
//!
//! A record is acknowledged only after it is durably stored, so a
//! persistence failure requeues the message (duplicates are acceptable
//! for an audit trail; silent loss is not).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audit::AuditRecord;
use crate::broker::{Broker, Delivery, AUDIT_QUEUE};
use crate::db::{audit_repo, Database};
use crate::error::Result;

const RECV_TIMEOUT: Duration = Duration::from_millis(500);

pub struct AuditConsumer {
    db: Database,
    broker: Broker,
}

impl AuditConsumer {
    pub fn new(db: Database, broker: Broker) -> Self {
        Self { db, broker }
    }

    pub async fn run(&self, shutdown: Arc<AtomicBool>) {
        log::info!("Audit consumer started, consuming '{}'", AUDIT_QUEUE);
        let consumer = self.broker.consumer(AUDIT_QUEUE);

        loop {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            match consumer.recv_timeout(RECV_TIMEOUT).await {
                Ok(Some(delivery)) => {
                    if let Err(e) = self.handle_delivery(delivery) {
                        log::error!("Audit processing error: {}", e);
                    }
                }
                Ok(None) => continue,
                Err(e) => {
                    log::error!("Failed to consume from '{}': {}", AUDIT_QUEUE, e);
                    tokio::time::sleep(RECV_TIMEOUT).await;
                }
            }
        }

        log::info!("Audit consumer stopped");
    }

    /// Persists one audit record and resolves its delivery.
    pub fn handle_delivery(&self, delivery: Delivery) -> Result<()> {
        let record: AuditRecord = match serde_json::from_slice(&delivery.body) {
            Ok(record) => record,
            // Requeueing an unparseable payload would loop forever.
            Err(e) => {
                log::warn!("Dropping malformed audit record: {}", e);
                delivery.nack(false)?;
                return Ok(());
            }
        };

        match audit_repo::insert(&self.db, &record) {
            Ok(_) => delivery.ack()?,
            Err(e) => {
                log::error!("Failed to persist audit record, requeueing: {}", e);
                delivery.nack(true)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditPublisher, AuditStatus, RequestSummary};
    use crate::db::audit_repo::AuditFilter;
    use crate::db::now_rfc3339;

    fn setup() -> (Database, Broker, AuditConsumer) {
        let db = Database::open_in_memory().unwrap();
        let broker = Broker::open_in_memory().unwrap();
        broker.declare_standard_queues().unwrap();
        let consumer = AuditConsumer::new(db.clone(), broker.clone());
        (db, broker, consumer)
    }

    fn sample_request() -> RequestSummary {
        RequestSummary {
            timestamp: now_rfc3339(),
            method: "GET".to_string(),
            path: "/api/jobs".to_string(),
            client_addr: "127.0.0.1".to_string(),
            status_code: 200,
            duration_ms: 3,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_record_is_persisted_and_acked() {
        let (db, broker, consumer) = setup();
        AuditPublisher::new(broker.clone()).record(&sample_request());

        let delivery = broker
            .consumer(AUDIT_QUEUE)
            .recv_timeout(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        consumer.handle_delivery(delivery).unwrap();

        let (rows, total) = audit_repo::query(&db, &AuditFilter::default()).unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].action, "GET /api/jobs");
        assert_eq!(rows[0].status, AuditStatus::Success);
        assert_eq!(broker.depth(AUDIT_QUEUE).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_malformed_record_is_dropped() {
        let (db, broker, consumer) = setup();
        broker.publish(AUDIT_QUEUE, b"not an audit record").unwrap();

        let delivery = broker
            .consumer(AUDIT_QUEUE)
            .recv_timeout(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        consumer.handle_delivery(delivery).unwrap();

        let (_, total) = audit_repo::query(&db, &AuditFilter::default()).unwrap();
        assert_eq!(total, 0);
        // No DLQ on the audit queue; the message is gone.
        assert_eq!(broker.depth(AUDIT_QUEUE).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persistence_failure_requeues() {
        let (db, broker, consumer) = setup();
        AuditPublisher::new(broker.clone()).record(&sample_request());

        // Break the table so the insert fails.
        db.with_conn(|conn| {
            conn.execute_batch("DROP TABLE audit_log")?;
            Ok(())
        })
        .unwrap();

        let delivery = broker
            .consumer(AUDIT_QUEUE)
            .recv_timeout(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        consumer.handle_delivery(delivery).unwrap();

        // The record stays queued for a later attempt.
        assert_eq!(broker.depth(AUDIT_QUEUE).unwrap(), 1);
    }
}
