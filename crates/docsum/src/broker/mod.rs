//! Durable message broker — store-and-forward queues with manual
//! acknowledgement and dead-letter routing.
//!
//! Messages are rows in a SQLite store, so published work survives a
//! process restart. Consumption is push-style: a `Consumer` claims one
//! ready message at a time and the caller must resolve every delivery
//! with `ack` or `nack`. Unacknowledged messages return to `ready` when
//! the store is reopened, giving at-least-once delivery.
//!
//! The broker is an explicit value handed to components at
//! construction; nothing in this crate reaches for a global channel.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

pub mod error;

pub use error::BrokerError;

/// Queue for dispatch messages; rejected deliveries route to the DLQ.
pub const JOB_QUEUE: &str = "summarization_jobs";
/// Terminal sink for permanently failed or retry-exhausted jobs.
pub const JOB_DLQ: &str = "summarization_jobs_dlq";
/// Queue for audit records; no DLQ.
pub const AUDIT_QUEUE: &str = "audit_logs";

const MAX_CONNECT_ATTEMPTS: u32 = 10;
const INITIAL_CONNECT_DELAY: Duration = Duration::from_secs(3);

/// Dispatch message payload: a bare job reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: i64,
}

/// Handle to the shared message store. Cloning is cheap (inner `Arc`).
#[derive(Clone)]
pub struct Broker {
    conn: Arc<Mutex<Connection>>,
    wakers: Arc<Mutex<HashMap<String, Arc<Notify>>>>,
}

impl Broker {
    /// Opens the message store at `path`, retrying with exponential
    /// backoff while the store is unavailable.
    pub async fn connect(path: &Path) -> Result<Self, BrokerError> {
        let mut delay = INITIAL_CONNECT_DELAY;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match Self::open(path) {
                Ok(broker) => return Ok(broker),
                Err(e) if attempt >= MAX_CONNECT_ATTEMPTS => {
                    log::error!(
                        "Failed to open broker store after {} attempts",
                        MAX_CONNECT_ATTEMPTS
                    );
                    return Err(e);
                }
                Err(e) => {
                    log::warn!(
                        "Failed to open broker store (attempt {}/{}): {}; retrying in {:?}",
                        attempt,
                        MAX_CONNECT_ATTEMPTS,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    /// Opens the message store in a single attempt.
    pub fn open(path: &Path) -> Result<Self, BrokerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BrokerError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let broker = Self::from_connection(conn)?;
        log::info!("Broker store opened at {}", path.display());
        Ok(broker)
    }

    /// Opens an in-memory store for testing.
    pub fn open_in_memory() -> Result<Self, BrokerError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, BrokerError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS queues (
                name TEXT PRIMARY KEY,
                dead_letter TEXT
            );
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                queue TEXT NOT NULL,
                body BLOB NOT NULL,
                state TEXT NOT NULL DEFAULT 'ready',
                delivery_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_queue_state
                ON messages(queue, state);",
        )?;

        // Messages claimed by a consumer that never resolved them are
        // redelivered after a restart (at-least-once).
        let recovered = conn.execute(
            "UPDATE messages SET state = 'ready' WHERE state = 'unacked'",
            [],
        )?;
        if recovered > 0 {
            log::info!("Recovered {} unacknowledged messages for redelivery", recovered);
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            wakers: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T, BrokerError>
    where
        F: FnOnce(&Connection) -> Result<T, BrokerError>,
    {
        let conn = self.conn.lock().map_err(|_| BrokerError::LockPoisoned)?;
        f(&conn)
    }

    fn waker(&self, queue: &str) -> Arc<Notify> {
        let mut wakers = self.wakers.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            wakers
                .entry(queue.to_string())
                .or_insert_with(|| Arc::new(Notify::new())),
        )
    }

    /// Declares a queue, optionally bound to a dead-letter target.
    /// Redeclaring updates the binding.
    pub fn declare_queue(&self, name: &str, dead_letter: Option<&str>) -> Result<(), BrokerError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO queues (name, dead_letter) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET dead_letter = excluded.dead_letter",
                params![name, dead_letter],
            )?;
            Ok(())
        })?;
        log::info!(
            "Declared queue '{}'{}",
            name,
            dead_letter
                .map(|d| format!(" (dead-letter: {})", d))
                .unwrap_or_default()
        );
        Ok(())
    }

    /// Declares the standard topology: the job queue bound to its DLQ,
    /// the DLQ itself, and the audit queue without dead-lettering.
    pub fn declare_standard_queues(&self) -> Result<(), BrokerError> {
        self.declare_queue(JOB_DLQ, None)?;
        self.declare_queue(JOB_QUEUE, Some(JOB_DLQ))?;
        self.declare_queue(AUDIT_QUEUE, None)?;
        Ok(())
    }

    fn dead_letter_of(&self, queue: &str) -> Result<Option<String>, BrokerError> {
        let target: Option<Option<String>> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT dead_letter FROM queues WHERE name = ?1",
                    params![queue],
                    |r| r.get(0),
                )
                .optional()?)
        })?;
        match target {
            Some(dead_letter) => Ok(dead_letter),
            None => Err(BrokerError::UnknownQueue(queue.to_string())),
        }
    }

    /// Publishes a raw message body to a declared queue.
    pub fn publish(&self, queue: &str, body: &[u8]) -> Result<(), BrokerError> {
        // Publishing to an undeclared queue is an error.
        self.dead_letter_of(queue)?;

        let now = chrono::Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (queue, body, created_at) VALUES (?1, ?2, ?3)",
                params![queue, body, now],
            )?;
            Ok(())
        })?;
        self.waker(queue).notify_one();
        Ok(())
    }

    /// Publishes a JSON-encoded message.
    pub fn publish_json<T: Serialize>(&self, queue: &str, value: &T) -> Result<(), BrokerError> {
        let body = serde_json::to_vec(value)?;
        self.publish(queue, &body)
    }

    /// Creates a consumer for one queue. Each consumer processes one
    /// message at a time; run more consumers to scale out.
    pub fn consumer(&self, queue: &str) -> Consumer {
        Consumer {
            broker: self.clone(),
            queue: queue.to_string(),
        }
    }

    /// Number of messages currently sitting in a queue (any state).
    pub fn depth(&self, queue: &str) -> Result<u64, BrokerError> {
        self.with_conn(|conn| {
            let count: u64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE queue = ?1",
                params![queue],
                |r| r.get(0),
            )?;
            Ok(count)
        })
    }

    /// Claims the oldest ready message, marking it unacknowledged.
    fn try_claim(&self, queue: &str) -> Result<Option<Delivery>, BrokerError> {
        let claimed = self.with_conn(|conn| {
            let row: Option<(i64, Vec<u8>, i64)> = conn
                .query_row(
                    "SELECT id, body, delivery_count FROM messages
                     WHERE queue = ?1 AND state = 'ready' ORDER BY id LIMIT 1",
                    params![queue],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
                )
                .optional()?;

            let Some((id, body, delivery_count)) = row else {
                return Ok(None);
            };
            conn.execute(
                "UPDATE messages SET state = 'unacked', delivery_count = delivery_count + 1
                 WHERE id = ?1",
                params![id],
            )?;
            Ok(Some((id, body, delivery_count + 1)))
        })?;

        Ok(claimed.map(|(id, body, delivery_count)| Delivery {
            id,
            body,
            delivery_count,
            queue: queue.to_string(),
            broker: self.clone(),
        }))
    }

    fn ack(&self, delivery_id: i64) -> Result<(), BrokerError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM messages WHERE id = ?1", params![delivery_id])?;
            Ok(())
        })
    }

    fn nack(&self, delivery_id: i64, queue: &str, requeue: bool) -> Result<(), BrokerError> {
        if requeue {
            self.with_conn(|conn| {
                conn.execute(
                    "UPDATE messages SET state = 'ready' WHERE id = ?1",
                    params![delivery_id],
                )?;
                Ok(())
            })?;
            self.waker(queue).notify_one();
            return Ok(());
        }

        match self.dead_letter_of(queue)? {
            Some(dlq) => {
                self.with_conn(|conn| {
                    conn.execute(
                        "UPDATE messages SET queue = ?2, state = 'ready' WHERE id = ?1",
                        params![delivery_id, dlq],
                    )?;
                    Ok(())
                })?;
                log::info!("Message {} dead-lettered from '{}' to '{}'", delivery_id, queue, dlq);
                self.waker(&dlq).notify_one();
            }
            None => {
                self.ack(delivery_id)?;
                log::warn!("Message {} rejected on '{}' with no DLQ bound; dropped", delivery_id, queue);
            }
        }
        Ok(())
    }
}

/// Single-queue consumer. One claimed message at a time.
pub struct Consumer {
    broker: Broker,
    queue: String,
}

impl Consumer {
    /// Waits up to `timeout` for the next message. Returns `None` when
    /// the queue stayed empty, so callers can check their shutdown flag
    /// between waits.
    pub async fn recv_timeout(&self, timeout: Duration) -> Result<Option<Delivery>, BrokerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let waker = self.broker.waker(&self.queue);
        loop {
            if let Some(delivery) = self.broker.try_claim(&self.queue)? {
                return Ok(Some(delivery));
            }
            let notified = waker.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}

/// One claimed message. Must be resolved with `ack` or `nack`; an
/// unresolved delivery is redelivered after the store reopens.
pub struct Delivery {
    id: i64,
    pub body: Vec<u8>,
    /// How many times this message has been delivered, this one included.
    pub delivery_count: i64,
    queue: String,
    broker: Broker,
}

impl Delivery {
    /// Removes the message permanently.
    pub fn ack(self) -> Result<(), BrokerError> {
        self.broker.ack(self.id)
    }

    /// Rejects the message. With `requeue` it becomes ready for
    /// redelivery; without, it routes to the queue's dead-letter target
    /// (or is dropped when none is bound).
    pub fn nack(self, requeue: bool) -> Result<(), BrokerError> {
        self.broker.nack(self.id, &self.queue, requeue)
    }
}
