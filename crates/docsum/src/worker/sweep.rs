//! Reconciliation sweep for stuck pending jobs.
//!
//! Push-based consumption is the primary dispatch mechanism; this
//! timer sweep only republishes jobs whose dispatch message was lost
//! (publish failure at creation, manual retry during a broker outage).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::broker::{Broker, JobMessage, JOB_QUEUE};
use crate::db::{job_repo, Database};
use crate::error::Result;

const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

pub struct PendingSweep {
    db: Database,
    broker: Broker,
    interval: Duration,
    stale_after: Duration,
}

impl PendingSweep {
    pub fn new(db: Database, broker: Broker, interval: Duration, stale_after: Duration) -> Self {
        Self {
            db,
            broker,
            interval,
            stale_after,
        }
    }

    pub async fn run(&self, shutdown: Arc<AtomicBool>) {
        log::info!(
            "Reconciliation sweep started (interval {:?}, stale after {:?})",
            self.interval,
            self.stale_after
        );

        loop {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }

            match self.sweep_once() {
                Ok(0) => {}
                Ok(republished) => {
                    log::info!("Sweep republished {} stuck pending jobs", republished)
                }
                Err(e) => log::error!("Sweep failed: {}", e),
            }

            let mut slept = Duration::ZERO;
            while slept < self.interval {
                if shutdown.load(Ordering::Relaxed) {
                    log::info!("Reconciliation sweep stopped");
                    return;
                }
                tokio::time::sleep(SHUTDOWN_POLL).await;
                slept += SHUTDOWN_POLL;
            }
        }

        log::info!("Reconciliation sweep stopped");
    }

    /// Republishes every pending job untouched for longer than the
    /// staleness threshold. Returns how many were republished.
    pub fn sweep_once(&self) -> Result<usize> {
        let cutoff = (chrono::Utc::now()
            - chrono::Duration::seconds(self.stale_after.as_secs() as i64))
        .to_rfc3339();

        let ids = job_repo::stale_pending(&self.db, &cutoff)?;
        let mut republished = 0;
        for job_id in ids {
            match self.broker.publish_json(JOB_QUEUE, &JobMessage { job_id }) {
                Ok(()) => {
                    // Touch so the next tick does not republish it again.
                    job_repo::touch(&self.db, job_id)?;
                    republished += 1;
                }
                Err(e) => {
                    log::warn!("Sweep failed to republish job {}: {}", job_id, e);
                }
            }
        }
        Ok(republished)
    }
}
