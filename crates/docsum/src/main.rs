//! Worker daemon: runs the job executor, the audit consumer and the
//! reconciliation sweep against a shared broker store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use docsum::engine::HttpEngine;
use docsum::storage::FsStore;
use docsum::worker::{AuditConsumer, JobExecutor, PendingSweep};
use docsum::{Broker, Config, Database};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Route `log` macros into the tracing subscriber.
    tracing_log::LogTracer::init()?;
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::from_env()?;
    tracing::info!(
        engine_url = %config.engine_url,
        db = %config.database_path.display(),
        "starting docsum worker"
    );

    let db = Database::open(&config.database_path)?;
    let broker = Broker::connect(&config.queue_path).await?;
    broker.declare_standard_queues()?;

    let engine = Arc::new(HttpEngine::new(&config.engine_url, config.engine_timeout())?);
    let store = Arc::new(FsStore::new(&config.document_root));

    let shutdown = Arc::new(AtomicBool::new(false));

    let executor = JobExecutor::new(db.clone(), broker.clone(), engine, store);
    let audit = AuditConsumer::new(db.clone(), broker.clone());
    let sweep = PendingSweep::new(
        db,
        broker,
        config.sweep_interval(),
        config.pending_stale_after(),
    );

    let executor_task = {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move { executor.run(shutdown).await })
    };
    let audit_task = {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move { audit.run(shutdown).await })
    };
    let sweep_task = {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move { sweep.run(shutdown).await })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    shutdown.store(true, Ordering::Relaxed);

    let _ = executor_task.await;
    let _ = audit_task.await;
    let _ = sweep_task.await;

    tracing::info!("docsum worker stopped");
    Ok(())
}
