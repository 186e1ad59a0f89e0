use anyhow::Result;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::database::DatabaseManager;
use crate::documents::WorkerStats;
use crate::engine::ApprovalEngine;

/// Graceful shutdown: stop accepting document jobs, let the worker drain,
/// then close the pool.
pub struct ShutdownCoordinator {
    worker_timeout: Duration,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl ShutdownCoordinator {
    pub fn new(worker_timeout: Duration) -> Self {
        Self { worker_timeout }
    }

    /// Consumes the engine so its queue handle is dropped; the worker exits
    /// once the remaining jobs are processed. Returns the worker's counters,
    /// or `None` if it did not finish in time.
    pub async fn shutdown(
        &self,
        engine: ApprovalEngine,
        worker: Option<JoinHandle<WorkerStats>>,
        database: &DatabaseManager,
    ) -> Result<Option<WorkerStats>> {
        info!("Initiating graceful shutdown...");
        drop(engine);

        let stats = match worker {
            Some(handle) => drain_worker(handle, self.worker_timeout).await,
            None => None,
        };

        database.shutdown().await;
        info!("Graceful shutdown completed");
        Ok(stats)
    }
}

async fn drain_worker(handle: JoinHandle<WorkerStats>, limit: Duration) -> Option<WorkerStats> {
    info!("Waiting for document worker to drain...");
    let abort = handle.abort_handle();
    match timeout(limit, handle).await {
        Ok(Ok(stats)) => {
            info!(generated = stats.generated, failed = stats.failed, "Document worker drained");
            Some(stats)
        }
        Ok(Err(e)) => {
            warn!("Document worker ended abnormally: {}", e);
            None
        }
        Err(_) => {
            warn!("Timeout waiting for document worker; aborting remaining jobs");
            abort.abort();
            None
        }
    }
}
