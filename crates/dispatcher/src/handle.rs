//! ConsumerHandle - tasks spawned by one `start_consumers` call

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::metrics::{DispatchMetrics, DispatchSnapshot};

/// One running consume loop
pub(crate) struct WorkerTask {
    pub(crate) endpoint: String,
    pub(crate) index: usize,
    pub(crate) handle: JoinHandle<()>,
}

/// Handle to the error watcher and every worker of one start
///
/// Dropping the handle does not stop the tasks; call [`shutdown`](Self::shutdown)
/// or cancel the token passed to `start_consumers`.
pub struct ConsumerHandle {
    cancel: CancellationToken,
    watcher: JoinHandle<()>,
    workers: Vec<WorkerTask>,
    metrics: Arc<DispatchMetrics>,
}

impl ConsumerHandle {
    pub(crate) fn new(
        cancel: CancellationToken,
        watcher: JoinHandle<()>,
        workers: Vec<WorkerTask>,
        metrics: Arc<DispatchMetrics>,
    ) -> Self {
        Self {
            cancel,
            watcher,
            workers,
            metrics,
        }
    }

    /// Spawned tasks: one watcher plus Σ workers
    pub fn task_count(&self) -> usize {
        1 + self.workers.len()
    }

    /// Workers started for `endpoint`
    pub fn worker_count(&self, endpoint: &str) -> usize {
        self.workers
            .iter()
            .filter(|w| w.endpoint == endpoint)
            .count()
    }

    /// Shared counters
    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    /// Snapshot of the shared counters
    pub fn snapshot(&self) -> DispatchSnapshot {
        self.metrics.snapshot()
    }

    /// Cancel all workers, then wait for them and for the watcher
    #[instrument(name = "consumer_handle_shutdown", skip(self), fields(tasks = self.task_count()))]
    pub async fn shutdown(self) -> DispatchSnapshot {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for every worker to return on its own, then for the watcher
    pub async fn join(self) -> DispatchSnapshot {
        let mut endpoints: Vec<&str> = self.workers.iter().map(|w| w.endpoint.as_str()).collect();
        endpoints.dedup();
        let endpoints: Vec<String> = endpoints.into_iter().map(str::to_string).collect();

        for worker in self.workers {
            if let Err(e) = worker.handle.await {
                error!(
                    endpoint = %worker.endpoint,
                    worker = worker.index,
                    error = ?e,
                    "Worker task panicked"
                );
            }
        }
        for endpoint in &endpoints {
            observability::set_workers_running(endpoint, 0);
        }

        // every sender is gone once the workers have returned
        if let Err(e) = self.watcher.await {
            error!(error = ?e, "Error watcher task panicked");
        }

        let snapshot = self.metrics.snapshot();
        info!(
            handled = snapshot.handled,
            failed = snapshot.failed,
            panicked = snapshot.panicked,
            consume_errors = snapshot.consume_errors,
            "consumers stopped"
        );
        debug!("ConsumerHandle join complete");
        snapshot
    }
}
