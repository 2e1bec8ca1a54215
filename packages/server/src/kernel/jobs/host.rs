//! Hosts one [`JobWorker`] per bound queue plus a retention maintenance loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::queue::JobQueue;
use super::worker::{JobHandler, JobWorker, JobWorkerConfig};

pub struct WorkerHost {
    queue: Arc<dyn JobQueue>,
    workers: Vec<JobWorkerConfig>,
    handlers: Vec<Arc<dyn JobHandler>>,
    shutdown_grace: Duration,
    maintenance_interval: Duration,
}

impl WorkerHost {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self {
            queue,
            workers: Vec::new(),
            handlers: Vec::new(),
            shutdown_grace: Duration::from_secs(30),
            maintenance_interval: Duration::from_secs(600),
        }
    }

    /// Bind `handler` to `queue_name` with `concurrency` parallel jobs.
    pub fn bind(
        mut self,
        queue_name: &str,
        handler: Arc<dyn JobHandler>,
        concurrency: usize,
    ) -> Self {
        self.workers
            .push(JobWorkerConfig::new(queue_name).with_concurrency(concurrency));
        self.handlers.push(handler);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub fn queues(&self) -> Vec<&str> {
        self.workers.iter().map(|w| w.queue.as_str()).collect()
    }

    /// Run every worker until `shutdown` is cancelled.
    ///
    /// Returns once all workers have drained, so the caller can close the
    /// database pool afterwards.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let queues: Vec<String> = self.workers.iter().map(|w| w.queue.clone()).collect();
        info!(queues = ?queues, "worker host starting");

        let mut workers = JoinSet::new();
        for (config, handler) in self.workers.into_iter().zip(self.handlers) {
            let config = config.with_shutdown_grace(self.shutdown_grace);
            let worker = JobWorker::new(self.queue.clone(), handler, config);
            workers.spawn(worker.run(shutdown.clone()));
        }

        let maintenance = tokio::spawn(run_maintenance(
            self.queue.clone(),
            queues,
            self.maintenance_interval,
            shutdown.clone(),
        ));

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "job worker exited with error"),
                Err(e) => error!(error = %e, "job worker task failed"),
            }
        }

        shutdown.cancel();
        if let Err(e) = maintenance.await {
            warn!(error = %e, "maintenance task failed");
        }

        info!("worker host stopped");
        Ok(())
    }
}

/// Prune every queue per its retention policy on `interval`.
async fn run_maintenance(
    queue: Arc<dyn JobQueue>,
    queues: Vec<String>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                for name in &queues {
                    let retention = queue.policy(name).retention;
                    match queue.prune(name, &retention).await {
                        Ok(report) => info!(queue = %name, ?report, "pruned retained jobs"),
                        Err(e) => warn!(queue = %name, error = %e, "prune failed"),
                    }
                }
            }
        }
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("received shutdown signal");
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::kernel::jobs::{
        ClaimedJob, EnqueueOptions, InMemoryJobQueue, JobFailure, JobStatus, QueuePolicy,
    };

    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        async fn handle(&self, _job: &ClaimedJob) -> Result<(), JobFailure> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_bound_queues_and_stops_on_cancel() {
        let queue = Arc::new(InMemoryJobQueue::new());
        for name in ["a", "b"] {
            queue
                .enqueue(name, serde_json::json!({}), EnqueueOptions::default())
                .await
                .unwrap();
        }

        let host = WorkerHost::new(queue.clone())
            .bind("a", Arc::new(Noop), 1)
            .bind("b", Arc::new(Noop), 2);
        assert_eq!(host.queues(), vec!["a", "b"]);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(host.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(queue.count("a", JobStatus::Succeeded), 1);
        assert_eq!(queue.count("b", JobStatus::Succeeded), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_prunes_on_its_interval() {
        let mut policy = QueuePolicy::default();
        policy.retention.completed.max_count = Some(0);
        let queue = Arc::new(InMemoryJobQueue::new().with_policy("a", policy));
        queue
            .enqueue("a", serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap();

        let host = WorkerHost::new(queue.clone())
            .bind("a", Arc::new(Noop), 1)
            .with_maintenance_interval(Duration::from_secs(60));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(host.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(queue.count("a", JobStatus::Succeeded), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(queue.len("a"), 0);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }
}
