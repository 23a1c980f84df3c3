use crate::{
    claim::claim_next,
    config::WorkerConfig,
    executor::{ExecutionOutcome, JobExecutor, JobResult},
    runner::CommandRunner,
};
use jobq_core::JobId;
use jobq_persistence::{JobStore, PersistenceError, Result};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What a single pass of the worker loop did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Iteration {
    /// No pending job was found
    Idle,
    /// A job was claimed and run to completion
    Executed {
        job_id: JobId,
        outcome: ExecutionOutcome,
    },
    /// A result left over from a contended pass was written
    Recorded {
        job_id: JobId,
        outcome: ExecutionOutcome,
    },
    /// The store stayed locked; no new job was claimed this pass
    Contended,
}

/// One polling loop with its own store connection
pub struct Worker {
    config: WorkerConfig,
    worker_id: String,
    store: JobStore,
    executor: JobExecutor,
    /// Finished job whose result could not be written yet
    unsaved: Option<JobResult>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        worker_id: String,
        store: JobStore,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let executor = JobExecutor::new(runner, config.backoff_base);
        Worker {
            config,
            worker_id,
            store,
            executor,
            unsaved: None,
        }
    }

    /// Open a dedicated store connection for the `index`-th worker.
    pub fn open(
        config: WorkerConfig,
        index: usize,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        let store = JobStore::open(config.store.clone())?;
        let worker_id = config.generate_worker_id(index);
        Ok(Worker::new(config, worker_id, store, runner))
    }

    pub fn id(&self) -> &str {
        &self.worker_id
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Id of a finished job whose result is still waiting to be written.
    pub fn unsaved_job(&self) -> Option<&str> {
        self.unsaved.as_ref().map(|result| result.job_id.as_str())
    }

    /// Write a result left over from an earlier pass, otherwise claim one
    /// pending job and run it.
    pub async fn run_once(&mut self) -> Result<Iteration> {
        if let Some(result) = self.unsaved.take() {
            return self.record(result, true).await;
        }

        let job = match claim_next(&self.store).await {
            Ok(Some(job)) => job,
            Ok(None) => return Ok(Iteration::Idle),
            Err(PersistenceError::StoreLocked { attempts }) => {
                warn!(
                    "Worker {} could not claim: store locked after {} attempts",
                    self.worker_id, attempts
                );
                return Ok(Iteration::Contended);
            }
            Err(e) => return Err(e),
        };

        info!("Worker {} claimed job {}", self.worker_id, job.id);

        let result = self.executor.run(&job).await?;
        self.record(result, false).await
    }

    async fn record(&mut self, result: JobResult, leftover: bool) -> Result<Iteration> {
        match self.executor.record(&self.store, &result).await {
            Ok(outcome) => {
                let job_id = result.job_id;
                Ok(if leftover {
                    Iteration::Recorded { job_id, outcome }
                } else {
                    Iteration::Executed { job_id, outcome }
                })
            }
            Err(PersistenceError::StoreLocked { attempts }) => {
                warn!(
                    "Worker {} could not record the result of job {} (store locked after {} attempts); will retry before the next claim",
                    self.worker_id, result.job_id, attempts
                );
                self.unsaved = Some(result);
                Ok(Iteration::Contended)
            }
            Err(e) => Err(e),
        }
    }

    /// Poll until `shutdown` fires.
    ///
    /// Cancellation is observed before each claim and during the idle wait;
    /// a job that is already running is always finished first. The store
    /// connection is closed on exit, including after a fatal store error.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        info!(
            "Worker {} started (poll interval {:?})",
            self.worker_id, self.config.poll_interval
        );

        let mut failure = None;
        while !shutdown.is_cancelled() {
            match self.run_once().await {
                Ok(Iteration::Idle) => {
                    debug!("Worker {}: no pending jobs, polling again", self.worker_id);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Worker {} hit a fatal store error: {}", self.worker_id, e);
                    failure = Some(e);
                    break;
                }
            }
        }

        if failure.is_none() {
            if let Some(result) = self.unsaved.take() {
                if let Err(e) = self.record(result, true).await {
                    failure = Some(e);
                }
            }
            if let Some(job_id) = self.unsaved_job() {
                error!(
                    "Worker {} stopping with the result of job {} unwritten; job left in processing",
                    self.worker_id, job_id
                );
            }
        }

        let worker_id = self.worker_id;
        if let Err(e) = self.store.close() {
            warn!("Worker {} failed to close its store: {}", worker_id, e);
        }

        match failure {
            Some(e) => Err(e),
            None => {
                info!("Worker {} stopped gracefully", worker_id);
                Ok(())
            }
        }
    }
}

/// Start `config.count` workers, each with its own connection, and wait for
/// all of them to stop.
pub async fn run_workers(
    config: WorkerConfig,
    runner: Arc<dyn CommandRunner>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut workers = JoinSet::new();

    for index in 1..=config.count.max(1) {
        let worker = Worker::open(config.clone(), index, runner.clone())?;
        info!("Launching worker {}", worker.id());
        workers.spawn(worker.run(shutdown.clone()));
    }

    let mut failed = 0usize;
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Worker exited with error: {}", e);
                failed += 1;
            }
            Err(e) => {
                error!("Worker task panicked: {}", e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} worker(s) exited with errors", failed);
    }
    Ok(())
}
