use crate::runner::CommandRunner;
use chrono::{DateTime, Utc};
use jobq_core::{backoff_delay, timestamp_now, Job, JobId, JobState};
use jobq_persistence::{JobField, JobStore, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// State a job was left in after one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    /// Back to `pending`; `delay` is the advisory backoff that was logged
    Retrying { attempts: u32, delay: Duration },
    /// Moved to the dead letter queue
    Dead { attempts: u32 },
}

/// Result of a finished command that still has to be written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub job_id: JobId,
    /// State the job moves to
    pub state: JobState,
    pub attempts: u32,
    pub max_retries: u32,
    pub finished_at: DateTime<Utc>,
}

/// Runs claimed jobs and records how they ended.
pub struct JobExecutor {
    runner: Arc<dyn CommandRunner>,
    backoff_base: u32,
}

impl JobExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>, backoff_base: u32) -> Self {
        JobExecutor {
            runner,
            backoff_base,
        }
    }

    /// Run a job that is in `processing` and persist its next state.
    ///
    /// Command failures are not errors; they drive the retry / dead-letter
    /// transition. Only store failures are returned as `Err`.
    pub async fn execute(&self, store: &JobStore, job: &Job) -> Result<ExecutionOutcome> {
        let result = self.run(job).await?;
        self.record(store, &result).await
    }

    /// Run the command and work out the job's next state without writing it.
    pub async fn run(&self, job: &Job) -> Result<JobResult> {
        // Only claimed jobs may run.
        job.state.transition(JobState::Completed)?;

        info!("Processing job {}: {}", job.id, job.command);

        let (state, attempts) = match self.runner.run(&job.command).await {
            Ok(()) => (job.state.transition(JobState::Completed)?, job.attempts),
            Err(reason) => {
                warn!("Job {} failed: {}", job.id, reason);
                let (attempts, next) = job.failure_outcome();
                (job.state.transition(next)?, attempts)
            }
        };

        Ok(JobResult {
            job_id: job.id.clone(),
            state,
            attempts,
            max_retries: job.max_retries,
            finished_at: timestamp_now(),
        })
    }

    /// Write a finished job's state. Safe to call again after `StoreLocked`.
    pub async fn record(&self, store: &JobStore, result: &JobResult) -> Result<ExecutionOutcome> {
        let mut fields = vec![JobField::State(result.state)];
        if result.state != JobState::Completed {
            fields.push(JobField::Attempts(result.attempts));
        }
        store
            .update_fields(&result.job_id, &fields, result.finished_at)
            .await?;

        let outcome = match result.state {
            JobState::Completed => {
                info!("Job {} completed successfully", result.job_id);
                ExecutionOutcome::Completed
            }
            JobState::Dead => {
                warn!(
                    "Job {} moved to dead letter queue after {} attempts",
                    result.job_id, result.attempts
                );
                ExecutionOutcome::Dead {
                    attempts: result.attempts,
                }
            }
            _ => {
                let delay = backoff_delay(self.backoff_base, result.attempts);
                info!(
                    "Job {} will retry in {} seconds (attempt {}/{})",
                    result.job_id,
                    delay.as_secs(),
                    result.attempts,
                    result.max_retries
                );
                ExecutionOutcome::Retrying {
                    attempts: result.attempts,
                    delay,
                }
            }
        };
        Ok(outcome)
    }
}
