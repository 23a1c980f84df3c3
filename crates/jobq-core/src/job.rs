use crate::{JobError, Priority, Result, DEFAULT_MAX_RETRIES};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a job. Opaque; producers may pick their own.
pub type JobId = String;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting to be claimed by a worker
    Pending,
    /// Claimed by a worker and executing
    Processing,
    /// Command exited successfully
    Completed,
    /// Retries exhausted; member of the dead letter queue
    Dead,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Dead => "dead",
        }
    }

    /// Whether `self -> next` is one of the legal lifecycle edges.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;

        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Pending)
                | (Processing, Dead)
                | (Dead, Pending)
        )
    }

    /// Validate the edge and return the target state.
    pub fn transition(self, next: JobState) -> Result<JobState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(JobError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "dead" => Ok(JobState::Dead),
            other => Err(JobError::UnknownState(other.to_string())),
        }
    }
}

/// Current time at the precision jobs are persisted with (milliseconds).
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// On-disk timestamp format: RFC 3339, UTC, millisecond precision, `Z` suffix.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| JobError::InvalidJob(format!("bad timestamp '{}': {}", raw, e)))
}

/// A unit of work: one shell command plus its retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,

    /// Shell command line executed by the worker
    pub command: String,

    pub state: JobState,

    /// Execution attempts made so far
    pub attempts: u32,

    /// Attempt ceiling; the job is dead-lettered once `attempts` reaches it
    pub max_retries: u32,

    pub priority: Priority,

    pub created_at: DateTime<Utc>,

    /// Set on every write to the job
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a pending job with a generated id and default priority.
    pub fn new(command: impl Into<String>) -> Result<Self> {
        Self::builder(command).build()
    }

    pub fn builder(command: impl Into<String>) -> JobBuilder {
        JobBuilder::new(command)
    }

    /// Attempt count and next state after one more failed execution.
    pub fn failure_outcome(&self) -> (u32, JobState) {
        let attempts = self.attempts.saturating_add(1);
        let next = if attempts >= self.max_retries {
            JobState::Dead
        } else {
            JobState::Pending
        };
        (attempts, next)
    }
}

/// Builder for jobs with producer-chosen fields
#[derive(Debug, Clone)]
pub struct JobBuilder {
    id: Option<JobId>,
    command: String,
    priority: Priority,
    max_retries: u32,
    created_at: Option<DateTime<Utc>>,
}

impl JobBuilder {
    pub fn new(command: impl Into<String>) -> Self {
        JobBuilder {
            id: None,
            command: command.into(),
            priority: Priority::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            created_at: None,
        }
    }

    pub fn id(mut self, id: impl Into<JobId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = Priority::new(priority);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at.trunc_subsecs(3));
        self
    }

    pub fn build(self) -> Result<Job> {
        if self.command.trim().is_empty() {
            return Err(JobError::InvalidJob("missing 'command' field".to_string()));
        }
        if self.max_retries == 0 {
            return Err(JobError::InvalidJob(
                "'max_retries' must be positive".to_string(),
            ));
        }
        if matches!(&self.id, Some(id) if id.is_empty()) {
            return Err(JobError::InvalidJob("'id' must not be empty".to_string()));
        }

        let now = self.created_at.unwrap_or_else(timestamp_now);
        Ok(Job {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            command: self.command,
            state: JobState::Pending,
            attempts: 0,
            max_retries: self.max_retries,
            priority: self.priority,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Enqueue request as submitted by a producer (JSON object).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobRequest {
    pub id: Option<JobId>,
    pub command: Option<String>,
    pub priority: Option<i64>,
    pub max_retries: Option<u32>,
}

impl JobRequest {
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Turn the request into a pending job, filling `max_retries` from config.
    pub fn into_job(self, default_max_retries: u32) -> Result<Job> {
        let command = self
            .command
            .ok_or_else(|| JobError::InvalidJob("missing 'command' field".to_string()))?;

        let mut builder = Job::builder(command)
            .max_retries(self.max_retries.unwrap_or(default_max_retries));
        if let Some(id) = self.id {
            builder = builder.id(id);
        }
        if let Some(priority) = self.priority {
            builder = builder.priority(priority);
        }
        builder.build()
    }
}
