mod backoff;
mod config;
mod error;
mod job;
mod priority;

pub use backoff::backoff_delay;
pub use config::QueueConfig;
pub use error::{JobError, Result};
pub use job::{
    format_timestamp, parse_timestamp, timestamp_now, Job, JobBuilder, JobId, JobRequest,
    JobState,
};
pub use priority::Priority;

/// Attempt ceiling for jobs enqueued without an explicit `max_retries`.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
