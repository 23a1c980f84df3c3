pub mod claim;
pub mod config;
pub mod executor;
pub mod runner;
pub mod worker;

pub use claim::claim_next;
pub use config::WorkerConfig;
pub use executor::{ExecutionOutcome, JobExecutor, JobResult};
pub use runner::{CommandRunner, RunResult, ShellRunner};
pub use worker::{run_workers, Iteration, Worker};
