use jobq_core::QueueConfig;
use jobq_persistence::StoreConfig;
use std::time::Duration;

/// Settings fixed for the lifetime of a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Prefix for worker ids; derived from host and pid when absent
    pub worker_id: Option<String>,
    /// Number of worker loops to run
    pub count: usize,
    pub poll_interval: Duration,
    pub backoff_base: u32,
    pub store: StoreConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig::from_queue_config(&QueueConfig::default())
    }
}

impl WorkerConfig {
    pub fn from_queue_config(config: &QueueConfig) -> Self {
        WorkerConfig {
            worker_id: None,
            count: 1,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            backoff_base: config.backoff_base,
            store: StoreConfig::from(config),
        }
    }

    /// Id for the `index`-th worker loop (1-based).
    pub fn generate_worker_id(&self, index: usize) -> String {
        let prefix = match &self.worker_id {
            Some(id) => id.clone(),
            None => {
                let hostname = hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| "unknown".to_string());
                format!("{}-{}", hostname, std::process::id())
            }
        };

        if self.count > 1 || self.worker_id.is_none() {
            format!("{}-{}", prefix, index)
        } else {
            prefix
        }
    }
}
