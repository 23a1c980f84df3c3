use anyhow::{bail, Context};
use jobq_core::{Job, JobRequest, JobState, QueueConfig};
use jobq_persistence::{JobStore, PersistenceError, StoreConfig};
use std::path::Path;
use tracing::info;

pub fn open_store(config: &QueueConfig) -> anyhow::Result<JobStore> {
    let store_config = StoreConfig::from(config);
    JobStore::open(store_config)
        .with_context(|| format!("failed to open job store at {}", config.database_path.display()))
}

/// Parse a JSON job description and insert it as a pending job.
pub async fn enqueue(store: &JobStore, config: &QueueConfig, raw: &str) -> anyhow::Result<Job> {
    let request = JobRequest::from_json(raw).context("invalid job JSON")?;
    let job = request.into_job(config.max_retries)?;

    match store.insert(&job).await {
        Ok(()) => {
            info!("Enqueued job {}", job.id);
            Ok(job)
        }
        Err(PersistenceError::DuplicateId(id)) => bail!("Job already exists: {}", id),
        Err(e) => Err(e.into()),
    }
}

pub fn list(store: &JobStore, state: Option<&str>) -> anyhow::Result<Vec<Job>> {
    let state = state.map(str::parse::<JobState>).transpose()?;
    Ok(store.list_by_state(state)?)
}

/// Move a dead job back to `pending` with a fresh attempt budget.
pub async fn retry_dead(store: &JobStore, id: &str) -> anyhow::Result<Job> {
    match store.requeue_dead(id).await {
        Ok(job) => Ok(job),
        Err(PersistenceError::NotFound(id)) => bail!("Job not found in DLQ: {}", id),
        Err(e @ PersistenceError::NotDead { .. }) => bail!("{}", e),
        Err(e) => Err(e.into()),
    }
}

/// Update one key and persist the config file.
pub fn config_set(path: &Path, key: &str, value: &str) -> anyhow::Result<QueueConfig> {
    let mut config = QueueConfig::load_or_init(path)?;
    config.set(key, value)?;
    config
        .save(path)
        .with_context(|| format!("failed to write config to {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir) -> QueueConfig {
        QueueConfig {
            database_path: temp_dir.path().join("queue.db"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_enqueue_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.max_retries = 5;
        let store = open_store(&config).unwrap();

        let job = enqueue(&store, &config, r#"{"id":"j1","command":"echo hi"}"#)
            .await
            .unwrap();

        assert_eq!(job.max_retries, 5);
        assert_eq!(job.priority.value(), 1);
        assert_eq!(store.get("j1").unwrap().unwrap(), job);
    }

    #[tokio::test]
    async fn test_enqueue_duplicate_id() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);
        let store = open_store(&config).unwrap();

        let raw = r#"{"id":"dup","command":"true"}"#;
        enqueue(&store, &config, raw).await.unwrap();
        let err = enqueue(&store, &config, raw).await.unwrap_err();

        assert!(err.to_string().contains("Job already exists"));
        assert_eq!(store.list_by_state(None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_bad_input() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);
        let store = open_store(&config).unwrap();

        assert!(enqueue(&store, &config, "not json").await.is_err());
        assert!(enqueue(&store, &config, r#"{"id":"x"}"#).await.is_err());
        assert!(store.list_by_state(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_filters_by_state() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);
        let store = open_store(&config).unwrap();

        enqueue(&store, &config, r#"{"id":"a","command":"true"}"#)
            .await
            .unwrap();

        assert_eq!(list(&store, Some("pending")).unwrap().len(), 1);
        assert!(list(&store, Some("dead")).unwrap().is_empty());
        assert!(list(&store, Some("bogus")).is_err());
    }

    #[tokio::test]
    async fn test_retry_dead_errors() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);
        let store = open_store(&config).unwrap();

        let err = retry_dead(&store, "missing").await.unwrap_err();
        assert!(err.to_string().contains("not found"));

        enqueue(&store, &config, r#"{"id":"p","command":"true"}"#)
            .await
            .unwrap();
        let err = retry_dead(&store, "p").await.unwrap_err();
        assert!(err.to_string().contains("not dead"));
    }

    #[test]
    fn test_config_set_persists() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");

        config_set(&path, "max_retries", "7").unwrap();
        assert_eq!(QueueConfig::from_file(&path).unwrap().max_retries, 7);

        assert!(config_set(&path, "max_retries", "0").is_err());
        assert!(config_set(&path, "nope", "1").is_err());
        assert_eq!(QueueConfig::from_file(&path).unwrap().max_retries, 7);
    }
}
