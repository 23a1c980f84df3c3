//! Claim protocol.
//!
//! Selection and reservation happen in one exclusive scope, so a pending job
//! is handed to at most one worker no matter how many poll the same store.

use jobq_core::{timestamp_now, Job, JobState};
use jobq_persistence::{JobField, JobStore, Result};
use tracing::debug;

/// Reserve the highest-priority, oldest pending job.
///
/// Returns `None` when nothing is pending. The returned job reflects the
/// claimed row: `state` is `processing`, `attempts` and `max_retries` are as
/// read inside the scope.
pub async fn claim_next(store: &JobStore) -> Result<Option<Job>> {
    let claimed = store
        .run_exclusive(|scope| {
            let Some(job) = scope.select_top_candidate()? else {
                return Ok(None);
            };

            let state = job.state.transition(JobState::Processing)?;
            let now = timestamp_now();
            scope.update_fields(&job.id, &[JobField::State(state)], now)?;

            Ok(Some(Job {
                state,
                updated_at: now,
                ..job
            }))
        })
        .await?;

    if let Some(job) = &claimed {
        debug!("Claimed job {} (attempts {}/{})", job.id, job.attempts, job.max_retries);
    }
    Ok(claimed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobq_persistence::StoreConfig;
    use tempfile::TempDir;

    fn open_store(temp_dir: &TempDir) -> JobStore {
        JobStore::open(StoreConfig {
            path: temp_dir.path().join("queue.db"),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_claim_empty_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        assert!(claim_next(&store).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_marks_processing() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let job = Job::builder("true").id("j").max_retries(4).build().unwrap();
        store.insert(&job).await.unwrap();

        let claimed = claim_next(&store).await.unwrap().unwrap();
        assert_eq!(claimed.id, "j");
        assert_eq!(claimed.state, JobState::Processing);
        assert_eq!(claimed.attempts, 0);
        assert_eq!(claimed.max_retries, 4);

        let stored = store.get("j").unwrap().unwrap();
        assert_eq!(stored.state, JobState::Processing);
        assert_eq!(stored.updated_at, claimed.updated_at);

        // Nothing left to claim.
        assert!(claim_next(&store).await.unwrap().is_none());
    }
}
