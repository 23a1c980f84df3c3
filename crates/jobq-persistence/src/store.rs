//! SQLite job store.
//!
//! Every handle owns one connection. Writes go through a bounded busy-retry
//! loop because several worker processes share the database file; reads run
//! directly against the WAL snapshot.

use crate::{schema, PersistenceError, Result};
use chrono::{DateTime, Utc};
use jobq_core::{
    format_timestamp, parse_timestamp, timestamp_now, Job, JobState, Priority, QueueConfig,
};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for job store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// Attempts of a contended write before `StoreLocked`
    pub busy_retries: u32,
    pub busy_retry_delay: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: PathBuf::from("data/queue.db"),
            busy_retries: 5,
            busy_retry_delay: Duration::from_millis(100),
        }
    }
}

impl From<&QueueConfig> for StoreConfig {
    fn from(config: &QueueConfig) -> Self {
        StoreConfig {
            path: config.database_path.clone(),
            busy_retries: config.busy_retries,
            busy_retry_delay: Duration::from_millis(config.busy_retry_delay_ms),
        }
    }
}

/// A single-field write applied by [`JobStore::update_fields`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobField {
    State(JobState),
    Attempts(u32),
}

impl JobField {
    fn column(&self) -> &'static str {
        match self {
            JobField::State(_) => "state",
            JobField::Attempts(_) => "attempts",
        }
    }

    fn value(&self) -> Value {
        match self {
            JobField::State(state) => Value::Text(state.as_str().to_string()),
            JobField::Attempts(attempts) => Value::Integer(i64::from(*attempts)),
        }
    }
}

/// Largest timeout SQLite accepts (milliseconds in an `i32`).
const MAX_BUSY_TIMEOUT: Duration = Duration::from_millis(i32::MAX as u64);

fn setup_busy_timeout(config: &StoreConfig) -> Duration {
    config
        .busy_retry_delay
        .checked_mul(config.busy_retries.max(1))
        .map_or(MAX_BUSY_TIMEOUT, |timeout| timeout.min(MAX_BUSY_TIMEOUT))
}

const JOB_COLUMNS: &str =
    "id, command, state, attempts, max_retries, priority, created_at, updated_at";

/// Persistent job store backed by one SQLite connection
pub struct JobStore {
    conn: Mutex<Connection>,
    config: StoreConfig,
}

impl JobStore {
    /// Open or create the database, enabling WAL and creating the schema.
    pub fn open(config: StoreConfig) -> Result<Self> {
        if let Some(dir) = config.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let mut conn = Connection::open(&config.path)?;

        // Setup may race other processes opening the same file; wait it out.
        conn.busy_timeout(setup_busy_timeout(&config))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        schema::ensure_schema(&mut conn)?;

        // Contention from here on is handled by `retry_on_busy`.
        conn.busy_timeout(Duration::ZERO)?;

        info!("Opened job store at {:?} (journal_mode={})", config.path, mode);

        Ok(JobStore {
            conn: Mutex::new(conn),
            config,
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Insert a new job. Fails with `DuplicateId` without touching the existing row.
    pub async fn insert(&self, job: &Job) -> Result<()> {
        self.retry_on_busy(|conn| insert_row(conn, job)).await?;
        debug!("Inserted job {} (priority {})", job.id, job.priority);
        Ok(())
    }

    /// Get a job by ID
    pub fn get(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock();
        fetch_job(&conn, id)
    }

    /// Write exactly `fields` plus `updated_at` for `id`.
    pub async fn update_fields(
        &self,
        id: &str,
        fields: &[JobField],
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.retry_on_busy(|conn| write_fields(conn, id, fields, updated_at))
            .await
    }

    /// The pending job a claim would pick next, if any.
    pub fn select_top_candidate(&self) -> Result<Option<Job>> {
        let conn = self.conn.lock();
        fetch_top_candidate(&conn)
    }

    /// Run `f` inside one `BEGIN IMMEDIATE` transaction.
    ///
    /// The write lock is taken up front, so two scopes never interleave their
    /// reads and writes. If another connection holds the lock the whole scope
    /// is retried after `busy_retry_delay`, up to `busy_retries` times; `f`
    /// must therefore be safe to call again. Errors returned by `f` roll the
    /// transaction back and propagate unchanged.
    pub async fn run_exclusive<T, F>(&self, mut f: F) -> Result<T>
    where
        F: FnMut(&Exclusive<'_>) -> Result<T>,
    {
        self.retry_on_busy(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = f(&Exclusive { conn: &tx })?;
            tx.commit()?;
            Ok(value)
        })
        .await
    }

    /// Job counts for every state, zero-filled, in lifecycle order.
    pub fn aggregate_by_state(&self) -> Result<Vec<(JobState, u64)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM jobs GROUP BY state")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts: Vec<(JobState, u64)> =
            JobState::ALL.iter().map(|state| (*state, 0)).collect();
        for row in rows {
            let (raw_state, count) = row?;
            let state: JobState = raw_state
                .parse()
                .map_err(|_| PersistenceError::Corrupt(format!("unknown state '{}'", raw_state)))?;
            if let Some(entry) = counts.iter_mut().find(|(s, _)| *s == state) {
                entry.1 = u64::try_from(count).unwrap_or(0);
            }
        }
        Ok(counts)
    }

    /// Jobs in `state`, or all jobs, oldest first.
    pub fn list_by_state(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        let conn = self.conn.lock();
        let jobs = match state {
            Some(state) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM jobs WHERE state = ?1 ORDER BY created_at, rowid",
                    JOB_COLUMNS
                ))?;
                let rows = stmt.query_map([state.as_str()], read_row)?;
                collect_jobs(rows)?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM jobs ORDER BY created_at, rowid",
                    JOB_COLUMNS
                ))?;
                let rows = stmt.query_map([], read_row)?;
                collect_jobs(rows)?
            }
        };
        Ok(jobs)
    }

    /// Contents of the dead letter queue.
    pub fn list_dead(&self) -> Result<Vec<Job>> {
        self.list_by_state(Some(JobState::Dead))
    }

    /// Move a dead job back to `pending` with its attempts reset.
    pub async fn requeue_dead(&self, id: &str) -> Result<Job> {
        let job = self
            .run_exclusive(|scope| {
                let job = scope
                    .get(id)?
                    .ok_or_else(|| PersistenceError::NotFound(id.to_string()))?;
                if job.state != JobState::Dead {
                    return Err(PersistenceError::NotDead {
                        id: job.id,
                        state: job.state,
                    });
                }
                let state = job.state.transition(JobState::Pending)?;

                let now = timestamp_now();
                scope.update_fields(id, &[JobField::State(state), JobField::Attempts(0)], now)?;
                Ok(Job {
                    state,
                    attempts: 0,
                    updated_at: now,
                    ..job
                })
            })
            .await?;

        info!("Requeued dead job {}", job.id);
        Ok(job)
    }

    /// Close the underlying connection.
    pub fn close(self) -> Result<()> {
        self.conn
            .into_inner()
            .close()
            .map_err(|(_, err)| PersistenceError::from(err))
    }

    async fn retry_on_busy<T, F>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(&mut Connection) -> Result<T>,
    {
        let attempts = self.config.busy_retries.max(1);

        for attempt in 1..=attempts {
            let outcome = {
                let mut conn = self.conn.lock();
                op(&mut *conn)
            };

            match outcome {
                Err(err) if err.is_busy() => {
                    debug!("Store busy (attempt {}/{})", attempt, attempts);
                    if attempt < attempts {
                        tokio::time::sleep(self.config.busy_retry_delay).await;
                    }
                }
                other => return other,
            }
        }

        warn!("Store still locked after {} attempts", attempts);
        Err(PersistenceError::StoreLocked { attempts })
    }
}

/// Read/write access inside [`JobStore::run_exclusive`].
pub struct Exclusive<'a> {
    conn: &'a Connection,
}

impl Exclusive<'_> {
    pub fn get(&self, id: &str) -> Result<Option<Job>> {
        fetch_job(self.conn, id)
    }

    pub fn select_top_candidate(&self) -> Result<Option<Job>> {
        fetch_top_candidate(self.conn)
    }

    pub fn update_fields(
        &self,
        id: &str,
        fields: &[JobField],
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        write_fields(self.conn, id, fields, updated_at)
    }
}

fn insert_row(conn: &Connection, job: &Job) -> Result<()> {
    let inserted = conn.execute(
        "INSERT INTO jobs (id, command, state, attempts, max_retries, priority, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            job.id,
            job.command,
            job.state.as_str(),
            job.attempts,
            job.max_retries,
            job.priority.value(),
            format_timestamp(&job.created_at),
            format_timestamp(&job.updated_at),
        ],
    );

    match inserted {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == ErrorCode::ConstraintViolation
                && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            Err(PersistenceError::DuplicateId(job.id.clone()))
        }
        Err(err) => Err(err.into()),
    }
}

fn fetch_job(conn: &Connection, id: &str) -> Result<Option<Job>> {
    let raw = conn
        .query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
            [id],
            read_row,
        )
        .optional()?;
    raw.map(RawJob::into_job).transpose()
}

fn fetch_top_candidate(conn: &Connection) -> Result<Option<Job>> {
    let raw = conn
        .query_row(
            &format!(
                "SELECT {} FROM jobs WHERE state = 'pending'
                 ORDER BY priority DESC, created_at ASC, rowid ASC LIMIT 1",
                JOB_COLUMNS
            ),
            [],
            read_row,
        )
        .optional()?;
    raw.map(RawJob::into_job).transpose()
}

fn write_fields(
    conn: &Connection,
    id: &str,
    fields: &[JobField],
    updated_at: DateTime<Utc>,
) -> Result<()> {
    let mut assignments: Vec<String> = Vec::with_capacity(fields.len() + 1);
    let mut values: Vec<Value> = Vec::with_capacity(fields.len() + 2);

    for field in fields {
        values.push(field.value());
        assignments.push(format!("{} = ?{}", field.column(), values.len()));
    }
    values.push(Value::Text(format_timestamp(&updated_at)));
    assignments.push(format!("updated_at = ?{}", values.len()));
    values.push(Value::Text(id.to_string()));

    let sql = format!(
        "UPDATE jobs SET {} WHERE id = ?{}",
        assignments.join(", "),
        values.len()
    );
    let changed = conn.execute(&sql, rusqlite::params_from_iter(values))?;
    if changed == 0 {
        return Err(PersistenceError::NotFound(id.to_string()));
    }
    Ok(())
}

/// Column values as stored, before state and timestamp parsing.
struct RawJob {
    id: String,
    command: String,
    state: String,
    attempts: u32,
    max_retries: u32,
    priority: i64,
    created_at: String,
    updated_at: String,
}

impl RawJob {
    fn into_job(self) -> Result<Job> {
        let corrupt = |what: &str, err: jobq_core::JobError| {
            PersistenceError::Corrupt(format!("job {}: {}: {}", self.id, what, err))
        };

        let state = self.state.parse().map_err(|e| corrupt("state", e))?;
        let created_at = parse_timestamp(&self.created_at).map_err(|e| corrupt("created_at", e))?;
        let updated_at = parse_timestamp(&self.updated_at).map_err(|e| corrupt("updated_at", e))?;

        Ok(Job {
            id: self.id,
            command: self.command,
            state,
            attempts: self.attempts,
            max_retries: self.max_retries,
            priority: Priority::new(self.priority),
            created_at,
            updated_at,
        })
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawJob> {
    Ok(RawJob {
        id: row.get(0)?,
        command: row.get(1)?,
        state: row.get(2)?,
        attempts: row.get(3)?,
        max_retries: row.get(4)?,
        priority: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn collect_jobs(
    rows: impl Iterator<Item = rusqlite::Result<RawJob>>,
) -> Result<Vec<Job>> {
    let mut jobs = Vec::new();
    for row in rows {
        jobs.push(row?.into_job()?);
    }
    Ok(jobs)
}
