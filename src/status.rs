use crate::config::DatabaseConfig;
use crate::error::JobError;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Lifecycle state of a batch job.
///
/// `Queued` is a queue-level state meaning "not yet picked up by any
/// worker"; the orchestrator itself only ever publishes the other four.
/// `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Queued,
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "QUEUED",
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(JobState::Queued),
            "PENDING" => Some(JobState::Pending),
            "RUNNING" => Some(JobState::Running),
            "COMPLETED" => Some(JobState::Completed),
            "FAILED" => Some(JobState::Failed),
            _ => None,
        }
    }

    /// No further transitions occur after a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Final outcome of a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Total number of frame artifacts produced.
    pub frame_count: usize,
    /// Every produced frame key, in processing order.
    pub frames: Vec<String>,
}

/// The externally-polled status record for one job.
///
/// Consumers repeatedly fetch the latest record for a job id; they never
/// receive pushes. `result` is populated only on `COMPLETED` and `error`
/// only on `FAILED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: Uuid,
    pub state: JobState,
    /// 0-100, monotonically non-decreasing within a run.
    pub progress: u8,
    /// Human-readable message for the current state.
    pub status: String,
    /// Cumulative frame artifacts published so far.
    pub frames: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatus {
    fn base(job_id: Uuid, state: JobState, progress: u8, status: String) -> Self {
        Self {
            job_id,
            state,
            progress,
            status,
            frames: Vec::new(),
            result: None,
            error: None,
            updated_at: Utc::now(),
        }
    }

    /// Record answered for a job id no worker has picked up yet.
    pub fn queued(job_id: Uuid) -> Self {
        Self::base(job_id, JobState::Queued, 0, "Job not yet started".to_string())
    }

    /// Published once on job start, before any work begins.
    pub fn pending(job_id: Uuid) -> Self {
        Self::base(job_id, JobState::Pending, 0, "Initializing...".to_string())
    }

    /// Published after every processed video and for intermediate
    /// extraction progress.
    pub fn running(job_id: Uuid, progress: u8, status: String, frames: Vec<String>) -> Self {
        let mut record = Self::base(job_id, JobState::Running, progress, status);
        record.frames = frames;
        record
    }

    /// Terminal success, reached after the last video regardless of
    /// individual video outcomes.
    pub fn completed(job_id: Uuid, result: JobResult) -> Self {
        let status = format!("Completed: {} frames extracted", result.frame_count);
        let mut record = Self::base(job_id, JobState::Completed, 100, status);
        record.frames = result.frames.clone();
        record.result = Some(result);
        record
    }

    /// Terminal failure from a structural error.
    pub fn failed(job_id: Uuid, error: &JobError) -> Self {
        let message = error.to_string();
        let mut record = Self::base(job_id, JobState::Failed, 0, message.clone());
        record.error = Some(message);
        record
    }
}

/// Persisted, poll-style status store.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Publish the latest record for a job, replacing any previous one.
    async fn publish(&self, status: &JobStatus) -> Result<()>;

    /// Fetch the latest record, or `None` if the job was never published.
    /// Callers translate `None` into [`JobStatus::queued`].
    async fn fetch(&self, job_id: Uuid) -> Result<Option<JobStatus>>;
}

/// PostgreSQL-backed status store.
pub struct PgStatusStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct JobStatusRow {
    job_id: Uuid,
    state: String,
    progress: i32,
    status: String,
    frames: serde_json::Value,
    result: Option<serde_json::Value>,
    error: Option<String>,
    updated_at: DateTime<Utc>,
}

impl JobStatusRow {
    fn into_status(self) -> Result<JobStatus> {
        let state = JobState::parse(&self.state)
            .ok_or_else(|| anyhow!("Unknown job state '{}' in status record", self.state))?;
        let frames: Vec<String> =
            serde_json::from_value(self.frames).context("Invalid frames column")?;
        let result: Option<JobResult> = self
            .result
            .map(serde_json::from_value)
            .transpose()
            .context("Invalid result column")?;

        Ok(JobStatus {
            job_id: self.job_id,
            state,
            progress: self.progress.clamp(0, 100) as u8,
            status: self.status,
            frames,
            result,
            error: self.error,
            updated_at: self.updated_at,
        })
    }
}

impl PgStatusStore {
    /// Connect a status store with a connection pool.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL status store");

        Ok(Self { pool })
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool (for health checks).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StatusStore for PgStatusStore {
    #[instrument(skip(self, status), fields(job_id = %status.job_id, state = status.state.as_str()))]
    async fn publish(&self, status: &JobStatus) -> Result<()> {
        let frames = serde_json::to_value(&status.frames)?;
        let result = status.result.as_ref().map(serde_json::to_value).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO job_status (
                job_id, state, progress, status, frames, result, error, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, NOW()
            )
            ON CONFLICT (job_id) DO UPDATE SET
                state = EXCLUDED.state,
                progress = EXCLUDED.progress,
                status = EXCLUDED.status,
                frames = EXCLUDED.frames,
                result = EXCLUDED.result,
                error = EXCLUDED.error,
                updated_at = NOW()
            "#,
        )
        .bind(status.job_id)
        .bind(status.state.as_str())
        .bind(status.progress as i32)
        .bind(&status.status)
        .bind(&frames)
        .bind(&result)
        .bind(&status.error)
        .execute(&self.pool)
        .await
        .context("Failed to publish job status")?;

        debug!(progress = status.progress, "Job status published");
        Ok(())
    }

    async fn fetch(&self, job_id: Uuid) -> Result<Option<JobStatus>> {
        let row = sqlx::query_as::<_, JobStatusRow>(
            r#"
            SELECT job_id, state, progress, status, frames, result, error, updated_at
            FROM job_status
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch job status")?;

        row.map(JobStatusRow::into_status).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_string(&JobState::Completed).unwrap(),
            "\"COMPLETED\""
        );
        assert_eq!(
            serde_json::to_string(&JobState::Running).unwrap(),
            "\"RUNNING\""
        );
    }

    #[test]
    fn test_state_parse_round_trips() {
        for state in [
            JobState::Queued,
            JobState::Pending,
            JobState::Running,
            JobState::Completed,
            JobState::Failed,
        ] {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
        }
        assert_eq!(JobState::parse("PROGRESS"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(!JobState::Queued.is_terminal());
    }

    #[test]
    fn test_queued_record() {
        let id = Uuid::new_v4();
        let record = JobStatus::queued(id);
        assert_eq!(record.state, JobState::Queued);
        assert_eq!(record.progress, 0);
        assert_eq!(record.status, "Job not yet started");
        assert!(record.result.is_none());
        assert!(record.error.is_none());
    }

    #[test]
    fn test_completed_record_carries_result() {
        let id = Uuid::new_v4();
        let result = JobResult {
            frame_count: 2,
            frames: vec!["a.jpg".to_string(), "b.jpg".to_string()],
        };
        let record = JobStatus::completed(id, result);

        assert_eq!(record.state, JobState::Completed);
        assert_eq!(record.progress, 100);
        assert_eq!(record.frames.len(), 2);
        assert_eq!(record.result.as_ref().unwrap().frame_count, 2);
        assert!(record.error.is_none());
    }

    #[test]
    fn test_failed_record_carries_error() {
        let id = Uuid::new_v4();
        let record = JobStatus::failed(id, &JobError::EmptyBatch);

        assert_eq!(record.state, JobState::Failed);
        assert_eq!(
            record.error.as_deref(),
            Some("No videos found in the specified folder.")
        );
        assert!(record.result.is_none());
    }

    #[test]
    fn test_status_serialization_omits_absent_fields() {
        let record = JobStatus::pending(Uuid::new_v4());
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["state"], "PENDING");
        assert_eq!(json["progress"], 0);
        assert!(json.get("result").is_none());
        assert!(json.get("error").is_none());
    }
}
