//! Hand-off to the per-machine job queue.
//!
//! A job is an ordered list of steps addressed to one machine's agent. The agent side
//! claims `pending` rows, runs the steps, and reports `running` / `completed` / `failed`
//! with accumulated log text through [`record_progress`].

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel, Set};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::db::entities::{agent_job, prelude::*};
use crate::db::enums::JobStatus;

#[derive(Error, Debug)]
pub enum JobQueueError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    #[error("Failed to encode job steps: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Job {0} not found")]
    NotFound(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    Exec { command: String },
    WriteFile { path: String, content: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStep {
    #[serde(flatten)]
    pub action: StepAction,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub name: String,
    pub steps: Vec<JobStep>,
    pub stop_on_error: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    pub id: Uuid,
    pub vps_id: i32,
    pub status: JobStatus,
    pub log: String,
}

impl From<agent_job::Model> for JobState {
    fn from(job: agent_job::Model) -> Self {
        Self {
            id: job.id,
            vps_id: job.vps_id,
            status: job.status,
            log: job.log,
        }
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, vps_id: i32, job: &JobSpec) -> Result<Uuid, JobQueueError>;

    async fn status(&self, job_id: Uuid) -> Result<Option<JobState>, JobQueueError>;
}

#[derive(Clone)]
pub struct DbJobQueue {
    db: DatabaseConnection,
}

impl DbJobQueue {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl JobQueue for DbJobQueue {
    async fn enqueue(&self, vps_id: i32, job: &JobSpec) -> Result<Uuid, JobQueueError> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        agent_job::ActiveModel {
            id: Set(id),
            vps_id: Set(vps_id),
            name: Set(job.name.clone()),
            steps: Set(serde_json::to_value(&job.steps)?),
            stop_on_error: Set(job.stop_on_error),
            status: Set(JobStatus::Pending),
            log: Set(String::new()),
            created_at: Set(now),
            updated_at: Set(now),
            completed_at: Set(None),
        }
        .insert(&self.db)
        .await?;
        Ok(id)
    }

    async fn status(&self, job_id: Uuid) -> Result<Option<JobState>, JobQueueError> {
        Ok(AgentJob::find_by_id(job_id)
            .one(&self.db)
            .await?
            .map(JobState::from))
    }
}

/// Agent-side status report. Appends `log_chunk` to the job's log.
pub async fn record_progress(
    db: &DatabaseConnection,
    job_id: Uuid,
    status: JobStatus,
    log_chunk: &str,
) -> Result<JobState, JobQueueError> {
    let job = AgentJob::find_by_id(job_id)
        .one(db)
        .await?
        .ok_or(JobQueueError::NotFound(job_id))?;

    let mut log = job.log.clone();
    log.push_str(log_chunk);

    let now = Utc::now();
    let mut active = job.into_active_model();
    active.status = Set(status);
    active.log = Set(log);
    active.updated_at = Set(now);
    if status.is_terminal() {
        active.completed_at = Set(Some(now));
    }
    Ok(active.update(db).await?.into())
}
