//! Turns a machine's generated passthrough config into a job for its agent.
//!
//! Fleet propagation is fire-and-forget: one task per machine, each logging its own
//! failure. A failing machine never blocks or rolls back another.

use sea_orm::{DatabaseConnection, DbErr};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::services::{mark_config_applied, JobQueue, JobQueueError, JobSpec, JobState, JobStep, StepAction};
use crate::passthrough::{render_nginx, PassthroughConfig, PassthroughGenerator, PassthroughSettings};
use crate::rotation::pool::PoolRef;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Failed to generate passthrough config: {0}")]
    Generation(#[from] DbErr),
    #[error("Failed to enqueue deployment job: {0}")]
    Enqueue(#[from] JobQueueError),
    #[error("Job {0} disappeared from the queue")]
    JobVanished(Uuid),
    #[error("Job {job_id} did not finish within {waited:?}")]
    WaitTimedOut { job_id: Uuid, waited: Duration },
}

#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub passthrough: PassthroughSettings,
    pub config_path: String,
    pub reload_command: String,
    pub step_timeout: Duration,
    pub wait_cap: Duration,
    pub poll_interval: Duration,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            passthrough: PassthroughSettings::default(),
            config_path: "/etc/nginx/stream.d/nodenexus-passthrough.conf".to_string(),
            reload_command: "nginx -t && nginx -s reload".to_string(),
            step_timeout: Duration::from_secs(120),
            wait_cap: Duration::from_secs(60),
            poll_interval: POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub vps_id: i32,
    pub job_id: Uuid,
    /// The machine is in no pool and the job removes the config.
    pub removes_config: bool,
    pub pools: Vec<PoolRef>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResult {
    #[serde(flatten)]
    pub deployment: Deployment,
    /// Terminal job state when the caller waited for it.
    pub job: Option<JobState>,
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

pub struct DeploymentDispatcher {
    db: DatabaseConnection,
    generator: PassthroughGenerator,
    jobs: Arc<dyn JobQueue>,
    settings: DeploySettings,
}

impl DeploymentDispatcher {
    pub fn new(
        db: DatabaseConnection,
        generator: PassthroughGenerator,
        jobs: Arc<dyn JobQueue>,
        settings: DeploySettings,
    ) -> Self {
        Self {
            db,
            generator,
            jobs,
            settings,
        }
    }

    pub fn settings(&self) -> &DeploySettings {
        &self.settings
    }

    /// Write-then-reload, or remove-then-reload for an empty config. Stops on first error.
    pub fn build_job(&self, config: Option<&PassthroughConfig>) -> JobSpec {
        let timeout_seconds = self.settings.step_timeout.as_secs();
        let reload = JobStep {
            action: StepAction::Exec {
                command: self.settings.reload_command.clone(),
            },
            timeout_seconds,
        };

        match config {
            Some(config) => JobSpec {
                name: format!("passthrough-config:apply:vps-{}", config.vps_id),
                steps: vec![
                    JobStep {
                        action: StepAction::WriteFile {
                            path: self.settings.config_path.clone(),
                            content: render_nginx(config, &self.settings.passthrough),
                        },
                        timeout_seconds,
                    },
                    reload,
                ],
                stop_on_error: true,
            },
            None => JobSpec {
                name: "passthrough-config:remove".to_string(),
                steps: vec![
                    JobStep {
                        action: StepAction::Exec {
                            command: format!("rm -f {}", shell_quote(&self.settings.config_path)),
                        },
                        timeout_seconds,
                    },
                    reload,
                ],
                stop_on_error: true,
            },
        }
    }

    /// Generates and enqueues the machine's config. Does not wait for the agent.
    pub async fn deploy_to_machine(&self, vps_id: i32) -> Result<Deployment, DispatchError> {
        let config = self.generator.generate(vps_id).await?;
        let job = self.build_job(config.as_ref());
        let job_id = self.jobs.enqueue(vps_id, &job).await?;

        let pools = config.map(|c| c.pools).unwrap_or_default();
        if !pools.is_empty() {
            if let Err(e) = mark_config_applied(&self.db, vps_id, &pools).await {
                warn!(vps_id, error = %e, "Failed to flag members as config-applied.");
            }
        }
        info!(vps_id, %job_id, removes_config = pools.is_empty(), "Passthrough deployment enqueued.");
        Ok(Deployment {
            vps_id,
            job_id,
            removes_config: pools.is_empty(),
            pools,
        })
    }

    /// Enqueues, then polls the job until it is terminal or the wall-clock cap runs out.
    pub async fn apply(&self, vps_id: i32, wait: bool) -> Result<ApplyResult, DispatchError> {
        let deployment = self.deploy_to_machine(vps_id).await?;
        let job = if wait {
            Some(self.wait_for_job(deployment.job_id).await?)
        } else {
            None
        };
        Ok(ApplyResult { deployment, job })
    }

    pub async fn wait_for_job(&self, job_id: Uuid) -> Result<JobState, DispatchError> {
        let cap = self.settings.wait_cap;
        match tokio::time::timeout(cap, self.poll_until_terminal(job_id)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::WaitTimedOut {
                job_id,
                waited: cap,
            }),
        }
    }

    async fn poll_until_terminal(&self, job_id: Uuid) -> Result<JobState, DispatchError> {
        loop {
            match self.jobs.status(job_id).await? {
                Some(state) if state.status.is_terminal() => return Ok(state),
                Some(_) => {}
                None => return Err(DispatchError::JobVanished(job_id)),
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// One detached task per machine. The handles are returned for callers that want
    /// them; dropping them does not cancel the work.
    pub fn spawn_fleet_sync(
        self: &Arc<Self>,
        vps_ids: impl IntoIterator<Item = i32>,
    ) -> Vec<JoinHandle<()>> {
        let vps_ids: BTreeSet<i32> = vps_ids.into_iter().collect();
        debug!(machines = vps_ids.len(), "Spawning passthrough fleet sync.");
        vps_ids
            .into_iter()
            .map(|vps_id| {
                let dispatcher = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) = dispatcher.deploy_to_machine(vps_id).await {
                        error!(vps_id, error = %e, "Passthrough deployment failed.");
                    }
                })
            })
            .collect()
    }
}
