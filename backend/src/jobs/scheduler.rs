// Job Scheduler - Runs the workflow tick on a cron schedule

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::WorkflowTickJob;
use crate::config::EngineConfig;
use crate::workflows::{TickReport, WorkflowEngine};

const MAX_EXECUTION_LOGS: usize = 100;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
    #[error("Job execution error: {0}")]
    ExecutionError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub tick_interval_minutes: u32,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            tick_interval_minutes: 5,
        }
    }
}

impl From<&EngineConfig> for JobConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            tick_interval_minutes: config.tick_interval_minutes,
        }
    }
}

impl JobConfig {
    pub fn tick_cron(&self) -> JobResult<String> {
        match self.tick_interval_minutes {
            1..=59 => Ok(format!("0 */{} * * * *", self.tick_interval_minutes)),
            other => Err(JobError::ConfigError(format!(
                "tick interval must be 1-59 minutes, got {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionLog {
    pub id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub flows_advanced: usize,
    pub tasks_executed: usize,
    pub errors: Vec<String>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    PartialFailure,
}

type ExecutionLogs = Arc<RwLock<Vec<JobExecutionLog>>>;

pub struct JobScheduler {
    scheduler: TokioScheduler,
    tick_job: WorkflowTickJob,
    config: JobConfig,
    execution_logs: ExecutionLogs,
}

impl JobScheduler {
    pub async fn new(engine: Arc<WorkflowEngine>, config: JobConfig) -> JobResult<Self> {
        let scheduler = TokioScheduler::new().await?;

        Ok(Self {
            scheduler,
            tick_job: WorkflowTickJob::new(engine),
            config,
            execution_logs: Arc::new(RwLock::new(Vec::new())),
        })
    }

    pub async fn start(&self) -> JobResult<()> {
        info!("Starting background job scheduler");

        self.schedule_workflow_tick().await?;
        self.scheduler.start().await?;

        info!("Background job scheduler started successfully");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> JobResult<()> {
        info!("Shutting down background job scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }

    async fn schedule_workflow_tick(&self) -> JobResult<()> {
        let cron_expr = self.config.tick_cron()?;
        let tick_job = self.tick_job.clone();
        let logs = self.execution_logs.clone();

        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let tick_job = tick_job.clone();
            let logs = logs.clone();

            Box::pin(async move {
                if let Err(e) = run_and_record(&tick_job, &logs).await {
                    error!("Workflow tick failed: {}", e);
                }
            })
        })?;

        self.scheduler.add(job).await?;
        info!(
            "Scheduled workflow tick to run every {} minutes",
            self.config.tick_interval_minutes
        );

        Ok(())
    }

    pub async fn get_execution_logs(&self) -> Vec<JobExecutionLog> {
        self.execution_logs.read().await.clone()
    }

    pub async fn run_job_now(&self, job_name: &str) -> JobResult<TickReport> {
        match job_name {
            WorkflowTickJob::NAME => run_and_record(&self.tick_job, &self.execution_logs).await,
            _ => Err(JobError::ConfigError(format!("Unknown job: {}", job_name))),
        }
    }
}

async fn run_and_record(tick_job: &WorkflowTickJob, logs: &ExecutionLogs) -> JobResult<TickReport> {
    let started_at = Utc::now();
    let result = tick_job.run().await;
    let completed_at = Utc::now();

    let log = match &result {
        Ok(report) => JobExecutionLog {
            id: Uuid::new_v4(),
            job_name: WorkflowTickJob::NAME.to_string(),
            started_at,
            completed_at: Some(completed_at),
            status: if report.errors.is_empty() {
                JobStatus::Completed
            } else {
                JobStatus::PartialFailure
            },
            flows_advanced: report.flows,
            tasks_executed: report.executed,
            errors: report.errors.clone(),
            duration_ms: Some((completed_at - started_at).num_milliseconds()),
        },
        Err(e) => JobExecutionLog {
            id: Uuid::new_v4(),
            job_name: WorkflowTickJob::NAME.to_string(),
            started_at,
            completed_at: Some(completed_at),
            status: JobStatus::Failed,
            flows_advanced: 0,
            tasks_executed: 0,
            errors: vec![e.to_string()],
            duration_ms: Some((completed_at - started_at).num_milliseconds()),
        },
    };
    if log.status == JobStatus::PartialFailure {
        warn!("Workflow tick finished with {} error(s)", log.errors.len());
    }

    let mut logs = logs.write().await;
    logs.push(log);
    if logs.len() > MAX_EXECUTION_LOGS {
        logs.remove(0);
    }

    result
}
