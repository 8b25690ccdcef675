// Job Scheduler - drives schedule-triggered workflows off a minute tick

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::info;

use crate::workflows::WorkflowEngine;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

pub type JobResult<T> = Result<T, JobError>;

/// Fires one tick per minute; the engine's trigger registry decides which
/// schedule workflows are due at that instant.
pub struct JobScheduler {
    scheduler: TokioScheduler,
    engine: Arc<WorkflowEngine>,
}

impl JobScheduler {
    pub async fn new(engine: Arc<WorkflowEngine>) -> JobResult<Self> {
        let scheduler = TokioScheduler::new().await?;
        Ok(Self { scheduler, engine })
    }

    pub async fn start(&self) -> JobResult<()> {
        info!("Starting workflow schedule tick");

        let engine = self.engine.clone();
        let job = Job::new_async("0 * * * * *", move |_uuid, _lock| {
            let engine = engine.clone();
            Box::pin(async move {
                engine.handle_schedule_tick(Utc::now()).await;
            })
        })?;

        self.scheduler.add(job).await?;
        self.scheduler.start().await?;

        info!("Workflow schedule tick started");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> JobResult<()> {
        info!("Shutting down workflow schedule tick");
        self.scheduler.shutdown().await?;
        Ok(())
    }
}
