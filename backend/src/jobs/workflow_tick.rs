use std::sync::Arc;
use tracing::info;

use super::scheduler::{JobError, JobResult};
use crate::workflows::{TickReport, WorkflowEngine};

/// The periodic tick: advances every unfinished flow with no user context.
#[derive(Clone)]
pub struct WorkflowTickJob {
    engine: Arc<WorkflowEngine>,
}

impl WorkflowTickJob {
    pub const NAME: &'static str = "workflow_tick";

    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self { engine }
    }

    pub async fn run(&self) -> JobResult<TickReport> {
        info!("Running workflow tick");
        self.engine
            .tick(None)
            .await
            .map_err(|e| JobError::ExecutionError(e.to_string()))
    }
}
