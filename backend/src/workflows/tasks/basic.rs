use async_trait::async_trait;

use crate::error::TaskError;
use crate::workflows::registry::{Task, TaskContext, TaskOutcome};

/// Proceeds to the step's declared targets.
pub struct BasicTask;

#[async_trait]
impl Task for BasicTask {
    async fn execute(&self, ctx: &TaskContext<'_>) -> Result<TaskOutcome, TaskError> {
        if ctx.is_cancelled() {
            return Ok(TaskOutcome::terminate().with_note("leaving request cancelled"));
        }
        Ok(TaskOutcome::proceed())
    }
}

/// A pause point only a user-driven tick gets past.
pub struct ManualConfirmation;

#[async_trait]
impl Task for ManualConfirmation {
    fn auto(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &TaskContext<'_>) -> Result<TaskOutcome, TaskError> {
        if ctx.is_cancelled() {
            return Ok(TaskOutcome::terminate().with_note("leaving request cancelled"));
        }
        let by = ctx
            .user
            .map(|user| user.email.clone().unwrap_or_else(|| user.user_id.to_string()))
            .unwrap_or_else(|| "unknown user".to_string());
        Ok(TaskOutcome::proceed().with_note(format!("confirmed by {}", by)))
    }
}
