// Pause-until-external tasks
//
// A pause is executed on every tick and re-enqueues its own step until the
// business flag it waits on holds. Its step must declare itself as a target.

use async_trait::async_trait;

use crate::error::TaskError;
use crate::workflows::conditions::LeavingFlag;
use crate::workflows::registry::{Task, TaskContext, TaskOutcome};

fn flag(ctx: &TaskContext<'_>, key: &str) -> Result<Option<LeavingFlag>, TaskError> {
    ctx.info_str(key)
        .map(|raw| {
            raw.parse::<LeavingFlag>().map_err(|_| {
                TaskError::with_detail("invalid task info", format!("unknown flag '{}' in '{}'", raw, key))
            })
        })
        .transpose()
}

fn release_or_wait(ctx: &TaskContext<'_>, released: bool) -> TaskOutcome {
    if released {
        TaskOutcome::goto(ctx.step.onward_targets())
    } else {
        TaskOutcome::repeat(&ctx.step.step_id)
    }
}

/// Waits on `task_info.until`.
pub struct PauseUntil;

#[async_trait]
impl Task for PauseUntil {
    async fn execute(&self, ctx: &TaskContext<'_>) -> Result<TaskOutcome, TaskError> {
        if ctx.is_cancelled() {
            return Ok(TaskOutcome::terminate().with_note("leaving request cancelled"));
        }
        let until = flag(ctx, "until")?
            .ok_or_else(|| TaskError::with_detail("invalid task info", "'until' is missing"))?;
        Ok(release_or_wait(ctx, until.holds(ctx.leaving_request, ctx.today())))
    }
}

/// Gates scheduled work on an optional `task_info.pass_condition`.
///
/// Without a pass condition the step proceeds at once, unless the engine is
/// configured to hold such pauses indefinitely.
pub struct PauseTask;

#[async_trait]
impl Task for PauseTask {
    async fn execute(&self, ctx: &TaskContext<'_>) -> Result<TaskOutcome, TaskError> {
        if ctx.is_cancelled() {
            return Ok(TaskOutcome::terminate().with_note("leaving request cancelled"));
        }
        let released = match flag(ctx, "pass_condition")? {
            Some(condition) => condition.holds(ctx.leaving_request, ctx.today()),
            None => !ctx.services.hold_unconditional_pauses,
        };
        Ok(release_or_wait(ctx, released))
    }
}
