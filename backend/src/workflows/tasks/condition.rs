// Condition tasks - choose one declared target by inspecting flow state

use async_trait::async_trait;
use tracing::debug;

use crate::error::TaskError;
use crate::services::DirectoryKey;
use crate::workflows::conditions::LeavingFlag;
use crate::workflows::registry::{Task, TaskContext, TaskOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UksbsSubject {
    Leaver,
    LineManager,
}

/// Looks the leaver or their line manager up in the payroll directory and
/// branches to `task_info.if_found` or `task_info.if_missing`.
pub struct CheckUksbs {
    subject: UksbsSubject,
}

impl CheckUksbs {
    pub fn new(subject: UksbsSubject) -> Self {
        Self { subject }
    }
}

#[async_trait]
impl Task for CheckUksbs {
    async fn execute(&self, ctx: &TaskContext<'_>) -> Result<TaskOutcome, TaskError> {
        if ctx.is_cancelled() {
            return Ok(TaskOutcome::terminate().with_note("leaving request cancelled"));
        }
        let if_found = ctx.required_str("if_found")?;
        let if_missing = ctx.required_str("if_missing")?;

        let email = match self.subject {
            UksbsSubject::Leaver => ctx.leaving_request.leaver_email.as_deref(),
            UksbsSubject::LineManager => ctx.leaving_request.manager_email.as_deref(),
        };
        let found = match email {
            Some(email) => ctx
                .services
                .adapters
                .directory
                .lookup(&DirectoryKey::Email(email.to_string()))
                .await?
                .is_some(),
            None => false,
        };

        debug!("Flow {}: {:?} in UK SBS: {}", ctx.flow.id, self.subject, found);
        Ok(if found {
            TaskOutcome::goto([if_found]).with_update("uksbs_checked", true)
        } else {
            TaskOutcome::goto([if_missing]).with_note(format!("{:?} not found in UK SBS", self.subject))
        })
    }
}

/// Branches on a business flag: `task_info.flag`, `if_true`, `if_false`.
pub struct FlagCondition;

#[async_trait]
impl Task for FlagCondition {
    async fn execute(&self, ctx: &TaskContext<'_>) -> Result<TaskOutcome, TaskError> {
        if ctx.is_cancelled() {
            return Ok(TaskOutcome::terminate().with_note("leaving request cancelled"));
        }
        let raw = ctx.required_str("flag")?;
        let flag: LeavingFlag = raw
            .parse()
            .map_err(|_| TaskError::with_detail("invalid task info", format!("unknown flag '{}'", raw)))?;
        let target = if flag.holds(ctx.leaving_request, ctx.today()) {
            ctx.required_str("if_true")?
        } else {
            ctx.required_str("if_false")?
        };
        Ok(TaskOutcome::goto([target]))
    }
}
