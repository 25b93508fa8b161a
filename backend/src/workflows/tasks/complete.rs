use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::info;

use crate::error::TaskError;
use crate::services::IndexDocument;
use crate::workflows::registry::{Task, TaskContext, TaskOutcome};

/// Join step every branch of the leaving workflow ends in.
///
/// Each arriving branch schedules its own record here; only the record that
/// finds nothing else pending completes the leaver.
pub struct LeaverComplete;

#[async_trait]
impl Task for LeaverComplete {
    async fn execute(&self, ctx: &TaskContext<'_>) -> Result<TaskOutcome, TaskError> {
        if ctx.is_cancelled() {
            return Ok(TaskOutcome::terminate().with_note("leaving request cancelled"));
        }

        let pending = ctx.services.store.unexecuted_count(ctx.flow.id).await?;
        if pending > 1 {
            return Ok(TaskOutcome::terminate().with_note("waiting for other branches"));
        }

        if let Some(index) = ctx.services.adapters.index.as_ref() {
            let mut fields = BTreeMap::new();
            fields.insert("status".to_string(), "offboarded".to_string());
            fields.insert("completed_at".to_string(), ctx.now().to_rfc3339());
            if let Some(email) = &ctx.leaving_request.leaver_email {
                fields.insert("email".to_string(), email.clone());
            }
            index
                .index(&IndexDocument {
                    id: ctx.leaving_request.id.to_string(),
                    fields,
                })
                .await?;
        }

        info!("Flow {}: leaver {} complete", ctx.flow.id, ctx.leaving_request.id);
        Ok(TaskOutcome::terminate().with_note("leaver complete"))
    }
}
