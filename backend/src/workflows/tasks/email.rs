use async_trait::async_trait;
use tracing::info;

use super::{Recipient, log_notification, send_to_all, was_logged};
use crate::error::TaskError;
use crate::workflows::registry::{Task, TaskContext, TaskOutcome};

/// Sends `task_info.email_id` to `task_info.recipient`, once per flow.
pub struct NotificationEmail;

#[async_trait]
impl Task for NotificationEmail {
    async fn execute(&self, ctx: &TaskContext<'_>) -> Result<TaskOutcome, TaskError> {
        if ctx.is_cancelled() {
            return Ok(TaskOutcome::terminate().with_note("leaving request cancelled"));
        }

        let email_id = ctx.required_str("email_id")?;
        let log = ctx.services.store.notifications(ctx.flow.id).await?;
        if was_logged(&log, email_id) {
            return Ok(TaskOutcome::proceed().with_note(format!("{} already sent", email_id)));
        }

        let recipient = Recipient::from_task_info(ctx)?;
        let addresses = recipient.addresses(ctx)?;
        send_to_all(ctx, &addresses, email_id).await?;
        log_notification(
            ctx,
            Some(email_id),
            None,
            None,
            format!("sent to {}", recipient),
        )
        .await?;

        info!(
            "Flow {}: sent {} to {} address(es)",
            ctx.flow.id,
            email_id,
            addresses.len()
        );
        Ok(TaskOutcome::proceed())
    }
}
