// Reminder tasks
//
// Both archetypes ask the reminder policy what is due, send it, log it and
// re-enqueue their step until the flag in `task_info.until` holds.

use async_trait::async_trait;
use leavers_shared::NotificationLogEntry;
use tracing::{info, warn};

use super::{Recipient, log_notification, processor_emails, send_to_all};
use crate::error::TaskError;
use crate::workflows::conditions::LeavingFlag;
use crate::workflows::registry::{Task, TaskContext, TaskOutcome};
use crate::workflows::reminders::{Audience, DueReminder, KeyDates, ReminderCadence, ReminderPolicy};

enum Gate<'a> {
    Cleared,
    Open(&'a ReminderCadence),
}

fn gate<'a>(ctx: &'a TaskContext<'_>) -> Result<Gate<'a>, TaskError> {
    if let Some(raw) = ctx.info_str("until") {
        let until: LeavingFlag = raw
            .parse()
            .map_err(|_| TaskError::with_detail("invalid task info", format!("unknown flag '{}'", raw)))?;
        if until.holds(ctx.leaving_request, ctx.today()) {
            return Ok(Gate::Cleared);
        }
    }
    ctx.step
        .reminder
        .as_ref()
        .map(Gate::Open)
        .ok_or_else(|| TaskError::with_detail("invalid step", format!("step '{}' has no reminder cadence", ctx.step.step_id)))
}

async fn due_today(
    ctx: &TaskContext<'_>,
    cadence: &ReminderCadence,
) -> Result<(Vec<DueReminder>, Vec<NotificationLogEntry>), TaskError> {
    let log = ctx.services.store.notifications(ctx.flow.id).await?;
    let dates = KeyDates::new(ctx.flow, ctx.leaving_request);
    let due = ReminderPolicy::new(&ctx.services.calendar).due(cadence, &dates, ctx.today(), &log);
    Ok((due, log))
}

/// Re-enqueue when the step loops on itself, otherwise hand over to the declared
/// targets (a checker step that loops back here).
fn keep_reminding(ctx: &TaskContext<'_>, sent: usize) -> TaskOutcome {
    let outcome = if ctx.step.targets_self() {
        TaskOutcome::repeat(&ctx.step.step_id)
    } else {
        TaskOutcome::proceed()
    };
    if sent > 0 {
        outcome.with_note(format!("sent {} reminder(s)", sent))
    } else {
        outcome
    }
}

/// Reminds `task_info.recipient` on the step's cadence.
pub struct ReminderEmail;

#[async_trait]
impl Task for ReminderEmail {
    async fn execute(&self, ctx: &TaskContext<'_>) -> Result<TaskOutcome, TaskError> {
        if ctx.is_cancelled() {
            return Ok(TaskOutcome::terminate().with_note("leaving request cancelled"));
        }
        let cadence = match gate(ctx)? {
            Gate::Cleared => return Ok(TaskOutcome::goto(ctx.step.onward_targets())),
            Gate::Open(cadence) => cadence,
        };

        let (due, _) = due_today(ctx, cadence).await?;
        if due.is_empty() {
            return Ok(keep_reminding(ctx, 0));
        }

        let recipient = Recipient::from_task_info(ctx)?;
        let addresses = recipient.addresses(ctx)?;
        for reminder in &due {
            send_to_all(ctx, &addresses, &reminder.template_email_id).await?;
            log_notification(
                ctx,
                Some(&reminder.email_id),
                None,
                None,
                format!("reminder sent to {}", recipient),
            )
            .await?;
            info!("Flow {}: sent reminder {}", ctx.flow.id, reminder.email_id);
        }
        Ok(keep_reminding(ctx, due.len()))
    }
}

/// Reminds processors and the line manager along a fan of offsets from the
/// last working day and leaving date.
///
/// Processors are `task_info.processor_emails`, or the team mailbox named by
/// `task_info.recipient`. With `task_info.chat_thread` set, processor
/// reminders are also posted in the thread of the flow's SRE chat message.
pub struct ProcessorReminderEmail;

impl ProcessorReminderEmail {
    fn addresses(ctx: &TaskContext<'_>, audience: Option<Audience>) -> Result<Vec<String>, TaskError> {
        match audience {
            Some(Audience::LineManager) => Recipient::LineManager.addresses(ctx),
            Some(Audience::Processors) | None => {
                let listed = processor_emails(ctx.task_info.get("processor_emails"))?;
                if listed.is_empty() {
                    Recipient::from_task_info(ctx)?.addresses(ctx)
                } else {
                    Ok(listed)
                }
            }
        }
    }

    async fn post_in_thread(ctx: &TaskContext<'_>, log: &[NotificationLogEntry], reminder: &DueReminder) {
        let (Some(chat), Some(channel)) = (
            ctx.services.adapters.chat.as_ref(),
            ctx.services.notifications.sre_channel_id.as_deref(),
        ) else {
            return;
        };
        let Some(thread_ts) = log
            .iter()
            .filter(|entry| entry.channel_id.as_deref() == Some(channel))
            .find_map(|entry| entry.reference.as_deref())
        else {
            warn!("Flow {}: no chat message to thread reminder {} under", ctx.flow.id, reminder.email_id);
            return;
        };

        let leaver = ctx.leaving_request.leaver_name.as_deref().unwrap_or("the leaver");
        let text = format!("Reminder: offboarding tasks for {} are still outstanding", leaver);
        if let Err(e) = chat.post(channel, &text, Some(thread_ts)).await {
            warn!("Flow {}: failed to thread reminder {}: {}", ctx.flow.id, reminder.email_id, e);
        }
    }
}

#[async_trait]
impl Task for ProcessorReminderEmail {
    async fn execute(&self, ctx: &TaskContext<'_>) -> Result<TaskOutcome, TaskError> {
        if ctx.is_cancelled() {
            return Ok(TaskOutcome::terminate().with_note("leaving request cancelled"));
        }
        let cadence = match gate(ctx)? {
            Gate::Cleared => return Ok(TaskOutcome::goto(ctx.step.onward_targets())),
            Gate::Open(cadence) => cadence,
        };

        let (due, log) = due_today(ctx, cadence).await?;
        let chat_thread = ctx.info_bool("chat_thread").unwrap_or(false);
        for reminder in &due {
            let addresses = Self::addresses(ctx, reminder.audience)?;
            send_to_all(ctx, &addresses, &reminder.template_email_id).await?;
            log_notification(
                ctx,
                Some(&reminder.email_id),
                None,
                None,
                format!("processor reminder sent to {} address(es)", addresses.len()),
            )
            .await?;
            info!("Flow {}: sent processor reminder {}", ctx.flow.id, reminder.email_id);

            if chat_thread && reminder.audience != Some(Audience::LineManager) {
                Self::post_in_thread(ctx, &log, reminder).await;
            }
        }
        Ok(keep_reminding(ctx, due.len()))
    }
}
