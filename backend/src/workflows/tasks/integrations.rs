// Integration tasks - payroll submission, service desk tickets, chat posts
//
// Each side effect is logged with a channel so a retried or re-run record
// finds the earlier success and does not repeat it.

use async_trait::async_trait;
use tracing::{info, warn};

use super::log_notification;
use crate::error::TaskError;
use crate::services::{LeavingData, NewTicket, TicketPriority};
use crate::workflows::registry::{Task, TaskContext, TaskOutcome};

const PAYROLL_CHANNEL: &str = "uksbs";

fn leaver_label(ctx: &TaskContext<'_>) -> String {
    ctx.leaving_request
        .leaver_name
        .clone()
        .or_else(|| ctx.leaving_request.leaver_email.clone())
        .unwrap_or_else(|| ctx.leaving_request.id.to_string())
}

/// Sends the leaver's details to the payroll provider.
pub struct PayrollSubmission;

#[async_trait]
impl Task for PayrollSubmission {
    async fn execute(&self, ctx: &TaskContext<'_>) -> Result<TaskOutcome, TaskError> {
        if ctx.is_cancelled() {
            return Ok(TaskOutcome::terminate().with_note("leaving request cancelled"));
        }

        let log = ctx.services.store.notifications(ctx.flow.id).await?;
        if let Some(previous) = log.iter().find(|entry| {
            entry.channel_id.as_deref() == Some(PAYROLL_CHANNEL) && entry.task_name == ctx.record.task_name
        }) {
            return Ok(TaskOutcome::proceed().with_note(format!(
                "already submitted ({})",
                previous.reference.as_deref().unwrap_or("no reference")
            )));
        }

        let request = ctx.leaving_request;
        let leaver_email = request
            .leaver_email
            .clone()
            .ok_or_else(|| TaskError::new("leaver email missing"))?;
        let leaving_data = LeavingData {
            leaving_request_id: request.id,
            leaver_name: request.leaver_name.clone(),
            leaver_email,
            manager_email: request.manager_email.clone(),
            last_working_day: request.last_working_day,
            leaving_date: request.leaving_date,
        };

        let confirmation = ctx.services.adapters.payroll.submit(&leaving_data).await?;
        log_notification(
            ctx,
            None,
            Some(PAYROLL_CHANNEL),
            Some(confirmation.reference.clone()),
            "leaver details submitted to payroll".to_string(),
        )
        .await?;

        info!("Flow {}: payroll submission {}", ctx.flow.id, confirmation.reference);
        Ok(TaskOutcome::proceed().with_update("payroll_reference", confirmation.reference))
    }
}

/// Opens a service desk ticket for the group named by `task_info.group`.
///
/// Logged under `ticket:<step_id>` with the group as channel, so two steps
/// sharing a group each open their own ticket.
pub struct ServiceDeskTicket;

fn ticket_key(step_id: &str) -> String {
    format!("ticket:{}", step_id)
}

#[async_trait]
impl Task for ServiceDeskTicket {
    async fn execute(&self, ctx: &TaskContext<'_>) -> Result<TaskOutcome, TaskError> {
        if ctx.is_cancelled() {
            return Ok(TaskOutcome::terminate().with_note("leaving request cancelled"));
        }

        let group_key = ctx.required_str("group")?;
        let group = ctx
            .services
            .notifications
            .ticket_group(group_key)
            .ok_or_else(|| TaskError::with_detail("no ticket group", format!("'{}' is not configured", group_key)))?;

        let key = ticket_key(&ctx.record.step_id);
        let log = ctx.services.store.notifications(ctx.flow.id).await?;
        if let Some(previous) = log.iter().find(|entry| {
            entry.email_id.as_deref() == Some(key.as_str()) && entry.channel_id.as_deref() == Some(group)
        }) {
            return Ok(TaskOutcome::proceed().with_note(format!(
                "ticket already open ({})",
                previous.reference.as_deref().unwrap_or("no reference")
            )));
        }

        let leaver = leaver_label(ctx);
        let date = |d: Option<chrono::NaiveDate>| d.map(|d| d.to_string()).unwrap_or_else(|| "unknown".to_string());
        let ticket = NewTicket {
            subject: ctx
                .info_str("subject")
                .map(|s| format!("{}: {}", s, leaver))
                .unwrap_or_else(|| format!("Leaver: {}", leaver)),
            body: format!(
                "Leaver: {}\nLine manager: {}\nLast working day: {}\nLeaving date: {}",
                leaver,
                ctx.leaving_request.manager_email.as_deref().unwrap_or("unknown"),
                date(ctx.leaving_request.last_working_day),
                date(ctx.leaving_request.leaving_date),
            ),
            group: group.to_string(),
            priority: TicketPriority::Normal,
        };

        let ticket_id = ctx.services.adapters.tickets.open(&ticket).await?;
        log_notification(
            ctx,
            Some(&key),
            Some(group),
            Some(ticket_id.clone()),
            format!("ticket opened for {}", group),
        )
        .await?;

        info!("Flow {}: opened ticket {} for {}", ctx.flow.id, ticket_id, group);
        Ok(TaskOutcome::proceed().with_note(format!("ticket {}", ticket_id)))
    }
}

/// Posts the leaver announcement in the SRE channel. The message `ts` is
/// logged so later reminders can reply in its thread.
pub struct ChatNotification;

#[async_trait]
impl Task for ChatNotification {
    async fn execute(&self, ctx: &TaskContext<'_>) -> Result<TaskOutcome, TaskError> {
        if ctx.is_cancelled() {
            return Ok(TaskOutcome::terminate().with_note("leaving request cancelled"));
        }

        let (Some(chat), Some(channel)) = (
            ctx.services.adapters.chat.as_ref(),
            ctx.services.notifications.sre_channel_id.as_deref(),
        ) else {
            warn!("Flow {}: no chat channel configured, skipping SRE post", ctx.flow.id);
            return Ok(TaskOutcome::proceed().with_note("chat not configured"));
        };

        let log = ctx.services.store.notifications(ctx.flow.id).await?;
        if log
            .iter()
            .any(|entry| entry.channel_id.as_deref() == Some(channel) && entry.reference.is_some())
        {
            return Ok(TaskOutcome::proceed().with_note("already posted"));
        }

        let text = format!(
            "{} is leaving. Last working day: {}. Please carry out the SRE offboarding tasks.",
            leaver_label(ctx),
            ctx.leaving_request
                .last_working_day
                .map(|d| d.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        );
        let receipt = chat.post(channel, &text, None).await?;
        log_notification(
            ctx,
            None,
            Some(channel),
            Some(receipt.ts.clone()),
            "SRE channel notified".to_string(),
        )
        .await?;

        Ok(TaskOutcome::proceed().with_update("chat_ts", receipt.ts))
    }
}
