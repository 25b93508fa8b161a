// Task Implementations - The archetypes the leaving workflow is built from
//
// Every task ends its branch cleanly once the leaving request is cancelled.
// One-shot side effects consult the notification log first and are logged
// only after the adapter confirms, so a retried record re-attempts the send
// without repeating completed ones.

pub mod basic;
pub mod complete;
pub mod condition;
pub mod email;
pub mod integrations;
pub mod pause;
pub mod reminder;

use leavers_shared::{LeavingRequest, NotificationLogEntry};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use super::registry::{TaskContext, TaskRegistry};
use crate::error::{EngineResult, TaskError};
use crate::services::Personalisation;
use crate::store::{NewNotification, NotificationOutcome};

pub use basic::{BasicTask, ManualConfirmation};
pub use complete::LeaverComplete;
pub use condition::{CheckUksbs, FlagCondition, UksbsSubject};
pub use email::NotificationEmail;
pub use integrations::{ChatNotification, PayrollSubmission, ServiceDeskTicket};
pub use pause::{PauseTask, PauseUntil};
pub use reminder::{ProcessorReminderEmail, ReminderEmail};

pub const BASIC_TASK: &str = "basic_task";
pub const MANUAL_CONFIRMATION: &str = "manual_confirmation";
pub const PAUSE_TASK: &str = "pause_task";
pub const PAUSE_UNTIL: &str = "pause_until";
pub const NOTIFICATION_EMAIL: &str = "notification_email";
pub const REMINDER_EMAIL: &str = "reminder_email";
pub const PROCESSOR_REMINDER_EMAIL: &str = "processor_reminder_email";
pub const CHECK_UKSBS_LEAVER: &str = "check_uksbs_leaver";
pub const CHECK_UKSBS_LINE_MANAGER: &str = "check_uksbs_line_manager";
pub const FLAG_CONDITION: &str = "flag_condition";
pub const PAYROLL_SUBMISSION: &str = "payroll_submission";
pub const SERVICE_DESK_TICKET: &str = "service_desk_ticket";
pub const CHAT_NOTIFICATION: &str = "chat_notification";
pub const LEAVER_COMPLETE: &str = "leaver_complete";

/// Registers every built-in task under its canonical name.
pub fn register_defaults(registry: &mut TaskRegistry) -> EngineResult<()> {
    registry.register(BASIC_TASK, Arc::new(BasicTask))?;
    registry.register(MANUAL_CONFIRMATION, Arc::new(ManualConfirmation))?;
    registry.register(PAUSE_TASK, Arc::new(PauseTask))?;
    registry.register(PAUSE_UNTIL, Arc::new(PauseUntil))?;
    registry.register(NOTIFICATION_EMAIL, Arc::new(NotificationEmail))?;
    registry.register(REMINDER_EMAIL, Arc::new(ReminderEmail))?;
    registry.register(PROCESSOR_REMINDER_EMAIL, Arc::new(ProcessorReminderEmail))?;
    registry.register(CHECK_UKSBS_LEAVER, Arc::new(CheckUksbs::new(UksbsSubject::Leaver)))?;
    registry.register(CHECK_UKSBS_LINE_MANAGER, Arc::new(CheckUksbs::new(UksbsSubject::LineManager)))?;
    registry.register(FLAG_CONDITION, Arc::new(FlagCondition))?;
    registry.register(PAYROLL_SUBMISSION, Arc::new(PayrollSubmission))?;
    registry.register(SERVICE_DESK_TICKET, Arc::new(ServiceDeskTicket))?;
    registry.register(CHAT_NOTIFICATION, Arc::new(ChatNotification))?;
    registry.register(LEAVER_COMPLETE, Arc::new(LeaverComplete))?;
    Ok(())
}

pub fn default_registry() -> EngineResult<TaskRegistry> {
    let mut registry = TaskRegistry::new();
    register_defaults(&mut registry)?;
    Ok(registry)
}

/// Who an e-mail goes to, as written in `task_info.recipient`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Leaver,
    LineManager,
    /// Addresses listed in `task_info.processor_emails`.
    Processors,
    /// A configured team mailbox.
    Team(String),
}

impl FromStr for Recipient {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "leaver" => Ok(Recipient::Leaver),
            "line_manager" => Ok(Recipient::LineManager),
            "processors" => Ok(Recipient::Processors),
            "" => Err(TaskError::with_detail("invalid task info", "empty recipient")),
            team => Ok(Recipient::Team(team.to_string())),
        }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Leaver => f.write_str("leaver"),
            Recipient::LineManager => f.write_str("line_manager"),
            Recipient::Processors => f.write_str("processors"),
            Recipient::Team(team) => f.write_str(team),
        }
    }
}

impl Recipient {
    /// Resolves to at least one address or fails the task.
    pub fn addresses(&self, ctx: &TaskContext<'_>) -> Result<Vec<String>, TaskError> {
        let addresses = match self {
            Recipient::Leaver => ctx.leaving_request.leaver_email.iter().cloned().collect(),
            Recipient::LineManager => ctx.leaving_request.manager_email.iter().cloned().collect(),
            Recipient::Processors => processor_emails(ctx.task_info.get("processor_emails"))?,
            Recipient::Team(team) => ctx.services.notifications.mailbox(team).to_vec(),
        };
        if addresses.is_empty() {
            return Err(TaskError::with_detail(
                "no recipient",
                format!("no address known for '{}'", self),
            ));
        }
        Ok(addresses)
    }

    pub fn from_task_info(ctx: &TaskContext<'_>) -> Result<Self, TaskError> {
        ctx.required_str("recipient")?.parse()
    }
}

/// Accepts a list of addresses or a single, possibly comma separated, string.
pub fn processor_emails(value: Option<&Value>) -> Result<Vec<String>, TaskError> {
    let split = |raw: &str| -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect()
    };
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(raw)) => Ok(split(raw)),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(split).ok_or_else(|| {
                    TaskError::with_detail("invalid task info", "processor_emails must hold strings")
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|lists| lists.into_iter().flatten().collect()),
        Some(other) => Err(TaskError::with_detail(
            "invalid task info",
            format!("processor_emails has unexpected value {}", other),
        )),
    }
}

pub fn personalisation(request: &LeavingRequest) -> Personalisation {
    let mut fields = Personalisation::new();
    let mut put = |key: &str, value: Option<String>| {
        fields.insert(key.to_string(), value.unwrap_or_default());
    };
    put("leaver_name", request.leaver_name.clone());
    put("manager_name", request.manager_name.clone());
    put(
        "last_working_day",
        request.last_working_day.map(|d| d.format("%d %B %Y").to_string()),
    );
    put(
        "leaving_date",
        request.leaving_date.map(|d| d.format("%d %B %Y").to_string()),
    );
    fields
}

pub(crate) fn was_logged(log: &[NotificationLogEntry], email_id: &str) -> bool {
    log.iter().any(|entry| entry.email_id.as_deref() == Some(email_id))
}

/// Sends `template_email_id` to every address.
pub(crate) async fn send_to_all(
    ctx: &TaskContext<'_>,
    addresses: &[String],
    template_email_id: &str,
) -> Result<Vec<String>, TaskError> {
    let template_id = ctx.services.notifications.template_id(template_email_id);
    let fields = personalisation(ctx.leaving_request);
    let mut confirmations = Vec::with_capacity(addresses.len());
    for address in addresses {
        let confirmation = ctx.services.adapters.email.send(address, template_id, &fields).await?;
        confirmations.push(confirmation.id);
    }
    Ok(confirmations)
}

/// Appends to the flow's notification log. A duplicate means another worker
/// logged the same send today and is not an error.
pub(crate) async fn log_notification(
    ctx: &TaskContext<'_>,
    email_id: Option<&str>,
    channel_id: Option<&str>,
    reference: Option<String>,
    note: String,
) -> Result<NotificationOutcome, TaskError> {
    let outcome = ctx
        .services
        .store
        .append_notification(NewNotification {
            flow_id: ctx.flow.id,
            task_name: ctx.record.task_name.clone(),
            email_id: email_id.map(str::to_string),
            channel_id: channel_id.map(str::to_string),
            reference,
            note,
            sent_at: ctx.now(),
        })
        .await?;
    if outcome == NotificationOutcome::Duplicate {
        debug!(
            "Flow {}: notification {:?} already logged today",
            ctx.flow.id, email_id
        );
    }
    Ok(outcome)
}
