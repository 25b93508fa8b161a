use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque per-record task configuration, persisted as a JSON object.
pub type TaskInfo = serde_json::Map<String, serde_json::Value>;

/// One workflow instance for one leaving request.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub id: Uuid,
    pub workflow_name: String,
    pub leaving_request_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub executed_by_id: Uuid,
}

impl Flow {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// Scheduled or completed execution of a step within a flow.
///
/// Records are append-only: the only mutation is the single transition to
/// executed, which writes `executed_at`, `executed_by_id`, `done` and
/// `targets` together. `note` carries the last failure or skip reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub sequence: i64,
    pub step_id: String,
    pub task_name: String,
    pub task_info: TaskInfo,
    pub started_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub executed_by_id: Option<Uuid>,
    pub done: bool,
    pub targets: Vec<String>,
    pub note: Option<String>,
}

impl TaskRecord {
    pub fn is_executed(&self) -> bool {
        self.executed_at.is_some()
    }

    /// Executed, but re-emitted its own step as the only successor.
    pub fn is_self_loop(&self) -> bool {
        self.targets.len() == 1 && self.targets[0] == self.step_id
    }
}

/// Append-only record of an outbound notification or side effect.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationLogEntry {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub task_name: String,
    pub email_id: Option<String>,
    pub channel_id: Option<String>,
    /// External reference returned by the adapter (chat `ts`, ticket id).
    pub reference: Option<String>,
    pub note: String,
    pub sent_at: DateTime<Utc>,
    pub sent_date: NaiveDate,
}

/// The slice of the business leaving request the engine reads.
///
/// Completion markers are timestamps set by collaborators when the
/// corresponding human step is done; all dates are optional because leaver
/// records are filled in over several forms.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeavingRequest {
    pub id: Uuid,
    pub leaver_name: Option<String>,
    pub leaver_email: Option<String>,
    pub manager_name: Option<String>,
    pub manager_email: Option<String>,
    pub last_working_day: Option<NaiveDate>,
    pub leaving_date: Option<NaiveDate>,
    pub is_transfer: bool,
    pub manually_offboarded_from_uksbs: bool,
    pub is_hsfl_leaver: bool,
    pub is_rosa_user: bool,
    pub cancelled: Option<DateTime<Utc>>,
    pub line_manager_complete: Option<DateTime<Utc>>,
    pub sre_complete: Option<DateTime<Utc>>,
    pub security_building_pass_complete: Option<DateTime<Utc>>,
    pub security_rosa_kit_complete: Option<DateTime<Utc>>,
    pub service_now_offline_complete: Option<DateTime<Utc>>,
}

impl LeavingRequest {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_some()
    }
}

/// The user on whose behalf a user-driven tick runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: Uuid,
    pub email: Option<String>,
}

impl UserContext {
    pub fn new(user_id: Uuid) -> Self {
        Self { user_id, email: None }
    }
}
