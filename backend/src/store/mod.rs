//! Flow Store - durable flows, their ordered task records and the
//! notification log.
//!
//! Execution of a record is bracketed by a [`TaskClaim`], which holds the
//! record's row lock from [`FlowStore::claim`] until it is settled with
//! [`TaskClaim::mark_executed`], [`TaskClaim::fail`] or
//! [`TaskClaim::release`]. A second claim on the same record waits for the
//! first to settle and then fails with [`StoreError::AlreadyExecuted`] if the
//! record was executed meanwhile.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leavers_shared::{Flow, NotificationLogEntry, TaskInfo, TaskRecord};
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryFlowStore;
pub use postgres::PgFlowStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Task record {0} was already executed")]
    AlreadyExecuted(Uuid),
    #[error("A flow already exists for leaving request {0}")]
    FlowAlreadyExists(Uuid),
    #[error("Task record {0} not found")]
    RecordNotFound(Uuid),
    #[error("Claim on task record {0} was already settled")]
    ClaimSettled(Uuid),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct NewFlow {
    pub workflow_name: String,
    pub leaving_request_id: Uuid,
    pub executed_by: Uuid,
    pub started_at: DateTime<Utc>,
    pub start: NewTaskRecord,
}

/// A record to schedule. `task_info` is already the Step template with any
/// update from the predecessor merged over it.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTaskRecord {
    pub step_id: String,
    pub task_name: String,
    pub task_info: TaskInfo,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub targets: Vec<String>,
    /// One per target, in target order.
    pub successors: Vec<NewTaskRecord>,
    pub executed_by: Option<Uuid>,
    pub executed_at: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub flow_id: Uuid,
    pub task_name: String,
    pub email_id: Option<String>,
    pub channel_id: Option<String>,
    pub reference: Option<String>,
    pub note: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationOutcome {
    Recorded(NotificationLogEntry),
    /// Another worker logged the same `(flow, email_id, date)` first.
    Duplicate,
}

#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Creates the flow and the record for its start step.
    async fn create_flow(&self, new_flow: NewFlow) -> StoreResult<(Flow, TaskRecord)>;

    async fn flow(&self, flow_id: Uuid) -> StoreResult<Option<Flow>>;

    async fn flow_for_leaving_request(&self, leaving_request_id: Uuid) -> StoreResult<Option<Flow>>;

    async fn unfinished_flows(&self) -> StoreResult<Vec<Flow>>;

    /// All records of the flow in insertion order.
    async fn task_history(&self, flow_id: Uuid) -> StoreResult<Vec<TaskRecord>>;

    /// Oldest unexecuted record of the flow.
    async fn next_executable(&self, flow_id: Uuid) -> StoreResult<Option<TaskRecord>>;

    async fn unexecuted_count(&self, flow_id: Uuid) -> StoreResult<i64>;

    async fn claim(&self, record_id: Uuid) -> StoreResult<Box<dyn TaskClaim>>;

    /// Marks the flow finished when nothing is pending and the most recently
    /// executed record terminated its branch. Returns whether it did so.
    async fn finish_if_complete(&self, flow_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool>;

    async fn append_notification(&self, entry: NewNotification) -> StoreResult<NotificationOutcome>;

    async fn notifications(&self, flow_id: Uuid) -> StoreResult<Vec<NotificationLogEntry>>;

    /// Deletes the flow together with its records and log entries.
    async fn delete_flow(&self, flow_id: Uuid) -> StoreResult<bool>;
}

#[async_trait]
pub trait TaskClaim: Send {
    fn record(&self) -> &TaskRecord;

    /// Writes the execution and the successors in one transaction, finishing
    /// the flow when this was the last pending record and it terminated.
    async fn mark_executed(&mut self, completion: Completion) -> StoreResult<Vec<TaskRecord>>;

    /// Leaves the record unexecuted with `note` attached.
    async fn fail(&mut self, note: String) -> StoreResult<()>;

    /// Leaves the record untouched.
    async fn release(&mut self) -> StoreResult<()>;
}

/// `done` is false for a record whose only successor is its own step.
pub(crate) fn completes_step(step_id: &str, targets: &[String]) -> bool {
    !(targets.len() == 1 && targets[0] == step_id)
}
