//! Error kinds raised by the engine and its seams.
//!
//! Structural errors abort the affected operation and are surfaced to
//! operators. Transient task failures leave the record unexecuted for the next
//! tick. Concurrency errors are benign and swallowed by the executor.

use thiserror::Error;
use uuid::Uuid;

use crate::services::AdapterError;
use crate::store::StoreError;

/// Failure returned by a task implementation.
///
/// Carries a short reason and an optional human-readable detail; both end up
/// in the task record's note.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}{}", .detail.as_ref().map(|d| format!(": {}", d)).unwrap_or_default())]
pub struct TaskError {
    pub reason: String,
    pub detail: Option<String>,
}

impl TaskError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            detail: None,
        }
    }

    pub fn with_detail(reason: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            detail: Some(detail.into()),
        }
    }
}

impl From<AdapterError> for TaskError {
    fn from(err: AdapterError) -> Self {
        TaskError::with_detail("adapter failure", err.to_string())
    }
}

impl From<StoreError> for TaskError {
    fn from(err: StoreError) -> Self {
        TaskError::with_detail("store failure", err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown step '{step_id}' in workflow '{workflow}'")]
    UnknownStep { workflow: String, step_id: String },

    #[error("No task registered under '{0}'")]
    UnknownTask(String),

    #[error("Task '{0}' is already registered")]
    DuplicateTask(String),

    #[error("A flow already exists for leaving request {0}")]
    FlowAlreadyExists(Uuid),

    #[error("No flow for leaving request {0}")]
    FlowNotFound(Uuid),

    #[error("Unknown workflow '{0}'")]
    UnknownWorkflow(String),

    #[error("Workflow '{name}' is invalid: {reason}")]
    InvalidWorkflow { name: String, reason: String },

    #[error("Step '{step_id}' returned undeclared target '{target}'")]
    UndeclaredTarget { step_id: String, target: String },

    #[error("Invalid task info on record {record_id}: {reason}")]
    InvalidTaskInfo { record_id: Uuid, reason: String },

    #[error("Leaving request {0} not found")]
    LeavingRequestNotFound(Uuid),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Stable code for operator dashboards and log searches.
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::UnknownStep { .. } => "UNKNOWN_STEP",
            EngineError::UnknownTask(_) => "UNKNOWN_TASK",
            EngineError::DuplicateTask(_) => "DUPLICATE_TASK",
            EngineError::FlowAlreadyExists(_) => "FLOW_ALREADY_EXISTS",
            EngineError::FlowNotFound(_) => "FLOW_NOT_FOUND",
            EngineError::UnknownWorkflow(_) => "UNKNOWN_WORKFLOW",
            EngineError::InvalidWorkflow { .. } => "INVALID_WORKFLOW",
            EngineError::UndeclaredTarget { .. } => "UNDECLARED_TARGET",
            EngineError::InvalidTaskInfo { .. } => "INVALID_TASK_INFO",
            EngineError::LeavingRequestNotFound(_) => "LEAVING_REQUEST_NOT_FOUND",
            EngineError::Store(_) => "STORE_ERROR",
        }
    }

    /// Structural errors point at a definition or data problem that a retry
    /// will not fix.
    pub fn is_structural(&self) -> bool {
        !matches!(self, EngineError::Store(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
