// Task Registry - Maps task names to their implementations

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use leavers_shared::{Flow, LeavingRequest, TaskInfo, TaskRecord, UserContext};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::definition::Step;
use crate::calendar::Calendar;
use crate::config::NotificationSettings;
use crate::error::{EngineError, EngineResult, TaskError};
use crate::services::Adapters;
use crate::store::FlowStore;

/// Shared collaborators every task execution can reach.
#[derive(Clone)]
pub struct TaskServices {
    pub adapters: Adapters,
    pub store: Arc<dyn FlowStore>,
    pub calendar: Arc<Calendar>,
    pub notifications: NotificationSettings,
    pub hold_unconditional_pauses: bool,
}

impl TaskServices {
    pub fn new(
        adapters: Adapters,
        store: Arc<dyn FlowStore>,
        calendar: Arc<Calendar>,
        notifications: NotificationSettings,
    ) -> Self {
        Self {
            adapters,
            store,
            calendar,
            notifications,
            hold_unconditional_pauses: false,
        }
    }
}

/// Everything a task sees while a record is claimed.
pub struct TaskContext<'a> {
    pub flow: &'a Flow,
    pub record: &'a TaskRecord,
    /// The record's persisted `task_info`.
    pub task_info: &'a TaskInfo,
    pub step: &'a Step,
    pub leaving_request: &'a LeavingRequest,
    pub user: Option<&'a UserContext>,
    pub services: &'a TaskServices,
}

impl TaskContext<'_> {
    pub fn today(&self) -> NaiveDate {
        self.services.calendar.today()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.services.calendar.now()
    }

    pub fn is_cancelled(&self) -> bool {
        self.leaving_request.is_cancelled()
    }

    pub fn info_str(&self, key: &str) -> Option<&str> {
        self.task_info.get(key).and_then(|v| v.as_str())
    }

    pub fn info_bool(&self, key: &str) -> Option<bool> {
        self.task_info.get(key).and_then(|v| v.as_bool())
    }

    /// A string entry the task cannot run without.
    pub fn required_str(&self, key: &str) -> Result<&str, TaskError> {
        self.info_str(key)
            .ok_or_else(|| TaskError::with_detail("invalid task info", format!("'{}' is missing", key)))
    }
}

/// What a task decided.
///
/// `targets: None` means "the step's declared targets".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutcome {
    pub targets: Option<Vec<String>>,
    pub task_info_update: TaskInfo,
    pub note: Option<String>,
}

impl TaskOutcome {
    pub fn proceed() -> Self {
        Self::default()
    }

    pub fn goto<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: Some(targets.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Ends the branch.
    pub fn terminate() -> Self {
        Self::goto(Vec::<String>::new())
    }

    pub fn repeat(step_id: &str) -> Self {
        Self::goto([step_id])
    }

    pub fn with_update(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.task_info_update.insert(key.to_string(), value.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

#[async_trait]
pub trait Task: Send + Sync {
    /// Auto tasks run on every tick; the others only when a user drives the flow.
    fn auto(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &TaskContext<'_>) -> Result<TaskOutcome, TaskError>;
}

#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<dyn Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, task: Arc<dyn Task>) -> EngineResult<()> {
        if self.tasks.contains_key(name) {
            return Err(EngineError::DuplicateTask(name.to_string()));
        }
        self.tasks.insert(name.to_string(), task);
        Ok(())
    }

    pub fn get(&self, name: &str) -> EngineResult<Arc<dyn Task>> {
        self.tasks
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownTask(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tasks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry").field("tasks", &self.names()).finish()
    }
}
