// Workflow Engine
//
// Persistent step graphs for the leavers off-boarding process. Flows advance
// on a periodic tick and on business events; human and time-gated steps are
// expressed as tasks that re-enqueue themselves.

pub mod conditions;
pub mod definition;
pub mod engine;
pub mod executor;
pub mod leaving;
pub mod registry;
pub mod reminders;
pub mod tasks;

pub use conditions::{LeavingFlag, SkipCondition};
pub use definition::{Step, Workflow, WorkflowCatalogue};
pub use engine::{ActingUser, FlowEvent, FlowState, TickReport, WorkflowEngine};
pub use executor::{AdvanceReport, ParkReason, WorkflowExecutor};
pub use leaving::{LEAVING_WORKFLOW, leaving_workflow};
pub use registry::{Task, TaskContext, TaskOutcome, TaskRegistry, TaskServices};
pub use reminders::{Audience, DueRule, KeyDates, ReminderCadence, ReminderPolicy};
pub use tasks::{default_registry, register_defaults};
