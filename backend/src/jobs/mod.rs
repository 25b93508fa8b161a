// Background Jobs
//
// The engine owns a single periodic job, the workflow tick. Reminder timing
// lives in the workflow data, not in the schedule.

pub mod scheduler;
pub mod workflow_tick;

pub use scheduler::{JobConfig, JobError, JobExecutionLog, JobResult, JobScheduler, JobStatus};
pub use workflow_tick::WorkflowTickJob;
