//! Leavers off-boarding workflow engine.
//!
//! Collaborators start a flow per leaving request, forward business events
//! with [`WorkflowEngine::notify`], and read progress back through
//! [`WorkflowEngine::flow_state`]. The binary runs the periodic tick.

pub mod calendar;
pub mod config;
pub mod database;
pub mod error;
pub mod jobs;
pub mod services;
pub mod store;
pub mod workflows;

pub use calendar::{Calendar, Clock, SystemClock};
pub use config::{Config, EngineConfig, NotificationSettings};
pub use error::{EngineError, EngineResult, TaskError};
pub use workflows::{ActingUser, FlowEvent, FlowState, TickReport, WorkflowEngine};
