// Workflow Engine - Starts flows and advances them on ticks and events

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use leavers_shared::{Flow, TaskRecord, UserContext};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::definition::WorkflowCatalogue;
use super::executor::{AdvanceReport, ParkReason, WorkflowExecutor};
use super::registry::{TaskRegistry, TaskServices};
use crate::calendar::Calendar;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::services::LeavingRequestSource;
use crate::store::{FlowStore, NewFlow, NewTaskRecord, StoreError};

/// Business events collaborators forward to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowEvent {
    LeaverSubmitted,
    LineManagerSubmitted,
    SreConfirmed,
    SecurityConfirmed,
    ServiceNowUpdated,
    Cancelled,
}

impl fmt::Display for FlowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowEvent::LeaverSubmitted => "leaver_submitted",
            FlowEvent::LineManagerSubmitted => "line_manager_submitted",
            FlowEvent::SreConfirmed => "sre_confirmed",
            FlowEvent::SecurityConfirmed => "security_confirmed",
            FlowEvent::ServiceNowUpdated => "service_now_updated",
            FlowEvent::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// The user behind a form submission. Their context only reaches the flow of
/// the leaving request they acted on.
#[derive(Debug, Clone, Copy)]
pub struct ActingUser<'a> {
    pub leaving_request_id: Uuid,
    pub user: &'a UserContext,
}

impl<'a> ActingUser<'a> {
    pub fn new(leaving_request_id: Uuid, user: &'a UserContext) -> Self {
        Self {
            leaving_request_id,
            user,
        }
    }

    fn for_flow(&self, flow: &Flow) -> Option<&'a UserContext> {
        (flow.leaving_request_id == self.leaving_request_id).then_some(self.user)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowState {
    pub flow: Flow,
    /// Unexecuted records in execution order.
    pub pending: Vec<TaskRecord>,
    pub executed: usize,
    pub finished: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickReport {
    pub started_at: DateTime<Utc>,
    pub flows: usize,
    pub executed: usize,
    pub skipped: usize,
    pub already_executed: usize,
    pub failed_tasks: usize,
    pub finished: usize,
    pub budget_exhausted: usize,
    /// Structural errors, one per affected flow.
    pub errors: Vec<String>,
    pub duration_ms: i64,
}

impl TickReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            flows: 0,
            executed: 0,
            skipped: 0,
            already_executed: 0,
            failed_tasks: 0,
            finished: 0,
            budget_exhausted: 0,
            errors: Vec::new(),
            duration_ms: 0,
        }
    }

    fn absorb(&mut self, advance: &AdvanceReport) {
        self.executed += advance.executed;
        self.skipped += advance.skipped;
        self.already_executed += advance.already_executed;
        if advance.parked == ParkReason::TaskFailed {
            self.failed_tasks += 1;
        }
        if advance.parked == ParkReason::BudgetExhausted {
            self.budget_exhausted += 1;
        }
        if advance.finished {
            self.finished += 1;
        }
    }
}

pub struct WorkflowEngine {
    store: Arc<dyn FlowStore>,
    leaving_requests: Arc<dyn LeavingRequestSource>,
    catalogue: Arc<WorkflowCatalogue>,
    calendar: Arc<Calendar>,
    executor: WorkflowExecutor,
    tick_concurrency: usize,
}

impl WorkflowEngine {
    /// Fails with [`EngineError::UnknownTask`] when a loaded workflow names a
    /// task the registry does not have.
    pub fn new(
        leaving_requests: Arc<dyn LeavingRequestSource>,
        registry: TaskRegistry,
        catalogue: WorkflowCatalogue,
        mut services: TaskServices,
        config: &EngineConfig,
    ) -> EngineResult<Self> {
        for workflow in catalogue.iter() {
            if let Some(step) = workflow.steps().iter().find(|s| !registry.contains(&s.task_name)) {
                error!(
                    "Workflow '{}': step '{}' uses unregistered task '{}'",
                    workflow.name(),
                    step.step_id,
                    step.task_name
                );
                return Err(EngineError::UnknownTask(step.task_name.clone()));
            }
        }

        services.hold_unconditional_pauses = config.hold_unconditional_pauses;
        let store = services.store.clone();
        let calendar = services.calendar.clone();
        let catalogue = Arc::new(catalogue);
        let executor = WorkflowExecutor::new(
            store.clone(),
            leaving_requests.clone(),
            Arc::new(registry),
            catalogue.clone(),
            services,
            config.iteration_budget,
        );

        info!(
            "Workflow engine ready with {} workflow(s)",
            catalogue.iter().count()
        );
        Ok(Self {
            store,
            leaving_requests,
            catalogue,
            calendar,
            executor,
            tick_concurrency: config.tick_concurrency.max(1),
        })
    }

    /// Creates the flow and its start record. The flow first advances on the
    /// next tick or event.
    pub async fn start_flow(
        &self,
        workflow_name: &str,
        leaving_request_id: Uuid,
        executed_by: Uuid,
    ) -> EngineResult<Flow> {
        let workflow = self
            .catalogue
            .get(workflow_name)
            .ok_or_else(|| EngineError::UnknownWorkflow(workflow_name.to_string()))?;
        if self.leaving_requests.get(leaving_request_id).await?.is_none() {
            return Err(EngineError::LeavingRequestNotFound(leaving_request_id));
        }

        let start = workflow.start_step();
        let new_flow = NewFlow {
            workflow_name: workflow.name().to_string(),
            leaving_request_id,
            executed_by,
            started_at: self.calendar.now(),
            start: NewTaskRecord {
                step_id: start.step_id.clone(),
                task_name: start.task_name.clone(),
                task_info: start.task_info.clone(),
            },
        };

        match self.store.create_flow(new_flow).await {
            Ok((flow, _)) => {
                info!(
                    "Started '{}' flow {} for leaving request {}",
                    workflow_name, flow.id, leaving_request_id
                );
                Ok(flow)
            }
            Err(StoreError::FlowAlreadyExists(id)) => {
                warn!("Leaving request {} already has a flow", id);
                Err(EngineError::FlowAlreadyExists(id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Advances every unfinished flow. Structural errors are logged and
    /// collected, and do not stop other flows from advancing. With an acting
    /// user, every other flow still advances without a user.
    pub async fn tick(&self, acting: Option<ActingUser<'_>>) -> EngineResult<TickReport> {
        let started = Instant::now();
        let mut report = TickReport::new(self.calendar.now());
        let flows = self.store.unfinished_flows().await?;
        report.flows = flows.len();

        let results: Vec<(Uuid, EngineResult<AdvanceReport>)> = stream::iter(flows)
            .map(|flow: Flow| async move {
                let user = acting.and_then(|a| a.for_flow(&flow));
                let result = self.executor.advance(&flow, user).await;
                (flow.id, result)
            })
            .buffer_unordered(self.tick_concurrency)
            .collect()
            .await;

        for (flow_id, result) in results {
            match result {
                Ok(advance) => report.absorb(&advance),
                Err(e) => {
                    error!("Flow {} could not advance: {} [{}]", flow_id, e, e.error_code());
                    report.errors.push(format!("{}: {}", flow_id, e));
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis() as i64;
        info!(
            "Tick advanced {} flow(s): {} executed, {} skipped, {} failed, {} finished, {} error(s) in {}ms",
            report.flows,
            report.executed,
            report.skipped,
            report.failed_tasks,
            report.finished,
            report.errors.len(),
            report.duration_ms
        );
        Ok(report)
    }

    /// Advances the flow of one leaving request after a business event.
    pub async fn notify(
        &self,
        leaving_request_id: Uuid,
        event: FlowEvent,
        user: Option<&UserContext>,
    ) -> EngineResult<AdvanceReport> {
        let flow = self
            .store
            .flow_for_leaving_request(leaving_request_id)
            .await?
            .ok_or(EngineError::FlowNotFound(leaving_request_id))?;
        info!("Flow {}: {} received", flow.id, event);
        self.executor.advance(&flow, user).await
    }

    pub async fn flow_state(&self, leaving_request_id: Uuid) -> EngineResult<Option<FlowState>> {
        let Some(flow) = self.store.flow_for_leaving_request(leaving_request_id).await? else {
            return Ok(None);
        };
        let history = self.store.task_history(flow.id).await?;
        let (executed, pending): (Vec<TaskRecord>, Vec<TaskRecord>) =
            history.into_iter().partition(TaskRecord::is_executed);
        Ok(Some(FlowState {
            finished: flow.is_finished(),
            flow,
            pending,
            executed: executed.len(),
        }))
    }

    pub async fn task_history(&self, flow_id: Uuid) -> EngineResult<Vec<TaskRecord>> {
        Ok(self.store.task_history(flow_id).await?)
    }

    /// Removes the leaving request's flow with all its records and log entries.
    pub async fn remove_flow(&self, leaving_request_id: Uuid) -> EngineResult<bool> {
        let Some(flow) = self.store.flow_for_leaving_request(leaving_request_id).await? else {
            return Ok(false);
        };
        let removed = self.store.delete_flow(flow.id).await?;
        if removed {
            info!("Removed flow {} for leaving request {}", flow.id, leaving_request_id);
        }
        Ok(removed)
    }
}
