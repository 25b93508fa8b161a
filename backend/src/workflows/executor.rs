// Workflow Executor - Advances one flow as far as auto tasks allow
//
// Records run strictly in insertion order. Each is claimed under its row
// lock, executed, and settled before the next is looked at. The loop parks at
// the first step that waits on a person, on time or on a retry.

use leavers_shared::{Flow, LeavingRequest, TaskInfo, TaskRecord, UserContext};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::conditions::SkipCondition;
use super::definition::{Step, Workflow, WorkflowCatalogue};
use super::registry::{TaskContext, TaskRegistry, TaskServices};
use crate::error::{EngineError, EngineResult};
use crate::services::LeavingRequestSource;
use crate::store::{Completion, FlowStore, NewTaskRecord, StoreError, TaskClaim};

/// Why an advance stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParkReason {
    /// Nothing left to execute.
    Idle,
    /// The next record was scheduled during this advance and waits for the next one.
    Waiting,
    /// The next record is a non-auto task and no user is driving the tick.
    AwaitingUser,
    /// The next record's task failed and will be retried.
    TaskFailed,
    BudgetExhausted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvanceReport {
    pub flow_id: Uuid,
    pub executed: usize,
    pub skipped: usize,
    /// Records another worker executed first.
    pub already_executed: usize,
    pub failed: Option<String>,
    pub parked: ParkReason,
    pub finished: bool,
    pub duration_ms: i64,
}

impl AdvanceReport {
    fn new(flow_id: Uuid) -> Self {
        Self {
            flow_id,
            executed: 0,
            skipped: 0,
            already_executed: 0,
            failed: None,
            parked: ParkReason::Idle,
            finished: false,
            duration_ms: 0,
        }
    }
}

enum RecordOutcome {
    Executed(Vec<TaskRecord>),
    Skipped(SkipCondition),
    Failed(String),
    Park(ParkReason),
}

pub struct WorkflowExecutor {
    store: Arc<dyn FlowStore>,
    leaving_requests: Arc<dyn LeavingRequestSource>,
    registry: Arc<TaskRegistry>,
    catalogue: Arc<WorkflowCatalogue>,
    services: TaskServices,
    iteration_budget: usize,
}

impl WorkflowExecutor {
    pub fn new(
        store: Arc<dyn FlowStore>,
        leaving_requests: Arc<dyn LeavingRequestSource>,
        registry: Arc<TaskRegistry>,
        catalogue: Arc<WorkflowCatalogue>,
        services: TaskServices,
        iteration_budget: usize,
    ) -> Self {
        Self {
            store,
            leaving_requests,
            registry,
            catalogue,
            services,
            iteration_budget,
        }
    }

    /// Runs the flow's pending records until it parks.
    ///
    /// Structural problems (unknown step or task, undeclared target, bad task
    /// info) leave a note on the offending record and are returned as errors.
    /// Task failures are not errors: the record keeps its note and the flow
    /// parks with [`ParkReason::TaskFailed`].
    pub async fn advance(&self, flow: &Flow, user: Option<&UserContext>) -> EngineResult<AdvanceReport> {
        let started = Instant::now();
        let workflow = self
            .catalogue
            .get(&flow.workflow_name)
            .ok_or_else(|| EngineError::UnknownWorkflow(flow.workflow_name.clone()))?;

        let mut report = AdvanceReport::new(flow.id);
        let mut visited: HashSet<String> = HashSet::new();
        let mut deferred: HashSet<Uuid> = HashSet::new();
        let mut leaving_request: Option<LeavingRequest> = None;
        let mut iterations = 0;

        report.parked = loop {
            if iterations >= self.iteration_budget {
                warn!(
                    "Flow {}: iteration budget of {} exhausted, parking until next tick",
                    flow.id, self.iteration_budget
                );
                break ParkReason::BudgetExhausted;
            }
            iterations += 1;

            let Some(next) = self.store.next_executable(flow.id).await? else {
                self.store.finish_if_complete(flow.id, self.services.calendar.now()).await?;
                break ParkReason::Idle;
            };
            if deferred.contains(&next.id) {
                break ParkReason::Waiting;
            }

            let mut claim = match self.store.claim(next.id).await {
                Ok(claim) => claim,
                Err(StoreError::AlreadyExecuted(record_id)) => {
                    debug!("Flow {}: record {} executed by another worker", flow.id, record_id);
                    report.already_executed += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if leaving_request.is_none() {
                leaving_request = self.leaving_requests.get(flow.leaving_request_id).await?;
            }
            let Some(request) = leaving_request.as_ref() else {
                let err = EngineError::LeavingRequestNotFound(flow.leaving_request_id);
                return Err(fail_structural(claim.as_mut(), err).await);
            };

            match self.run_record(workflow, flow, claim.as_mut(), request, user).await? {
                RecordOutcome::Executed(created) => {
                    report.executed += 1;
                    visited.insert(next.step_id.clone());
                    deferred.extend(
                        created
                            .iter()
                            .filter(|record| visited.contains(&record.step_id))
                            .map(|record| record.id),
                    );
                }
                RecordOutcome::Skipped(condition) => {
                    debug!("Flow {}: skipped '{}' ({})", flow.id, next.step_id, condition);
                    report.skipped += 1;
                    visited.insert(next.step_id.clone());
                }
                RecordOutcome::Failed(note) => {
                    report.failed = Some(note);
                    break ParkReason::TaskFailed;
                }
                RecordOutcome::Park(reason) => break reason,
            }
        };

        report.finished = self
            .store
            .flow(flow.id)
            .await?
            .is_some_and(|current| current.is_finished());
        report.duration_ms = started.elapsed().as_millis() as i64;

        if report.finished {
            info!("Flow {} finished", flow.id);
        }
        debug!(
            "Flow {}: executed {}, skipped {}, parked {:?} in {}ms",
            flow.id, report.executed, report.skipped, report.parked, report.duration_ms
        );
        Ok(report)
    }

    async fn run_record(
        &self,
        workflow: &Workflow,
        flow: &Flow,
        claim: &mut dyn TaskClaim,
        request: &LeavingRequest,
        user: Option<&UserContext>,
    ) -> EngineResult<RecordOutcome> {
        let record = claim.record().clone();

        let Some(step) = workflow.step(&record.step_id) else {
            let err = EngineError::UnknownStep {
                workflow: workflow.name().to_string(),
                step_id: record.step_id.clone(),
            };
            return Err(fail_structural(claim, err).await);
        };

        let extra_conditions = match skip_conditions_from(&record) {
            Ok(conditions) => conditions,
            Err(err) => return Err(fail_structural(claim, err).await),
        };
        if let Some(condition) = step
            .skip_conditions
            .iter()
            .chain(extra_conditions.iter())
            .find(|condition| condition.applies(request))
        {
            claim
                .mark_executed(Completion {
                    targets: Vec::new(),
                    successors: Vec::new(),
                    executed_by: None,
                    executed_at: self.services.calendar.now(),
                    note: Some(format!("skipped: {}", condition)),
                })
                .await?;
            return Ok(RecordOutcome::Skipped(*condition));
        }

        let task = match self.registry.get(&record.task_name) {
            Ok(task) => task,
            Err(err) => return Err(fail_structural(claim, err).await),
        };
        let auto = task.auto();
        if !auto && user.is_none() {
            claim.release().await?;
            return Ok(RecordOutcome::Park(ParkReason::AwaitingUser));
        }

        let ctx = TaskContext {
            flow,
            record: &record,
            task_info: &record.task_info,
            step,
            leaving_request: request,
            user,
            services: &self.services,
        };
        let outcome = match task.execute(&ctx).await {
            Ok(outcome) => outcome,
            Err(task_err) => {
                let note = task_err.to_string();
                debug!("Flow {}: '{}' failed, will retry: {}", flow.id, record.step_id, note);
                claim.fail(note.clone()).await?;
                return Ok(RecordOutcome::Failed(note));
            }
        };

        let targets = outcome.targets.unwrap_or_else(|| step.targets.clone());
        let successors = match successors(workflow, step, &targets, &outcome.task_info_update) {
            Ok(successors) => successors,
            Err(err) => return Err(fail_structural(claim, err).await),
        };

        let created = claim
            .mark_executed(Completion {
                targets,
                successors,
                executed_by: if auto { None } else { user.map(|u| u.user_id) },
                executed_at: self.services.calendar.now(),
                note: outcome.note,
            })
            .await?;
        Ok(RecordOutcome::Executed(created))
    }
}

/// One record per target, each carrying its step's template with the
/// predecessor's update merged over it.
fn successors(
    workflow: &Workflow,
    step: &Step,
    targets: &[String],
    update: &TaskInfo,
) -> EngineResult<Vec<NewTaskRecord>> {
    targets
        .iter()
        .map(|target| {
            if !step.targets.contains(target) {
                return Err(EngineError::UndeclaredTarget {
                    step_id: step.step_id.clone(),
                    target: target.clone(),
                });
            }
            let target_step = workflow.step(target).ok_or_else(|| EngineError::UnknownStep {
                workflow: workflow.name().to_string(),
                step_id: target.clone(),
            })?;
            let mut task_info = target_step.task_info.clone();
            task_info.extend(update.iter().map(|(k, v)| (k.clone(), v.clone())));
            Ok(NewTaskRecord {
                step_id: target_step.step_id.clone(),
                task_name: target_step.task_name.clone(),
                task_info,
            })
        })
        .collect()
}

fn skip_conditions_from(record: &TaskRecord) -> EngineResult<Vec<SkipCondition>> {
    match record.task_info.get("skip_conditions") {
        None => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| EngineError::InvalidTaskInfo {
            record_id: record.id,
            reason: format!("skip_conditions: {}", e),
        }),
    }
}

/// Leaves the record unexecuted with the error as its note, then hands the
/// error back for the caller to return.
async fn fail_structural(claim: &mut dyn TaskClaim, err: EngineError) -> EngineError {
    error!("{} [{}]", err, err.error_code());
    if let Err(store_err) = claim.fail(err.to_string()).await {
        error!("Failed to record note on {}: {}", claim.record().id, store_err);
    }
    err
}
