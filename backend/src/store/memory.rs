// In-memory Flow Store - same locking discipline as Postgres, for tests and stub runs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leavers_shared::{Flow, NotificationLogEntry, TaskRecord};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    Completion, FlowStore, NewFlow, NewNotification, NewTaskRecord, NotificationOutcome, StoreError, StoreResult,
    TaskClaim, completes_step,
};

#[derive(Debug, Default)]
struct MemoryState {
    flows: HashMap<Uuid, Flow>,
    /// Insertion order.
    records: Vec<TaskRecord>,
    notifications: Vec<NotificationLogEntry>,
    next_sequence: i64,
}

impl MemoryState {
    fn schedule(&mut self, flow_id: Uuid, new: NewTaskRecord, at: DateTime<Utc>) -> TaskRecord {
        self.next_sequence += 1;
        let record = TaskRecord {
            id: Uuid::new_v4(),
            flow_id,
            sequence: self.next_sequence,
            step_id: new.step_id,
            task_name: new.task_name,
            task_info: new.task_info,
            started_at: at,
            executed_at: None,
            executed_by_id: None,
            done: false,
            targets: Vec::new(),
            note: None,
        };
        self.records.push(record.clone());
        record
    }

    fn pending(&self, flow_id: Uuid) -> impl Iterator<Item = &TaskRecord> {
        self.records
            .iter()
            .filter(move |r| r.flow_id == flow_id && r.executed_at.is_none())
    }
}

type RowLock = Arc<AsyncMutex<()>>;

/// Locks for records that can still be claimed. Entries go once a record is
/// executed or deleted.
#[derive(Clone, Default)]
struct RowLocks(Arc<Mutex<HashMap<Uuid, RowLock>>>);

impl RowLocks {
    fn map(&self) -> MutexGuard<'_, HashMap<Uuid, RowLock>> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn get(&self, record_id: Uuid) -> RowLock {
        self.map().entry(record_id).or_default().clone()
    }

    /// Drops the entry unless another claimer has since replaced it.
    fn forget(&self, record_id: Uuid, lock: &RowLock) {
        let mut map = self.map();
        if map.get(&record_id).is_some_and(|current| Arc::ptr_eq(current, lock)) {
            map.remove(&record_id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map().len()
    }
}

#[derive(Clone, Default)]
pub struct MemoryFlowStore {
    state: Arc<Mutex<MemoryState>>,
    row_locks: RowLocks,
}

impl MemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

}

#[async_trait]
impl FlowStore for MemoryFlowStore {
    async fn create_flow(&self, new_flow: NewFlow) -> StoreResult<(Flow, TaskRecord)> {
        let mut state = self.state();
        if state
            .flows
            .values()
            .any(|f| f.leaving_request_id == new_flow.leaving_request_id)
        {
            return Err(StoreError::FlowAlreadyExists(new_flow.leaving_request_id));
        }

        let flow = Flow {
            id: Uuid::new_v4(),
            workflow_name: new_flow.workflow_name,
            leaving_request_id: new_flow.leaving_request_id,
            started_at: new_flow.started_at,
            finished_at: None,
            executed_by_id: new_flow.executed_by,
        };
        state.flows.insert(flow.id, flow.clone());
        let record = state.schedule(flow.id, new_flow.start, new_flow.started_at);
        Ok((flow, record))
    }

    async fn flow(&self, flow_id: Uuid) -> StoreResult<Option<Flow>> {
        Ok(self.state().flows.get(&flow_id).cloned())
    }

    async fn flow_for_leaving_request(&self, leaving_request_id: Uuid) -> StoreResult<Option<Flow>> {
        Ok(self
            .state()
            .flows
            .values()
            .find(|f| f.leaving_request_id == leaving_request_id)
            .cloned())
    }

    async fn unfinished_flows(&self) -> StoreResult<Vec<Flow>> {
        let mut flows: Vec<Flow> = self
            .state()
            .flows
            .values()
            .filter(|f| f.finished_at.is_none())
            .cloned()
            .collect();
        flows.sort_by_key(|f| f.started_at);
        Ok(flows)
    }

    async fn task_history(&self, flow_id: Uuid) -> StoreResult<Vec<TaskRecord>> {
        Ok(self
            .state()
            .records
            .iter()
            .filter(|r| r.flow_id == flow_id)
            .cloned()
            .collect())
    }

    async fn next_executable(&self, flow_id: Uuid) -> StoreResult<Option<TaskRecord>> {
        let state = self.state();
        Ok(state
            .pending(flow_id)
            .min_by_key(|r| (r.started_at, r.sequence))
            .cloned())
    }

    async fn unexecuted_count(&self, flow_id: Uuid) -> StoreResult<i64> {
        Ok(self.state().pending(flow_id).count() as i64)
    }

    async fn claim(&self, record_id: Uuid) -> StoreResult<Box<dyn TaskClaim>> {
        let lock = self.row_locks.get(record_id);
        let guard = lock.clone().lock_owned().await;

        let found = {
            let state = self.state();
            match state.records.iter().find(|r| r.id == record_id) {
                None => Err(StoreError::RecordNotFound(record_id)),
                Some(record) if record.is_executed() => Err(StoreError::AlreadyExecuted(record_id)),
                Some(record) => Ok(record.clone()),
            }
        };
        let record = match found {
            Ok(record) => record,
            Err(e) => {
                self.row_locks.forget(record_id, &lock);
                return Err(e);
            }
        };

        Ok(Box::new(MemoryTaskClaim {
            state: self.state.clone(),
            row_locks: self.row_locks.clone(),
            lock,
            record,
            guard: Some(guard),
        }))
    }

    async fn finish_if_complete(&self, flow_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut state = self.state();
        if state.pending(flow_id).next().is_some() {
            return Ok(false);
        }

        let terminated = state
            .records
            .iter()
            .filter(|r| r.flow_id == flow_id && r.executed_at.is_some())
            .max_by_key(|r| (r.executed_at, r.sequence))
            .is_some_and(|r| r.targets.is_empty());
        if !terminated {
            return Ok(false);
        }

        match state.flows.get_mut(&flow_id) {
            Some(flow) if flow.finished_at.is_none() => {
                flow.finished_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn append_notification(&self, entry: NewNotification) -> StoreResult<NotificationOutcome> {
        let mut state = self.state();
        let sent_date = entry.sent_at.date_naive();
        if entry.email_id.is_some()
            && state.notifications.iter().any(|n| {
                n.flow_id == entry.flow_id && n.email_id == entry.email_id && n.sent_date == sent_date
            })
        {
            return Ok(NotificationOutcome::Duplicate);
        }

        let logged = NotificationLogEntry {
            id: Uuid::new_v4(),
            flow_id: entry.flow_id,
            task_name: entry.task_name,
            email_id: entry.email_id,
            channel_id: entry.channel_id,
            reference: entry.reference,
            note: entry.note,
            sent_at: entry.sent_at,
            sent_date,
        };
        state.notifications.push(logged.clone());
        Ok(NotificationOutcome::Recorded(logged))
    }

    async fn notifications(&self, flow_id: Uuid) -> StoreResult<Vec<NotificationLogEntry>> {
        Ok(self
            .state()
            .notifications
            .iter()
            .filter(|n| n.flow_id == flow_id)
            .cloned()
            .collect())
    }

    async fn delete_flow(&self, flow_id: Uuid) -> StoreResult<bool> {
        let mut state = self.state();
        let removed = state.flows.remove(&flow_id).is_some();
        {
            let mut row_locks = self.row_locks.map();
            for record in state.records.iter().filter(|r| r.flow_id == flow_id) {
                row_locks.remove(&record.id);
            }
        }
        state.records.retain(|r| r.flow_id != flow_id);
        state.notifications.retain(|n| n.flow_id != flow_id);
        Ok(removed)
    }
}

struct MemoryTaskClaim {
    state: Arc<Mutex<MemoryState>>,
    row_locks: RowLocks,
    lock: RowLock,
    record: TaskRecord,
    guard: Option<OwnedMutexGuard<()>>,
}

impl MemoryTaskClaim {
    fn settle(&mut self) -> StoreResult<OwnedMutexGuard<()>> {
        self.guard.take().ok_or(StoreError::ClaimSettled(self.record.id))
    }
}

#[async_trait]
impl TaskClaim for MemoryTaskClaim {
    fn record(&self) -> &TaskRecord {
        &self.record
    }

    async fn mark_executed(&mut self, completion: Completion) -> StoreResult<Vec<TaskRecord>> {
        let _guard = self.settle()?;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let flow_id = self.record.flow_id;
        let executed_at = completion.executed_at.max(self.record.started_at);
        let done = completes_step(&self.record.step_id, &completion.targets);

        let record = state
            .records
            .iter_mut()
            .find(|r| r.id == self.record.id)
            .ok_or(StoreError::RecordNotFound(self.record.id))?;
        record.executed_at = Some(executed_at);
        record.executed_by_id = completion.executed_by;
        record.done = done;
        record.targets = completion.targets.clone();
        if completion.note.is_some() {
            record.note = completion.note;
        }
        self.record = record.clone();

        let created: Vec<TaskRecord> = completion
            .successors
            .into_iter()
            .map(|successor| state.schedule(flow_id, successor, executed_at))
            .collect();

        if completion.targets.is_empty() && state.pending(flow_id).next().is_none() {
            if let Some(flow) = state.flows.get_mut(&flow_id) {
                flow.finished_at.get_or_insert(executed_at);
            }
        }
        self.row_locks.forget(self.record.id, &self.lock);

        Ok(created)
    }

    async fn fail(&mut self, note: String) -> StoreResult<()> {
        let _guard = self.settle()?;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = state.records.iter_mut().find(|r| r.id == self.record.id) {
            record.note = Some(note);
        }
        Ok(())
    }

    async fn release(&mut self) -> StoreResult<()> {
        self.settle().map(drop)
    }
}
