// Postgres Flow Store - row-locked claims over flows, task_records and notification_log

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leavers_shared::{Flow, NotificationLogEntry, TaskInfo, TaskRecord};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use super::{
    Completion, FlowStore, NewFlow, NewNotification, NewTaskRecord, NotificationOutcome, StoreError, StoreResult,
    TaskClaim, completes_step,
};

const TASK_RECORD_COLUMNS: &str = "id, flow_id, sequence, step_id, task_name, task_info, started_at, \
     executed_at, executed_by_id, done, targets, note";

const FLOW_COLUMNS: &str = "id, workflow_name, leaving_request_id, started_at, finished_at, executed_by_id";

const NOTIFICATION_COLUMNS: &str =
    "id, flow_id, task_name, email_id, channel_id, reference, note, sent_at, sent_date";

#[derive(Debug, FromRow)]
struct TaskRecordRow {
    id: Uuid,
    flow_id: Uuid,
    sequence: i64,
    step_id: String,
    task_name: String,
    task_info: serde_json::Value,
    started_at: DateTime<Utc>,
    executed_at: Option<DateTime<Utc>>,
    executed_by_id: Option<Uuid>,
    done: bool,
    targets: Vec<String>,
    note: Option<String>,
}

impl TryFrom<TaskRecordRow> for TaskRecord {
    type Error = StoreError;

    fn try_from(row: TaskRecordRow) -> StoreResult<Self> {
        Ok(TaskRecord {
            id: row.id,
            flow_id: row.flow_id,
            sequence: row.sequence,
            step_id: row.step_id,
            task_name: row.task_name,
            task_info: serde_json::from_value::<TaskInfo>(row.task_info)?,
            started_at: row.started_at,
            executed_at: row.executed_at,
            executed_by_id: row.executed_by_id,
            done: row.done,
            targets: row.targets,
            note: row.note,
        })
    }
}

fn into_records(rows: Vec<TaskRecordRow>) -> StoreResult<Vec<TaskRecord>> {
    rows.into_iter().map(TaskRecord::try_from).collect()
}

async fn insert_record(
    tx: &mut Transaction<'static, Postgres>,
    flow_id: Uuid,
    new: NewTaskRecord,
    started_at: DateTime<Utc>,
) -> StoreResult<TaskRecord> {
    let row = sqlx::query_as::<_, TaskRecordRow>(&format!(
        r#"
        INSERT INTO task_records (id, flow_id, step_id, task_name, task_info, started_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {}
        "#,
        TASK_RECORD_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(flow_id)
    .bind(&new.step_id)
    .bind(&new.task_name)
    .bind(serde_json::Value::Object(new.task_info))
    .bind(started_at)
    .fetch_one(&mut **tx)
    .await?;

    row.try_into()
}

#[derive(Clone)]
pub struct PgFlowStore {
    db_pool: PgPool,
}

impl PgFlowStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl FlowStore for PgFlowStore {
    async fn create_flow(&self, new_flow: NewFlow) -> StoreResult<(Flow, TaskRecord)> {
        let mut tx = self.db_pool.begin().await?;

        let flow = sqlx::query_as::<_, Flow>(&format!(
            r#"
            INSERT INTO flows (id, workflow_name, leaving_request_id, started_at, executed_by_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (leaving_request_id) DO NOTHING
            RETURNING {}
            "#,
            FLOW_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&new_flow.workflow_name)
        .bind(new_flow.leaving_request_id)
        .bind(new_flow.started_at)
        .bind(new_flow.executed_by)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::FlowAlreadyExists(new_flow.leaving_request_id))?;

        let record = insert_record(&mut tx, flow.id, new_flow.start, new_flow.started_at).await?;
        tx.commit().await?;

        Ok((flow, record))
    }

    async fn flow(&self, flow_id: Uuid) -> StoreResult<Option<Flow>> {
        let flow = sqlx::query_as::<_, Flow>(&format!("SELECT {} FROM flows WHERE id = $1", FLOW_COLUMNS))
            .bind(flow_id)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(flow)
    }

    async fn flow_for_leaving_request(&self, leaving_request_id: Uuid) -> StoreResult<Option<Flow>> {
        let flow = sqlx::query_as::<_, Flow>(&format!(
            "SELECT {} FROM flows WHERE leaving_request_id = $1",
            FLOW_COLUMNS
        ))
        .bind(leaving_request_id)
        .fetch_optional(&self.db_pool)
        .await?;
        Ok(flow)
    }

    async fn unfinished_flows(&self) -> StoreResult<Vec<Flow>> {
        let flows = sqlx::query_as::<_, Flow>(&format!(
            "SELECT {} FROM flows WHERE finished_at IS NULL ORDER BY started_at",
            FLOW_COLUMNS
        ))
        .fetch_all(&self.db_pool)
        .await?;
        Ok(flows)
    }

    async fn task_history(&self, flow_id: Uuid) -> StoreResult<Vec<TaskRecord>> {
        let rows = sqlx::query_as::<_, TaskRecordRow>(&format!(
            "SELECT {} FROM task_records WHERE flow_id = $1 ORDER BY started_at, sequence",
            TASK_RECORD_COLUMNS
        ))
        .bind(flow_id)
        .fetch_all(&self.db_pool)
        .await?;
        into_records(rows)
    }

    async fn next_executable(&self, flow_id: Uuid) -> StoreResult<Option<TaskRecord>> {
        let row = sqlx::query_as::<_, TaskRecordRow>(&format!(
            r#"
            SELECT {} FROM task_records
            WHERE flow_id = $1 AND executed_at IS NULL
            ORDER BY started_at, sequence
            LIMIT 1
            "#,
            TASK_RECORD_COLUMNS
        ))
        .bind(flow_id)
        .fetch_optional(&self.db_pool)
        .await?;
        row.map(TaskRecord::try_from).transpose()
    }

    async fn unexecuted_count(&self, flow_id: Uuid) -> StoreResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM task_records WHERE flow_id = $1 AND executed_at IS NULL")
                .bind(flow_id)
                .fetch_one(&self.db_pool)
                .await?;
        Ok(count)
    }

    async fn claim(&self, record_id: Uuid) -> StoreResult<Box<dyn TaskClaim>> {
        let mut tx = self.db_pool.begin().await?;

        // Blocks while another worker holds the record.
        let row = sqlx::query_as::<_, TaskRecordRow>(&format!(
            "SELECT {} FROM task_records WHERE id = $1 FOR UPDATE",
            TASK_RECORD_COLUMNS
        ))
        .bind(record_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::RecordNotFound(record_id))?;

        if row.executed_at.is_some() {
            tx.rollback().await?;
            return Err(StoreError::AlreadyExecuted(record_id));
        }

        Ok(Box::new(PgTaskClaim {
            tx: Some(tx),
            record: row.try_into()?,
        }))
    }

    async fn finish_if_complete(&self, flow_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE flows f SET finished_at = $2
            WHERE f.id = $1
              AND f.finished_at IS NULL
              AND NOT EXISTS (
                  SELECT 1 FROM task_records t WHERE t.flow_id = f.id AND t.executed_at IS NULL
              )
              AND (
                  SELECT cardinality(t.targets) FROM task_records t
                  WHERE t.flow_id = f.id AND t.executed_at IS NOT NULL
                  ORDER BY t.executed_at DESC, t.sequence DESC
                  LIMIT 1
              ) = 0
            "#,
        )
        .bind(flow_id)
        .bind(at)
        .execute(&self.db_pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn append_notification(&self, entry: NewNotification) -> StoreResult<NotificationOutcome> {
        let logged = sqlx::query_as::<_, NotificationLogEntry>(&format!(
            r#"
            INSERT INTO notification_log
                (id, flow_id, task_name, email_id, channel_id, reference, note, sent_at, sent_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT ON CONSTRAINT notification_log_once_per_day DO NOTHING
            RETURNING {}
            "#,
            NOTIFICATION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(entry.flow_id)
        .bind(&entry.task_name)
        .bind(&entry.email_id)
        .bind(&entry.channel_id)
        .bind(&entry.reference)
        .bind(&entry.note)
        .bind(entry.sent_at)
        .bind(entry.sent_at.date_naive())
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(match logged {
            Some(logged) => NotificationOutcome::Recorded(logged),
            None => {
                debug!(
                    "Notification {:?} already logged today for flow {}",
                    entry.email_id, entry.flow_id
                );
                NotificationOutcome::Duplicate
            }
        })
    }

    async fn notifications(&self, flow_id: Uuid) -> StoreResult<Vec<NotificationLogEntry>> {
        let entries = sqlx::query_as::<_, NotificationLogEntry>(&format!(
            "SELECT {} FROM notification_log WHERE flow_id = $1 ORDER BY sent_at",
            NOTIFICATION_COLUMNS
        ))
        .bind(flow_id)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(entries)
    }

    async fn delete_flow(&self, flow_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM flows WHERE id = $1")
            .bind(flow_id)
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Holds the `FOR UPDATE` lock until settled. Dropping it unsettled rolls back.
struct PgTaskClaim {
    tx: Option<Transaction<'static, Postgres>>,
    record: TaskRecord,
}

impl PgTaskClaim {
    fn settle(&mut self) -> StoreResult<Transaction<'static, Postgres>> {
        self.tx.take().ok_or(StoreError::ClaimSettled(self.record.id))
    }
}

#[async_trait]
impl TaskClaim for PgTaskClaim {
    fn record(&self) -> &TaskRecord {
        &self.record
    }

    async fn mark_executed(&mut self, completion: Completion) -> StoreResult<Vec<TaskRecord>> {
        let mut tx = self.settle()?;
        let flow_id = self.record.flow_id;
        let executed_at = completion.executed_at.max(self.record.started_at);
        let done = completes_step(&self.record.step_id, &completion.targets);

        sqlx::query(
            r#"
            UPDATE task_records
            SET executed_at = $2, executed_by_id = $3, done = $4, targets = $5, note = COALESCE($6, note)
            WHERE id = $1
            "#,
        )
        .bind(self.record.id)
        .bind(executed_at)
        .bind(completion.executed_by)
        .bind(done)
        .bind(&completion.targets)
        .bind(&completion.note)
        .execute(&mut *tx)
        .await?;

        let mut created = Vec::with_capacity(completion.successors.len());
        for successor in completion.successors {
            created.push(insert_record(&mut tx, flow_id, successor, executed_at).await?);
        }

        if completion.targets.is_empty() {
            let pending: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM task_records WHERE flow_id = $1 AND executed_at IS NULL")
                    .bind(flow_id)
                    .fetch_one(&mut *tx)
                    .await?;
            if pending == 0 {
                sqlx::query("UPDATE flows SET finished_at = $2 WHERE id = $1 AND finished_at IS NULL")
                    .bind(flow_id)
                    .bind(executed_at)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;

        self.record.executed_at = Some(executed_at);
        self.record.executed_by_id = completion.executed_by;
        self.record.done = done;
        self.record.targets = completion.targets;
        if completion.note.is_some() {
            self.record.note = completion.note;
        }
        Ok(created)
    }

    async fn fail(&mut self, note: String) -> StoreResult<()> {
        let mut tx = self.settle()?;
        sqlx::query("UPDATE task_records SET note = $2 WHERE id = $1")
            .bind(self.record.id)
            .bind(&note)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.record.note = Some(note);
        Ok(())
    }

    async fn release(&mut self) -> StoreResult<()> {
        self.settle()?.rollback().await?;
        Ok(())
    }
}
