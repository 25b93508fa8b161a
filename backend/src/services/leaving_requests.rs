// Leaving request reader - the business state pause, reminder and condition tasks inspect

use async_trait::async_trait;
use leavers_shared::LeavingRequest;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::store::StoreResult;

#[async_trait]
pub trait LeavingRequestSource: Send + Sync {
    async fn get(&self, id: Uuid) -> StoreResult<Option<LeavingRequest>>;
}

/// Reads the business `leaving_requests` table owned by the collaborating app.
#[derive(Clone)]
pub struct PgLeavingRequests {
    db_pool: PgPool,
}

impl PgLeavingRequests {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl LeavingRequestSource for PgLeavingRequests {
    async fn get(&self, id: Uuid) -> StoreResult<Option<LeavingRequest>> {
        let request = sqlx::query_as::<_, LeavingRequest>(
            r#"
            SELECT id, leaver_name, leaver_email, manager_name, manager_email,
                   last_working_day, leaving_date, is_transfer,
                   manually_offboarded_from_uksbs, is_hsfl_leaver, is_rosa_user,
                   cancelled, line_manager_complete, sre_complete,
                   security_building_pass_complete, security_rosa_kit_complete,
                   service_now_offline_complete
            FROM leaving_requests
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(request)
    }
}

#[derive(Debug, Default)]
pub struct MemoryLeavingRequests {
    requests: Mutex<HashMap<Uuid, LeavingRequest>>,
}

impl MemoryLeavingRequests {
    pub fn insert(&self, request: LeavingRequest) {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request.id, request);
    }

    /// Apply `change` to a stored request, as a collaborator's form handler would.
    pub fn update(&self, id: Uuid, change: impl FnOnce(&mut LeavingRequest)) -> bool {
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        match requests.get_mut(&id) {
            Some(request) => {
                change(request);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl LeavingRequestSource for MemoryLeavingRequests {
    async fn get(&self, id: Uuid) -> StoreResult<Option<LeavingRequest>> {
        Ok(self
            .requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned())
    }
}
