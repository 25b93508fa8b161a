// External Effect Adapters - Outbound seams consumed by task implementations
//
// Real clients for the notify, chat, payroll, service-desk, directory and
// staff-index systems live with the collaborators. The engine only sees these
// traits; `stub` provides the success-without-side-effects implementations.

pub mod leaving_requests;
pub mod stub;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub use leaving_requests::{LeavingRequestSource, MemoryLeavingRequests, PgLeavingRequests};
pub use stub::{StubChat, StubDirectory, StubEmail, StubIndex, StubPayroll, StubTickets};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("{service} unavailable: {message}")]
    Unavailable { service: String, message: String },
    #[error("{service} rejected the request: {message}")]
    Rejected { service: String, message: String },
    #[error("{0} is not configured")]
    NotConfigured(String),
}

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Template variables passed to the notify service.
pub type Personalisation = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailConfirmation {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReceipt {
    pub ts: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayrollConfirmation {
    pub reference: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTicket {
    pub subject: String,
    pub body: String,
    pub group: String,
    pub priority: TicketPriority,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DirectoryKey {
    Email(String),
    Id(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryRecord {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
}

/// What the payroll provider needs to off-board a leaver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeavingData {
    pub leaving_request_id: Uuid,
    pub leaver_name: Option<String>,
    pub leaver_email: String,
    pub manager_email: Option<String>,
    pub last_working_day: Option<NaiveDate>,
    pub leaving_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub id: String,
    pub fields: BTreeMap<String, String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailAdapter: Send + Sync {
    async fn send(
        &self,
        recipient: &str,
        template_id: &str,
        personalisation: &Personalisation,
    ) -> AdapterResult<EmailConfirmation>;
}

#[async_trait]
pub trait ChatAdapter: Send + Sync {
    /// Posts `text`, threaded under `thread_ref` when given.
    async fn post(&self, channel_id: &str, text: &str, thread_ref: Option<&str>) -> AdapterResult<ChatReceipt>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PayrollAdapter: Send + Sync {
    async fn submit(&self, leaving_data: &LeavingData) -> AdapterResult<PayrollConfirmation>;
}

#[async_trait]
pub trait TicketAdapter: Send + Sync {
    async fn open(&self, ticket: &NewTicket) -> AdapterResult<String>;
}

#[async_trait]
pub trait DirectoryAdapter: Send + Sync {
    async fn lookup(&self, key: &DirectoryKey) -> AdapterResult<Option<DirectoryRecord>>;
}

#[async_trait]
pub trait IndexAdapter: Send + Sync {
    async fn index(&self, document: &IndexDocument) -> AdapterResult<()>;
}

/// The adapter set handed to task implementations.
///
/// Chat and the staff index are optional; tasks that need them log and carry
/// on when they are absent.
#[derive(Clone)]
pub struct Adapters {
    pub email: Arc<dyn EmailAdapter>,
    pub chat: Option<Arc<dyn ChatAdapter>>,
    pub payroll: Arc<dyn PayrollAdapter>,
    pub tickets: Arc<dyn TicketAdapter>,
    pub directory: Arc<dyn DirectoryAdapter>,
    pub index: Option<Arc<dyn IndexAdapter>>,
}

impl Adapters {
    pub fn stubs() -> Self {
        Self {
            email: Arc::new(StubEmail::default()),
            chat: Some(Arc::new(StubChat::default())),
            payroll: Arc::new(StubPayroll::default()),
            tickets: Arc::new(StubTickets::default()),
            directory: Arc::new(StubDirectory::permissive()),
            index: Some(Arc::new(StubIndex::default())),
        }
    }
}
