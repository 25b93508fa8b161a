// Stub adapters - succeed without side effects and remember what they were asked

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::info;

use super::{
    AdapterError, AdapterResult, ChatAdapter, ChatReceipt, DirectoryAdapter, DirectoryKey, DirectoryRecord,
    EmailAdapter, EmailConfirmation, IndexAdapter, IndexDocument, LeavingData, NewTicket, PayrollAdapter,
    PayrollConfirmation, Personalisation, TicketAdapter,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub recipient: String,
    pub template_id: String,
    pub personalisation: Personalisation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPost {
    pub channel_id: String,
    pub text: String,
    pub thread_ref: Option<String>,
    pub ts: String,
}

#[derive(Debug, Default)]
pub struct StubEmail {
    sent: Mutex<Vec<SentEmail>>,
    unavailable: AtomicBool,
}

impl StubEmail {
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn sent_to(&self, recipient: &str) -> Vec<SentEmail> {
        self.sent()
            .into_iter()
            .filter(|email| email.recipient == recipient)
            .collect()
    }

    /// Make every following send fail as if the notify service were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmailAdapter for StubEmail {
    async fn send(
        &self,
        recipient: &str,
        template_id: &str,
        personalisation: &Personalisation,
    ) -> AdapterResult<EmailConfirmation> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AdapterError::Unavailable {
                service: "email".to_string(),
                message: "stub marked unavailable".to_string(),
            });
        }

        info!("Stub email: template {} to {}", template_id, recipient);
        let mut sent = self.sent.lock().unwrap_or_else(|e| e.into_inner());
        sent.push(SentEmail {
            recipient: recipient.to_string(),
            template_id: template_id.to_string(),
            personalisation: personalisation.clone(),
        });
        Ok(EmailConfirmation {
            id: format!("stub-email-{}", sent.len()),
        })
    }
}

#[derive(Debug, Default)]
pub struct StubChat {
    posts: Mutex<Vec<ChatPost>>,
    counter: AtomicU64,
}

impl StubChat {
    pub fn posts(&self) -> Vec<ChatPost> {
        self.posts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ChatAdapter for StubChat {
    async fn post(&self, channel_id: &str, text: &str, thread_ref: Option<&str>) -> AdapterResult<ChatReceipt> {
        let ts = format!("{}.000100", 1_700_000_000 + self.counter.fetch_add(1, Ordering::SeqCst));
        info!("Stub chat: post to {} (thread {:?})", channel_id, thread_ref);
        self.posts.lock().unwrap_or_else(|e| e.into_inner()).push(ChatPost {
            channel_id: channel_id.to_string(),
            text: text.to_string(),
            thread_ref: thread_ref.map(str::to_string),
            ts: ts.clone(),
        });
        Ok(ChatReceipt { ts })
    }
}

#[derive(Debug, Default)]
pub struct StubPayroll {
    submissions: Mutex<Vec<LeavingData>>,
}

impl StubPayroll {
    pub fn submissions(&self) -> Vec<LeavingData> {
        self.submissions.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl PayrollAdapter for StubPayroll {
    async fn submit(&self, leaving_data: &LeavingData) -> AdapterResult<PayrollConfirmation> {
        info!("Stub payroll: submit leaver {}", leaving_data.leaver_email);
        let mut submissions = self.submissions.lock().unwrap_or_else(|e| e.into_inner());
        submissions.push(leaving_data.clone());
        Ok(PayrollConfirmation {
            reference: format!("stub-payroll-{}", submissions.len()),
        })
    }
}

#[derive(Debug, Default)]
pub struct StubTickets {
    opened: Mutex<Vec<NewTicket>>,
}

impl StubTickets {
    pub fn opened(&self) -> Vec<NewTicket> {
        self.opened.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl TicketAdapter for StubTickets {
    async fn open(&self, ticket: &NewTicket) -> AdapterResult<String> {
        info!("Stub tickets: open '{}' for {}", ticket.subject, ticket.group);
        let mut opened = self.opened.lock().unwrap_or_else(|e| e.into_inner());
        opened.push(ticket.clone());
        Ok(format!("STUB{:07}", opened.len()))
    }
}

/// Directory stub. Permissive mode answers every e-mail lookup; otherwise
/// only explicitly added records are found.
#[derive(Debug, Default)]
pub struct StubDirectory {
    records: Mutex<HashMap<DirectoryKey, DirectoryRecord>>,
    permissive: bool,
}

impl StubDirectory {
    pub fn permissive() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            permissive: true,
        }
    }

    pub fn insert(&self, record: DirectoryRecord) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(DirectoryKey::Email(record.email.clone()), record.clone());
        records.insert(DirectoryKey::Id(record.id.clone()), record);
    }
}

#[async_trait]
impl DirectoryAdapter for StubDirectory {
    async fn lookup(&self, key: &DirectoryKey) -> AdapterResult<Option<DirectoryRecord>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = records.get(key) {
            return Ok(Some(record.clone()));
        }
        match key {
            DirectoryKey::Email(email) if self.permissive => Ok(Some(DirectoryRecord {
                id: format!("stub-{}", email),
                email: email.clone(),
                name: None,
            })),
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Default)]
pub struct StubIndex {
    documents: Mutex<Vec<IndexDocument>>,
}

impl StubIndex {
    pub fn documents(&self) -> Vec<IndexDocument> {
        self.documents.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl IndexAdapter for StubIndex {
    async fn index(&self, document: &IndexDocument) -> AdapterResult<()> {
        info!("Stub index: document {}", document.id);
        self.documents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(document.clone());
        Ok(())
    }
}
