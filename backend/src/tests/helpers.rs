// Test harness - an engine over the in-memory store, a manual clock and stub adapters

use chrono::{DateTime, Duration, Utc};
use leavers_shared::{Flow, LeavingRequest, NotificationLogEntry, TaskRecord};
use std::sync::{Arc, Once};
use uuid::Uuid;

use super::fixtures::{self, LeavingRequestFixture};
use crate::calendar::{self, Calendar, ManualClock};
use crate::config::{EngineConfig, NotificationSettings};
use crate::services::{
    Adapters, ChatAdapter, EmailAdapter, MemoryLeavingRequests, StubChat, StubDirectory, StubEmail, StubIndex, StubPayroll,
    StubTickets,
};
use crate::store::{FlowStore, MemoryFlowStore};
use crate::workflows::{
    LEAVING_WORKFLOW, Task, TaskServices, TickReport, Workflow, WorkflowCatalogue, WorkflowEngine, default_registry,
    leaving_workflow,
};

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init()
            .ok();
    });
}

pub struct TestHarness {
    pub engine: Arc<WorkflowEngine>,
    pub store: MemoryFlowStore,
    pub leaving_requests: Arc<MemoryLeavingRequests>,
    pub clock: Arc<ManualClock>,
    pub calendar: Arc<Calendar>,
    pub email: Arc<StubEmail>,
    pub chat: Arc<StubChat>,
    pub payroll: Arc<StubPayroll>,
    pub tickets: Arc<StubTickets>,
    pub directory: Arc<StubDirectory>,
    pub index: Arc<StubIndex>,
}

pub struct HarnessBuilder {
    now: DateTime<Utc>,
    workflows: Vec<Workflow>,
    leaving: bool,
    tasks: Vec<(String, Arc<dyn Task>)>,
    config: EngineConfig,
    settings: NotificationSettings,
    email: Option<Arc<dyn EmailAdapter>>,
    directory: StubDirectory,
    chat: bool,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            // Monday
            now: fixtures::at(2024, 6, 3, 10),
            workflows: Vec::new(),
            leaving: true,
            tasks: Vec::new(),
            config: EngineConfig::default(),
            settings: fixtures::notification_settings(),
            email: None,
            directory: StubDirectory::permissive(),
            chat: true,
        }
    }
}

impl HarnessBuilder {
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Loads `workflow` alongside, or instead of, the leaving workflow.
    pub fn workflow(mut self, workflow: Workflow) -> Self {
        self.workflows.push(workflow);
        self
    }

    pub fn without_leaving_workflow(mut self) -> Self {
        self.leaving = false;
        self
    }

    pub fn task(mut self, name: &str, task: Arc<dyn Task>) -> Self {
        self.tasks.push((name.to_string(), task));
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn settings(mut self, settings: NotificationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn email(mut self, email: Arc<dyn EmailAdapter>) -> Self {
        self.email = Some(email);
        self
    }

    pub fn directory(mut self, directory: StubDirectory) -> Self {
        self.directory = directory;
        self
    }

    pub fn without_chat(mut self) -> Self {
        self.chat = false;
        self
    }

    pub fn build(self) -> TestHarness {
        init_test_logging();

        let clock = Arc::new(ManualClock::new(self.now));
        let calendar = Arc::new(Calendar::new(clock.clone(), calendar::holidays::england_and_wales()));
        let store = MemoryFlowStore::new();
        let leaving_requests = Arc::new(MemoryLeavingRequests::default());

        let email = Arc::new(StubEmail::default());
        let chat = Arc::new(StubChat::default());
        let payroll = Arc::new(StubPayroll::default());
        let tickets = Arc::new(StubTickets::default());
        let directory = Arc::new(self.directory);
        let index = Arc::new(StubIndex::default());

        let email_adapter: Arc<dyn EmailAdapter> = match self.email {
            Some(adapter) => adapter,
            None => email.clone(),
        };
        let chat_adapter: Option<Arc<dyn ChatAdapter>> = if self.chat {
            Some(chat.clone())
        } else {
            None
        };
        let adapters = Adapters {
            email: email_adapter,
            chat: chat_adapter,
            payroll: payroll.clone(),
            tickets: tickets.clone(),
            directory: directory.clone(),
            index: Some(index.clone()),
        };

        let mut registry = default_registry().expect("default tasks register");
        for (name, task) in self.tasks {
            registry.register(&name, task).expect("test task registers");
        }

        let mut catalogue = WorkflowCatalogue::new();
        if self.leaving {
            catalogue
                .add(leaving_workflow(&self.settings).expect("leaving workflow is valid"))
                .expect("leaving workflow loads");
        }
        for workflow in self.workflows {
            catalogue.add(workflow).expect("test workflow loads");
        }

        let shared_store: Arc<dyn FlowStore> = Arc::new(store.clone());
        let services = TaskServices::new(adapters, shared_store, calendar.clone(), self.settings);
        let engine = WorkflowEngine::new(
            leaving_requests.clone(),
            registry,
            catalogue,
            services,
            &self.config,
        )
        .expect("engine builds");

        TestHarness {
            engine: Arc::new(engine),
            store,
            leaving_requests,
            clock,
            calendar,
            email,
            chat,
            payroll,
            tickets,
            directory,
            index,
        }
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    pub fn add_leaver(&self, fixture: &LeavingRequestFixture) -> LeavingRequest {
        let request = fixture.build();
        self.leaving_requests.insert(request.clone());
        request
    }

    /// Adds a leaver and starts `workflow_name` for them.
    pub async fn start(&self, workflow_name: &str, fixture: &LeavingRequestFixture) -> Flow {
        let request = self.add_leaver(fixture);
        self.engine
            .start_flow(workflow_name, request.id, Uuid::new_v4())
            .await
            .expect("flow starts")
    }

    pub async fn start_leaving(&self, fixture: &LeavingRequestFixture) -> Flow {
        self.start(LEAVING_WORKFLOW, fixture).await
    }

    pub async fn tick(&self) -> TickReport {
        self.engine.tick(None).await.expect("tick runs")
    }

    /// Ticks until a tick completes no step beyond re-running waiting ones.
    pub async fn settle(&self) {
        let mut seen = self.progress().await;
        for _ in 0..20 {
            self.tick().await;
            let now = self.progress().await;
            if now == seen {
                return;
            }
            seen = now;
        }
    }

    async fn progress(&self) -> usize {
        let flows = self.store.unfinished_flows().await.expect("flows load");
        let mut progressed = 0;
        for flow in &flows {
            progressed += self
                .history(flow)
                .await
                .iter()
                .filter(|r| r.is_executed() && !r.is_self_loop())
                .count();
        }
        progressed
    }

    /// Advances the clock by whole days, ticking once on each.
    pub async fn tick_daily(&self, days: i64) {
        for _ in 0..days {
            self.clock.advance(Duration::days(1));
            self.settle().await;
        }
    }

    pub async fn history(&self, flow: &Flow) -> Vec<TaskRecord> {
        self.store.task_history(flow.id).await.expect("history loads")
    }

    pub async fn notifications(&self, flow: &Flow) -> Vec<NotificationLogEntry> {
        self.store.notifications(flow.id).await.expect("log loads")
    }

    pub async fn flow(&self, flow: &Flow) -> Flow {
        self.store
            .flow(flow.id)
            .await
            .expect("flow loads")
            .expect("flow exists")
    }

    pub fn update_leaver(&self, id: Uuid, change: impl FnOnce(&mut LeavingRequest)) {
        assert!(self.leaving_requests.update(id, change), "unknown leaving request {}", id);
    }
}

pub fn executed_steps(history: &[TaskRecord]) -> Vec<&str> {
    history
        .iter()
        .filter(|r| r.is_executed())
        .map(|r| r.step_id.as_str())
        .collect()
}

pub fn pending_steps(history: &[TaskRecord]) -> Vec<&str> {
    history
        .iter()
        .filter(|r| !r.is_executed())
        .map(|r| r.step_id.as_str())
        .collect()
}

pub fn logged_email_ids(log: &[NotificationLogEntry]) -> Vec<&str> {
    log.iter().filter_map(|entry| entry.email_id.as_deref()).collect()
}
