use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use leavers_backend::calendar::{self, Calendar, SystemClock};
use leavers_backend::config::Config;
use leavers_backend::database;
use leavers_backend::jobs::{JobConfig, JobScheduler};
use leavers_backend::services::{Adapters, PgLeavingRequests};
use leavers_backend::store::PgFlowStore;
use leavers_backend::workflows::{TaskServices, WorkflowCatalogue, WorkflowEngine, default_registry, leaving_workflow};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url).await?;

    database::migrate(&db_pool).await?;

    let clock = Arc::new(SystemClock);
    let calendar = Arc::new(match &config.bank_holidays {
        Some(holidays) => Calendar::new(clock, holidays.iter().copied()),
        None => Calendar::new(clock, calendar::holidays::england_and_wales()),
    });

    let store = Arc::new(PgFlowStore::new(db_pool.clone()));
    let leaving_requests = Arc::new(PgLeavingRequests::new(db_pool.clone()));
    let services = TaskServices::new(
        Adapters::stubs(),
        store,
        calendar,
        config.notifications.clone(),
    );

    let catalogue = WorkflowCatalogue::new().with(leaving_workflow(&config.notifications)?)?;
    let engine = Arc::new(WorkflowEngine::new(
        leaving_requests,
        default_registry()?,
        catalogue,
        services,
        &config.engine,
    )?);

    let mut scheduler = JobScheduler::new(engine, JobConfig::from(&config.engine)).await?;
    scheduler.start().await?;
    tracing::info!("Leavers workflow engine running");

    tokio::signal::ctrl_c().await?;
    scheduler.shutdown().await?;
    tracing::info!("Leavers workflow engine stopped");

    Ok(())
}
