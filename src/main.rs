//! Scheduling assistant server

use chat_appointment_scheduler::api;
use chat_appointment_scheduler::core::calendar::GoogleCalendarSync;
use chat_appointment_scheduler::core::clock::SystemClock;
use chat_appointment_scheduler::core::interpreter::LlmInterpreter;
use chat_appointment_scheduler::core::locks::KeyedLocks;
use chat_appointment_scheduler::core::orchestrator::DialogueOrchestrator;
use chat_appointment_scheduler::core::scheduler::AppointmentScheduler;
use chat_appointment_scheduler::core::services::ConversationStore;
use chat_appointment_scheduler::infrastructure::database::DatabaseConnection;
use chat_appointment_scheduler::infrastructure::repositories::{
    DbAppointmentRepository, DbConversationRepository,
};
use chat_appointment_scheduler::infrastructure::settings::Settings;

use anyhow::{Context, anyhow};
use axum::http::{HeaderValue, Method};
use di::{Injectable, ServiceCollection, ServiceProvider};
use di_axum::RouterServiceProviderExtensions;
use log::{info, warn};
use tokio::runtime::{Builder, Runtime};
use tower_http::cors::{Any, CorsLayer};

fn main() -> anyhow::Result<()> {
    // initialize tracing
    tracing_subscriber::fmt::init();

    // fail fast on malformed configuration before anything starts
    let settings = Settings::from_env()?;

    let runtime: Runtime = Builder::new_multi_thread().enable_all().build()?;

    let provider = ServiceCollection::new()
        .add(Settings::singleton())
        .add(DatabaseConnection::singleton())
        .add(KeyedLocks::singleton())
        .add(SystemClock::singleton())
        .add(LlmInterpreter::singleton())
        .add(GoogleCalendarSync::singleton())
        .add(DbConversationRepository::scoped())
        .add(DbAppointmentRepository::scoped())
        .add(ConversationStore::scoped())
        .add(AppointmentScheduler::scoped())
        .add(DialogueOrchestrator::scoped())
        .build_provider()
        .map_err(|e| anyhow!("invalid service registrations: {e}"))?;

    runtime.block_on(async {
        provider
            .get_required::<DatabaseConnection>()
            .migrate()
            .await
            .context("database migration failed")?;

        let telegram_task = tokio::spawn(api::telegram::run(
            settings.telegram.clone(),
            provider.clone(),
        ));

        let served = web_server_task(&settings, provider).await;
        if served.is_err() {
            telegram_task.abort();
        }
        served
    })
}

async fn web_server_task(settings: &Settings, provider: ServiceProvider) -> anyhow::Result<()> {
    if settings.llm.api_key.is_none() {
        warn!("LLM_API_KEY not set, the assistant will only answer with the fallback reply");
    }
    if settings.calendar.access_token.is_none() {
        warn!("CALENDAR_ACCESS_TOKEN not set, calendar sync disabled");
    }

    let app = api::router()
        .layer(
            CorsLayer::new()
                .allow_headers(Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                .allow_origin([
                    HeaderValue::from_static("http://localhost:3000"),
                    HeaderValue::from_static("http://localhost:5173"),
                ]),
        )
        .with_provider(provider);

    let listener = tokio::net::TcpListener::bind(&settings.bind_address)
        .await
        .with_context(|| format!("cannot bind {}", settings.bind_address))?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    info!("Shutting down...");
    Ok(())
}
