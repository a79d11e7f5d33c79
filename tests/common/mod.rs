//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chat_appointment_scheduler::core::calendar::{CalendarEvent, CalendarPayload};
use chat_appointment_scheduler::core::clock::Clock;
use chat_appointment_scheduler::core::interpreter::{Interpretation, Intent, Slots};
use chat_appointment_scheduler::core::locks::KeyedLocks;
use chat_appointment_scheduler::core::orchestrator::DialogueOrchestrator;
use chat_appointment_scheduler::core::scheduler::AppointmentScheduler;
use chat_appointment_scheduler::core::services::ConversationStore;
use chat_appointment_scheduler::core::traits::{CalendarSync, LanguageInterpreter};
use chat_appointment_scheduler::infrastructure::database::DatabaseConnection;
use chat_appointment_scheduler::infrastructure::entities::{AppointmentType, SessionWithHistory};
use chat_appointment_scheduler::infrastructure::repositories::{
    DbAppointmentRepository, DbConversationRepository,
};
use chat_appointment_scheduler::infrastructure::settings::Settings;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use di::Ref;
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// Counter for unique test database URIs
static TEST_DB_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Setup test database with migrations and returns pool
/// Uses in-memory SQLite for test isolation
pub async fn setup_test_db() -> SqlitePool {
    let db_num = TEST_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    // Use file URI format with shared cache - each test gets a unique DB
    let db_url = format!("sqlite:file:testdb{}?mode=memory&cache=shared", db_num);

    let pool = SqlitePool::connect(&db_url).await.unwrap();
    sqlx::migrate!().run(&pool).await.unwrap();
    pool
}

pub fn offset() -> FixedOffset {
    FixedOffset::west_opt(3 * 3600).unwrap()
}

/// Instant at the given local business time.
pub fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    offset()
        .with_ymd_and_hms(y, m, d, h, min, 0)
        .unwrap()
        .with_timezone(&Utc)
}

/// Monday 2025-10-13, 09:00 in the store's timezone.
pub fn monday_morning() -> DateTime<Utc> {
    local(2025, 10, 13, 9, 0)
}

pub fn tuesday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 10, 14).unwrap()
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> ManualClock {
        ManualClock {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Answers with queued interpretations, then with the fallback.
#[derive(Default)]
pub struct ScriptedInterpreter {
    script: Mutex<VecDeque<Interpretation>>,
    pub seen: Mutex<Vec<(String, usize)>>,
}

impl ScriptedInterpreter {
    pub fn push(&self, interpretation: Interpretation) {
        self.script.lock().unwrap().push_back(interpretation);
    }

    pub fn say(&self, reply: &str, intent: Intent, slots: Slots) {
        self.push(Interpretation::new(reply, intent, slots));
    }
}

#[async_trait]
impl LanguageInterpreter for ScriptedInterpreter {
    async fn interpret(&self, session: &SessionWithHistory, message: &str) -> Interpretation {
        self.seen
            .lock()
            .unwrap()
            .push((message.to_owned(), session.messages.len()));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Interpretation::fallback)
    }
}

/// In-memory calendar that always succeeds and remembers what it was asked.
#[derive(Default)]
pub struct RecordingCalendar {
    pub created: Mutex<Vec<CalendarPayload>>,
    pub updated: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
    pub busy: Mutex<bool>,
}

#[async_trait]
impl CalendarSync for RecordingCalendar {
    async fn create_event(&self, payload: &CalendarPayload) -> Option<CalendarEvent> {
        let mut created = self.created.lock().unwrap();
        created.push(payload.clone());
        let meeting_link = (payload.appointment_type == AppointmentType::Online)
            .then(|| format!("https://meet.google.com/test-{}", created.len()));
        Some(CalendarEvent {
            id: format!("evt-{}", created.len()),
            meeting_link,
        })
    }

    async fn update_event(&self, event_id: &str, _payload: &CalendarPayload) -> Option<CalendarEvent> {
        self.updated.lock().unwrap().push(event_id.to_owned());
        Some(CalendarEvent {
            id: event_id.to_owned(),
            meeting_link: None,
        })
    }

    async fn delete_event(&self, event_id: &str) -> bool {
        self.deleted.lock().unwrap().push(event_id.to_owned());
        true
    }

    async fn is_free(&self, _start: DateTime<Utc>, _end: DateTime<Utc>) -> bool {
        !*self.busy.lock().unwrap()
    }
}

/// Calendar that is down.
pub struct FailingCalendar;

#[async_trait]
impl CalendarSync for FailingCalendar {
    async fn create_event(&self, _payload: &CalendarPayload) -> Option<CalendarEvent> {
        None
    }

    async fn update_event(&self, _event_id: &str, _payload: &CalendarPayload) -> Option<CalendarEvent> {
        None
    }

    async fn delete_event(&self, _event_id: &str) -> bool {
        false
    }

    async fn is_free(&self, _start: DateTime<Utc>, _end: DateTime<Utc>) -> bool {
        true
    }
}

/// Services wired by hand over one test database.
pub struct Harness {
    pub pool: SqlitePool,
    pub clock: Ref<ManualClock>,
    pub interpreter: Ref<ScriptedInterpreter>,
    pub settings: Ref<Settings>,
    pub locks: Ref<KeyedLocks>,
    pub conversations: Ref<ConversationStore>,
    pub scheduler: Ref<AppointmentScheduler>,
    pub orchestrator: DialogueOrchestrator,
}

impl Harness {
    pub async fn new(calendar: Ref<dyn CalendarSync>) -> Harness {
        Harness::with_settings(calendar, Settings::defaults()).await
    }

    pub async fn with_settings(calendar: Ref<dyn CalendarSync>, settings: Settings) -> Harness {
        let pool = setup_test_db().await;
        let connection = Ref::new(DatabaseConnection::from_pool(pool.clone()));
        let clock = Ref::new(ManualClock::new(monday_morning()));
        let interpreter = Ref::new(ScriptedInterpreter::default());
        let settings = Ref::new(settings);
        let locks = Ref::new(KeyedLocks::default());

        let conversations = Ref::new(ConversationStore::new(
            Ref::new(DbConversationRepository::new(connection.clone())),
            clock.clone(),
            settings.clone(),
        ));
        let scheduler = Ref::new(AppointmentScheduler::new(
            Ref::new(DbAppointmentRepository::new(connection)),
            calendar,
            locks.clone(),
            clock.clone(),
            settings.clone(),
        ));
        let orchestrator = DialogueOrchestrator::new(
            conversations.clone(),
            interpreter.clone(),
            scheduler.clone(),
            locks.clone(),
            clock.clone(),
            settings.clone(),
        );

        Harness {
            pool,
            clock,
            interpreter,
            settings,
            locks,
            conversations,
            scheduler,
            orchestrator,
        }
    }
}
