//! DI "Interfaces"

use crate::core::calendar::{CalendarEvent, CalendarPayload};
use crate::core::errors::SchedulingError;
use crate::core::interpreter::Interpretation;
use crate::core::orchestrator::{MessageOutcome, PauseStatus};
use crate::core::scheduler::NewAppointment;
use crate::core::services::SessionUpdate;
use crate::infrastructure::entities;
use crate::infrastructure::entities::{AppointmentType, MessageRole, SessionWithHistory};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

/// Durable per-client dialogue state and history.
#[async_trait]
pub trait ConversationService: Send + Sync {
    /// Loads the session for the phone with its recent history, creating it on first contact.
    async fn find_or_create_by_phone(&self, phone: &str) -> sqlx::Result<SessionWithHistory>;

    /// Applies the fields present in `update`.
    ///
    /// Returns `RowNotFound` if the session no longer exists.
    async fn update_session(
        &self,
        session_id: Uuid,
        update: SessionUpdate,
    ) -> sqlx::Result<entities::ConversationSession>;

    async fn append_message(
        &self,
        session_id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> sqlx::Result<entities::ConversationMessage>;

    /// Deletes the session and its messages. Returns `false` if there was none.
    async fn clear(&self, phone: &str) -> sqlx::Result<bool>;

    /// Pauses the bot for the phone, creating the session if needed.
    ///
    /// Returns the instant the pause ends.
    async fn pause(&self, phone: &str, duration: Duration, reason: &str)
    -> sqlx::Result<DateTime<Utc>>;

    async fn unpause(&self, phone: &str) -> sqlx::Result<()>;

    /// Expired pauses are cleared as a side effect of this check.
    async fn is_paused(&self, phone: &str) -> sqlx::Result<bool>;

    /// Whole minutes left, rounded up; `None` when not paused.
    async fn pause_remaining_minutes(&self, phone: &str) -> sqlx::Result<Option<i64>>;
}

/// Converts history plus the current message into a structured interpretation.
///
/// Never fails: unreachable or confused services produce [`Interpretation::fallback`].
#[async_trait]
pub trait LanguageInterpreter: Send + Sync {
    async fn interpret(&self, session: &SessionWithHistory, message: &str) -> Interpretation;
}

#[async_trait]
pub trait CalendarSync: Send + Sync {
    async fn create_event(&self, payload: &CalendarPayload) -> Option<CalendarEvent>;

    async fn update_event(&self, event_id: &str, payload: &CalendarPayload)
    -> Option<CalendarEvent>;

    async fn delete_event(&self, event_id: &str) -> bool;

    /// Advisory only; `true` whenever the calendar can't answer.
    async fn is_free(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool;
}

#[async_trait]
pub trait SchedulingService: Send + Sync {
    /// Validates, persists, then mirrors the appointment into the calendar.
    async fn create_appointment(
        &self,
        request: NewAppointment,
    ) -> Result<entities::Appointment, SchedulingError>;

    async fn cancel_appointment(
        &self,
        id: Uuid,
        editor: &str,
    ) -> Result<entities::Appointment, SchedulingError>;

    /// Moves an appointment by replacing it with a new row and a new calendar event.
    async fn reschedule_appointment(
        &self,
        id: Uuid,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        editor: &str,
    ) -> Result<entities::Appointment, SchedulingError>;

    /// Free hourly slots (`HH:MM`) for the local date and track.
    async fn available_slots(
        &self,
        date: NaiveDate,
        appointment_type: AppointmentType,
    ) -> Result<Vec<String>, SchedulingError>;

    /// Runs the business rules without booking anything.
    async fn validate_slot(
        &self,
        appointment_type: AppointmentType,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<(), SchedulingError>;

    async fn find_active_by_phone(
        &self,
        phone: &str,
    ) -> Result<Option<entities::Appointment>, SchedulingError>;

    async fn get_appointment(&self, id: Uuid) -> Result<entities::Appointment, SchedulingError>;

    async fn list_appointments(
        &self,
        appointment_type: Option<AppointmentType>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<entities::Appointment>, SchedulingError>;

    /// Retries the calendar mirror for one appointment.
    async fn sync_calendar(&self, id: Uuid) -> Result<entities::Appointment, SchedulingError>;

    async fn calendar_is_free(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool;
}

/// Entry points used by the messaging transport and the operator API.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Answers one inbound client message. Never fails.
    async fn process_message(&self, phone: &str, message: &str) -> MessageOutcome;

    async fn clear_history(&self, phone: &str) -> anyhow::Result<()>;

    async fn pause(&self, phone: &str, duration: Duration, reason: &str) -> anyhow::Result<()>;

    async fn unpause(&self, phone: &str) -> anyhow::Result<()>;

    async fn pause_status(&self, phone: &str) -> anyhow::Result<PauseStatus>;

    /// A human operator wrote to the client; the bot steps aside.
    async fn handle_operator_message(&self, phone: &str) -> anyhow::Result<()>;
}
