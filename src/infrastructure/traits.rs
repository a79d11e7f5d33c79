//! Infrastructure traits, used for DI on higher levels

use crate::infrastructure::entities;
use crate::infrastructure::entities::{AppointmentType, MessageRole};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_session_by_phone(
        &self,
        phone: &str,
    ) -> sqlx::Result<Option<entities::ConversationSession>>;

    async fn get_session(&self, session_id: Uuid)
    -> sqlx::Result<Option<entities::ConversationSession>>;

    /// Inserts the session, or returns the existing row when the phone is taken.
    async fn create_session(
        &self,
        session: entities::ConversationSession,
    ) -> sqlx::Result<entities::ConversationSession>;

    /// Writes the dialogue columns of the session back. Pause columns are only
    /// touched by [`ConversationRepository::set_pause`].
    async fn save_session(
        &self,
        session: &entities::ConversationSession,
    ) -> sqlx::Result<entities::ConversationSession>;

    async fn delete_session_by_phone(&self, phone: &str) -> sqlx::Result<u64>;

    async fn set_pause(
        &self,
        phone: &str,
        paused_until: Option<DateTime<Utc>>,
        paused_by: Option<String>,
        now: DateTime<Utc>,
    ) -> sqlx::Result<u64>;

    /// The newest `limit` messages of the session, oldest first.
    async fn recent_messages(
        &self,
        session_id: Uuid,
        limit: usize,
    ) -> sqlx::Result<Vec<entities::ConversationMessage>>;

    async fn create_message(
        &self,
        session_id: Uuid,
        role: MessageRole,
        content: String,
        created_at: DateTime<Utc>,
    ) -> sqlx::Result<entities::ConversationMessage>;
}

#[async_trait]
pub trait AppointmentRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> sqlx::Result<Option<entities::Appointment>>;

    async fn list_overlapping(
        &self,
        appointment_type: Option<AppointmentType>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> sqlx::Result<Vec<entities::Appointment>>;

    /// Counts non-cancelled appointments of the track intersecting `[start, end)`.
    async fn count_conflicts(
        &self,
        appointment_type: AppointmentType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> sqlx::Result<i64>;

    async fn insert(&self, appointment: entities::Appointment)
    -> sqlx::Result<entities::Appointment>;

    /// Deletes `old_id` and inserts `replacement` in one transaction.
    async fn replace(
        &self,
        old_id: Uuid,
        replacement: entities::Appointment,
    ) -> sqlx::Result<entities::Appointment>;

    /// Returns `None` when the appointment is missing or already cancelled.
    async fn mark_cancelled(
        &self,
        id: Uuid,
        editor: &str,
        now: DateTime<Utc>,
    ) -> sqlx::Result<Option<entities::Appointment>>;

    async fn record_calendar_sync(
        &self,
        id: Uuid,
        event_id: &str,
        meeting_link: Option<String>,
        synced_at: DateTime<Utc>,
    ) -> sqlx::Result<entities::Appointment>;

    /// Earliest scheduled or confirmed appointment for the phone starting at or after `now`.
    async fn find_active_by_phone(
        &self,
        phone: &str,
        now: DateTime<Utc>,
    ) -> sqlx::Result<Option<entities::Appointment>>;
}
