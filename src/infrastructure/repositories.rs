//! DB Repository abstractions

use crate::infrastructure::database::DatabaseConnection;
use crate::infrastructure::entities::{
    Appointment, AppointmentType, ConversationMessage, ConversationSession, MessageRole,
};
use crate::infrastructure::traits::{AppointmentRepository, ConversationRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use di::{Ref, injectable};
use log::error;
use uuid::Uuid;

#[injectable(ConversationRepository)]
pub struct DbConversationRepository {
    connection: Ref<DatabaseConnection>,
}

impl DbConversationRepository {
    pub fn new(connection: Ref<DatabaseConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl ConversationRepository for DbConversationRepository {
    async fn find_session_by_phone(&self, phone: &str) -> sqlx::Result<Option<ConversationSession>> {
        sqlx::query_as("SELECT * FROM conversation_sessions WHERE phone = ?")
            .bind(phone)
            .fetch_optional(&**self.connection)
            .await
            .inspect_err(|e| error!("{e}"))
    }

    async fn get_session(&self, session_id: Uuid) -> sqlx::Result<Option<ConversationSession>> {
        sqlx::query_as("SELECT * FROM conversation_sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&**self.connection)
            .await
            .inspect_err(|e| error!("{e}"))
    }

    async fn create_session(
        &self,
        session: ConversationSession,
    ) -> sqlx::Result<ConversationSession> {
        // a concurrent first message may have created the row already
        sqlx::query(
            "INSERT INTO conversation_sessions (id, phone, state, context, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT (phone) DO NOTHING",
        )
        .bind(session.id)
        .bind(&session.phone)
        .bind(session.state)
        .bind(&session.context)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&**self.connection)
        .await
        .inspect_err(|e| error!("{e}"))?;

        sqlx::query_as("SELECT * FROM conversation_sessions WHERE phone = ?")
            .bind(&session.phone)
            .fetch_one(&**self.connection)
            .await
            .inspect_err(|e| error!("{e}"))
    }

    async fn save_session(&self, session: &ConversationSession) -> sqlx::Result<ConversationSession> {
        sqlx::query_as(
            "UPDATE conversation_sessions SET state = ?, context = ?, client_name = ?, appointment_type = ?, service_intent = ?, scheduled_appointment_id = ?, updated_at = ? WHERE id = ? RETURNING *",
        )
        .bind(session.state)
        .bind(&session.context)
        .bind(&session.client_name)
        .bind(session.appointment_type)
        .bind(&session.service_intent)
        .bind(session.scheduled_appointment_id)
        .bind(session.updated_at)
        .bind(session.id)
        .fetch_one(&**self.connection)
        .await
        .inspect_err(|e| error!("{e}"))
    }

    async fn delete_session_by_phone(&self, phone: &str) -> sqlx::Result<u64> {
        let mut tx = self.connection.begin().await?;

        sqlx::query(
            "DELETE FROM conversation_messages WHERE session_id IN (SELECT id FROM conversation_sessions WHERE phone = ?)",
        )
        .bind(phone)
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM conversation_sessions WHERE phone = ?")
            .bind(phone)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await.inspect_err(|e| error!("{e}"))?;
        Ok(deleted)
    }

    async fn set_pause(
        &self,
        phone: &str,
        paused_until: Option<DateTime<Utc>>,
        paused_by: Option<String>,
        now: DateTime<Utc>,
    ) -> sqlx::Result<u64> {
        sqlx::query(
            "UPDATE conversation_sessions SET paused_until = ?, paused_by = ?, updated_at = ? WHERE phone = ?",
        )
        .bind(paused_until)
        .bind(paused_by)
        .bind(now)
        .bind(phone)
        .execute(&**self.connection)
        .await
        .map(|result| result.rows_affected())
        .inspect_err(|e| error!("{e}"))
    }

    async fn recent_messages(
        &self,
        session_id: Uuid,
        limit: usize,
    ) -> sqlx::Result<Vec<ConversationMessage>> {
        let mut messages: Vec<ConversationMessage> = sqlx::query_as(
            "SELECT * FROM conversation_messages WHERE session_id = ? ORDER BY julianday(created_at) DESC, rowid DESC LIMIT ?",
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&**self.connection)
        .await
        .inspect_err(|e| error!("{e}"))?;

        messages.reverse();
        Ok(messages)
    }

    async fn create_message(
        &self,
        session_id: Uuid,
        role: MessageRole,
        content: String,
        created_at: DateTime<Utc>,
    ) -> sqlx::Result<ConversationMessage> {
        sqlx::query_as(
            "INSERT INTO conversation_messages (id, session_id, role, content, created_at) VALUES (?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(role)
        .bind(content)
        .bind(created_at)
        .fetch_one(&**self.connection)
        .await
        .inspect_err(|e| error!("{e}"))
    }
}

#[injectable(AppointmentRepository)]
pub struct DbAppointmentRepository {
    connection: Ref<DatabaseConnection>,
}

impl DbAppointmentRepository {
    pub fn new(connection: Ref<DatabaseConnection>) -> Self {
        Self { connection }
    }
}

const INSERT_APPOINTMENT: &str = "INSERT INTO appointments (id, client_name, client_phone, appointment_type, starts_at, ends_at, status, slot_key, calendar_event_id, calendar_sync_status, calendar_synced_at, meeting_link, created_by, last_edited_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *";

fn bind_appointment<'q>(
    query: sqlx::query::QueryAs<'q, sqlx::Sqlite, Appointment, sqlx::sqlite::SqliteArguments<'q>>,
    appointment: Appointment,
) -> sqlx::query::QueryAs<'q, sqlx::Sqlite, Appointment, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(appointment.id)
        .bind(appointment.client_name)
        .bind(appointment.client_phone)
        .bind(appointment.appointment_type)
        .bind(appointment.starts_at)
        .bind(appointment.ends_at)
        .bind(appointment.status)
        .bind(appointment.slot_key)
        .bind(appointment.calendar_event_id)
        .bind(appointment.calendar_sync_status)
        .bind(appointment.calendar_synced_at)
        .bind(appointment.meeting_link)
        .bind(appointment.created_by)
        .bind(appointment.last_edited_by)
        .bind(appointment.created_at)
        .bind(appointment.updated_at)
}

#[async_trait]
impl AppointmentRepository for DbAppointmentRepository {
    async fn get(&self, id: Uuid) -> sqlx::Result<Option<Appointment>> {
        sqlx::query_as("SELECT * FROM appointments WHERE id = ?")
            .bind(id)
            .fetch_optional(&**self.connection)
            .await
            .inspect_err(|e| error!("{e}"))
    }

    async fn list_overlapping(
        &self,
        appointment_type: Option<AppointmentType>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> sqlx::Result<Vec<Appointment>> {
        sqlx::query_as(
            "SELECT * FROM appointments WHERE (? IS NULL OR appointment_type = ?) AND julianday(starts_at) < julianday(?) AND julianday(ends_at) > julianday(?) ORDER BY julianday(starts_at) ASC",
        )
        .bind(appointment_type)
        .bind(appointment_type)
        .bind(end)
        .bind(start)
        .fetch_all(&**self.connection)
        .await
        .inspect_err(|e| error!("{e}"))
    }

    async fn count_conflicts(
        &self,
        appointment_type: AppointmentType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> sqlx::Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM appointments WHERE appointment_type = ? AND status <> 'CANCELLED' AND julianday(starts_at) < julianday(?) AND julianday(ends_at) > julianday(?) AND (? IS NULL OR id <> ?)",
        )
        .bind(appointment_type)
        .bind(end)
        .bind(start)
        .bind(exclude)
        .bind(exclude)
        .fetch_one(&**self.connection)
        .await
        .inspect_err(|e| error!("{e}"))?;

        Ok(count)
    }

    async fn insert(&self, appointment: Appointment) -> sqlx::Result<Appointment> {
        // unique violations are expected under contention and mapped by the caller
        bind_appointment(sqlx::query_as(INSERT_APPOINTMENT), appointment)
            .fetch_one(&**self.connection)
            .await
    }

    async fn replace(&self, old_id: Uuid, replacement: Appointment) -> sqlx::Result<Appointment> {
        let mut tx = self.connection.begin().await?;

        sqlx::query("DELETE FROM appointments WHERE id = ?")
            .bind(old_id)
            .execute(&mut *tx)
            .await?;

        let created = bind_appointment(sqlx::query_as(INSERT_APPOINTMENT), replacement)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await.inspect_err(|e| error!("{e}"))?;
        Ok(created)
    }

    async fn mark_cancelled(
        &self,
        id: Uuid,
        editor: &str,
        now: DateTime<Utc>,
    ) -> sqlx::Result<Option<Appointment>> {
        sqlx::query_as(
            "UPDATE appointments SET status = 'CANCELLED', calendar_sync_status = CASE WHEN calendar_event_id IS NULL THEN calendar_sync_status ELSE 'cancelled' END, last_edited_by = ?, updated_at = ? WHERE id = ? AND status <> 'CANCELLED' RETURNING *",
        )
        .bind(editor)
        .bind(now)
        .bind(id)
        .fetch_optional(&**self.connection)
        .await
        .inspect_err(|e| error!("{e}"))
    }

    async fn record_calendar_sync(
        &self,
        id: Uuid,
        event_id: &str,
        meeting_link: Option<String>,
        synced_at: DateTime<Utc>,
    ) -> sqlx::Result<Appointment> {
        sqlx::query_as(
            "UPDATE appointments SET calendar_event_id = ?, calendar_sync_status = 'synced', calendar_synced_at = ?, meeting_link = COALESCE(?, meeting_link), updated_at = ? WHERE id = ? RETURNING *",
        )
        .bind(event_id)
        .bind(synced_at)
        .bind(meeting_link)
        .bind(synced_at)
        .bind(id)
        .fetch_one(&**self.connection)
        .await
        .inspect_err(|e| error!("{e}"))
    }

    async fn find_active_by_phone(
        &self,
        phone: &str,
        now: DateTime<Utc>,
    ) -> sqlx::Result<Option<Appointment>> {
        sqlx::query_as(
            "SELECT * FROM appointments WHERE client_phone = ? AND status IN ('SCHEDULED', 'CONFIRMED') AND julianday(starts_at) >= julianday(?) ORDER BY julianday(starts_at) ASC LIMIT 1",
        )
        .bind(phone)
        .bind(now)
        .fetch_optional(&**self.connection)
        .await
        .inspect_err(|e| error!("{e}"))
    }
}
