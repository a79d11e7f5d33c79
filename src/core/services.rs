//! Conversation store service.
//!

use crate::core::clock::Clock;
use crate::core::interpreter::Slots;
use crate::core::traits::ConversationService;
use crate::infrastructure::entities::{
    AppointmentType, ConversationMessage, ConversationSession, ConversationState, MessageRole,
    SessionWithHistory,
};
use crate::infrastructure::settings::Settings;
use crate::infrastructure::traits::ConversationRepository;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use di::{Ref, injectable};
use log::{debug, info};
use sqlx::types::Json;
use uuid::Uuid;

/// Longest pause an operator may request.
pub const MAX_PAUSE_HOURS: f64 = 24.0 * 365.0;

/// Pause length for a requested number of hours, rounded to the minute.
///
/// `None` unless `hours` is positive, finite and at most [`MAX_PAUSE_HOURS`].
pub fn pause_for_hours(hours: f64) -> Option<Duration> {
    if !hours.is_finite() || hours <= 0.0 || hours > MAX_PAUSE_HOURS {
        return None;
    }
    Duration::try_minutes((hours * 60.0).round() as i64)
}

/// Partial session update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub state: Option<ConversationState>,
    pub context: Option<Slots>,
    pub client_name: Option<String>,
    pub appointment_type: Option<AppointmentType>,
    pub service_intent: Option<String>,
    /// `Some(None)` clears the reference.
    pub scheduled_appointment_id: Option<Option<Uuid>>,
}

impl SessionUpdate {
    pub fn state(state: ConversationState) -> SessionUpdate {
        SessionUpdate {
            state: Some(state),
            ..SessionUpdate::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_none()
            && self.context.is_none()
            && self.client_name.is_none()
            && self.appointment_type.is_none()
            && self.service_intent.is_none()
            && self.scheduled_appointment_id.is_none()
    }

    fn apply(self, session: &mut ConversationSession) {
        if let Some(state) = self.state {
            session.state = state;
        }
        if let Some(context) = self.context {
            session.context = Json(context);
        }
        if let Some(client_name) = self.client_name {
            session.client_name = Some(client_name);
        }
        if let Some(appointment_type) = self.appointment_type {
            session.appointment_type = Some(appointment_type);
        }
        if let Some(service_intent) = self.service_intent {
            session.service_intent = Some(service_intent);
        }
        if let Some(appointment_id) = self.scheduled_appointment_id {
            session.scheduled_appointment_id = appointment_id;
        }
    }
}

#[injectable(ConversationService)]
pub struct ConversationStore {
    repository: Ref<dyn ConversationRepository>,
    clock: Ref<dyn Clock>,
    settings: Ref<Settings>,
}

impl ConversationStore {
    pub fn new(
        repository: Ref<dyn ConversationRepository>,
        clock: Ref<dyn Clock>,
        settings: Ref<Settings>,
    ) -> Self {
        Self {
            repository,
            clock,
            settings,
        }
    }

    async fn find_or_create_session(&self, phone: &str) -> sqlx::Result<ConversationSession> {
        if let Some(session) = self.repository.find_session_by_phone(phone).await? {
            return Ok(session);
        }

        let session = self
            .repository
            .create_session(ConversationSession::new(phone, self.clock.now()))
            .await?;
        info!("new conversation session {} for {phone}", session.id);
        Ok(session)
    }

    /// End of the current pause, clearing it first if it already expired.
    async fn active_pause(&self, phone: &str) -> sqlx::Result<Option<DateTime<Utc>>> {
        let Some(session) = self.repository.find_session_by_phone(phone).await? else {
            return Ok(None);
        };
        let Some(paused_until) = session.paused_until else {
            return Ok(None);
        };

        let now = self.clock.now();
        if now >= paused_until {
            self.repository.set_pause(phone, None, None, now).await?;
            debug!("pause for {phone} expired at {paused_until}");
            return Ok(None);
        }

        Ok(Some(paused_until))
    }
}

#[async_trait]
impl ConversationService for ConversationStore {
    async fn find_or_create_by_phone(&self, phone: &str) -> sqlx::Result<SessionWithHistory> {
        let session = self.find_or_create_session(phone).await?;
        let messages = self
            .repository
            .recent_messages(session.id, self.settings.history_window)
            .await?;

        Ok(SessionWithHistory { session, messages })
    }

    async fn update_session(
        &self,
        session_id: Uuid,
        update: SessionUpdate,
    ) -> sqlx::Result<ConversationSession> {
        let mut session = self
            .repository
            .get_session(session_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;

        update.apply(&mut session);
        session.updated_at = self.clock.now();
        self.repository.save_session(&session).await
    }

    async fn append_message(
        &self,
        session_id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> sqlx::Result<ConversationMessage> {
        self.repository
            .create_message(session_id, role, content.to_owned(), self.clock.now())
            .await
    }

    async fn clear(&self, phone: &str) -> sqlx::Result<bool> {
        let deleted = self.repository.delete_session_by_phone(phone).await?;
        if deleted > 0 {
            info!("conversation history cleared for {phone}");
        }
        Ok(deleted > 0)
    }

    async fn pause(
        &self,
        phone: &str,
        duration: Duration,
        reason: &str,
    ) -> sqlx::Result<DateTime<Utc>> {
        let now = self.clock.now();
        let paused_until = now.checked_add_signed(duration).ok_or_else(|| {
            sqlx::Error::Protocol(format!("pause of {duration} for {phone} is out of range"))
        })?;

        self.find_or_create_session(phone).await?;
        self.repository
            .set_pause(phone, Some(paused_until), Some(reason.to_owned()), now)
            .await?;

        info!("conversation {phone} paused until {paused_until} ({reason})");
        Ok(paused_until)
    }

    async fn unpause(&self, phone: &str) -> sqlx::Result<()> {
        self.repository
            .set_pause(phone, None, None, self.clock.now())
            .await?;
        info!("conversation {phone} resumed");
        Ok(())
    }

    async fn is_paused(&self, phone: &str) -> sqlx::Result<bool> {
        Ok(self.active_pause(phone).await?.is_some())
    }

    async fn pause_remaining_minutes(&self, phone: &str) -> sqlx::Result<Option<i64>> {
        let Some(paused_until) = self.active_pause(phone).await? else {
            return Ok(None);
        };

        let remaining_ms = (paused_until - self.clock.now()).num_milliseconds().max(0);
        Ok(Some((remaining_ms + 59_999) / 60_000))
    }
}
