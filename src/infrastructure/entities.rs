//! Database entities

use crate::core::interpreter::Slots;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use std::fmt;
use uuid::Uuid;

/// Dialogue position of a session.
///
/// Mostly a hint fed back to the language service; the interpreted intent
/// drives branching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationState {
    Intro,
    AskingAppointmentType,
    AskingDate,
    Confirming,
    Completed,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationState::Intro => "INTRO",
            ConversationState::AskingAppointmentType => "ASKING_APPOINTMENT_TYPE",
            ConversationState::AskingDate => "ASKING_DATE",
            ConversationState::Confirming => "CONFIRMING",
            ConversationState::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ConversationSession {
    pub id: Uuid,
    pub phone: String,
    pub state: ConversationState,
    pub context: Json<Slots>,
    pub client_name: Option<String>,
    pub appointment_type: Option<AppointmentType>,
    pub service_intent: Option<String>,
    pub scheduled_appointment_id: Option<Uuid>,
    pub paused_until: Option<DateTime<Utc>>,
    pub paused_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new(phone: &str, now: DateTime<Utc>) -> ConversationSession {
        ConversationSession {
            id: Uuid::new_v4(),
            phone: phone.to_owned(),
            state: ConversationState::Intro,
            context: Json(Slots::default()),
            client_name: None,
            appointment_type: None,
            service_intent: None,
            scheduled_appointment_id: None,
            paused_until: None,
            paused_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageRole {
    User,
    Bot,
}

#[derive(Debug, Clone, FromRow)]
pub struct ConversationMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A session together with its most recent messages, oldest first.
#[derive(Debug, Clone)]
pub struct SessionWithHistory {
    pub session: ConversationSession,
    pub messages: Vec<ConversationMessage>,
}

/// One of the two independently booked tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentType {
    Online,
    InStore,
}

impl AppointmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentType::Online => "ONLINE",
            AppointmentType::InStore => "IN_STORE",
        }
    }

    /// Lenient parse used at the language-service boundary and in query strings.
    pub fn parse(raw: &str) -> Option<AppointmentType> {
        match raw.trim().to_lowercase().as_str() {
            "online" | "on-line" | "remoto" | "remote" => Some(AppointmentType::Online),
            "in_store" | "in-store" | "instore" | "loja" | "presencial" | "store" => {
                Some(AppointmentType::InStore)
            }
            _ => None,
        }
    }
}

impl fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Cancelled,
    NoShow,
}

#[derive(Debug, Clone, FromRow)]
pub struct Appointment {
    pub id: Uuid,
    pub client_name: String,
    pub client_phone: String,
    pub appointment_type: AppointmentType,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub slot_key: String,
    pub calendar_event_id: Option<String>,
    pub calendar_sync_status: Option<String>,
    pub calendar_synced_at: Option<DateTime<Utc>>,
    pub meeting_link: Option<String>,
    pub created_by: String,
    pub last_edited_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Storage key of the slot this appointment starts on, per track.
    pub fn slot_key_for(appointment_type: AppointmentType, starts_at: DateTime<Utc>) -> String {
        format!(
            "{}|{}",
            appointment_type.as_str(),
            starts_at.format("%Y-%m-%dT%H:%M")
        )
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == AppointmentStatus::Cancelled
    }
}
