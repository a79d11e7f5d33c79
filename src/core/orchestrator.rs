//! Dialogue orchestrator.
//!
//! One inbound message is one turn: check the pause, load the session, ask the
//! language service what the client wants, act on the intent, record both sides
//! of the exchange and fold the turn's slots back into the session. The stored
//! state is only a hint for the next interpretation; the intent drives branching.
//!
//! Turns for the same phone are serialized. Nothing that goes wrong inside a turn
//! reaches the caller: failures become a generic apology.

use crate::core::clock::Clock;
use crate::core::datetime::{DateTimeParser, format_long_date, format_time, to_local, to_utc};
use crate::core::errors::SchedulingError;
use crate::core::interpreter::{Intent, Slots};
use crate::core::locks::KeyedLocks;
use crate::core::scheduler::NewAppointment;
use crate::core::services::SessionUpdate;
use crate::core::traits::{ConversationService, LanguageInterpreter, Orchestrator, SchedulingService};
use crate::infrastructure::entities::{
    Appointment, AppointmentType, ConversationSession, ConversationState, MessageRole,
};
use crate::infrastructure::settings::Settings;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use di::{Ref, injectable};
use log::{error, info};
use serde::Serialize;
use uuid::Uuid;

/// Editor recorded on appointments booked through the chat.
pub const CHATBOT_EDITOR: &str = "chatbot";
pub const HUMAN_INTERVENTION: &str = "HUMAN_INTERVENTION";

pub const APOLOGY: &str = "Desculpe, ocorreu um erro ao processar sua mensagem. Tente novamente.";
const UNPARSED_DATE_TIME: &str =
    "Desculpe, não consegui entender a data ou horário. Pode informar novamente?";
const NO_ACTIVE_APPOINTMENT: &str =
    "Não encontrei nenhum agendamento ativo em seu nome. Posso ajudar com algo mais?";
const SLOT_TAKEN: &str = "Desculpe, este horário não está disponível. Pode escolher outro?";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub message: String,
    pub intent: Intent,
    pub appointment_created: bool,
    pub appointment_id: Option<Uuid>,
}

impl ChatReply {
    pub fn new(message: impl Into<String>, intent: Intent) -> ChatReply {
        ChatReply {
            message: message.into(),
            intent,
            appointment_created: false,
            appointment_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// A human operator owns the conversation; nothing was recorded or sent.
    Paused { remaining_minutes: Option<i64> },
    Reply(ChatReply),
}

impl MessageOutcome {
    pub fn reply(&self) -> Option<&ChatReply> {
        match self {
            MessageOutcome::Reply(reply) => Some(reply),
            MessageOutcome::Paused { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseStatus {
    pub is_paused: bool,
    pub remaining_minutes: Option<i64>,
}

/// What an intent handler decided: the reply and the session changes it wants.
struct Handled {
    reply: ChatReply,
    update: SessionUpdate,
}

impl Handled {
    fn reply(message: impl Into<String>, intent: Intent) -> Handled {
        Handled {
            reply: ChatReply::new(message, intent),
            update: SessionUpdate::default(),
        }
    }

    fn with_update(mut self, update: SessionUpdate) -> Handled {
        self.update = update;
        self
    }
}

fn type_text(appointment_type: AppointmentType) -> &'static str {
    match appointment_type {
        AppointmentType::Online => "online",
        AppointmentType::InStore => "na loja",
    }
}

fn truncate(message: &str, limit: usize) -> String {
    message.chars().take(limit).collect()
}

#[injectable(Orchestrator)]
pub struct DialogueOrchestrator {
    conversations: Ref<dyn ConversationService>,
    interpreter: Ref<dyn LanguageInterpreter>,
    scheduler: Ref<dyn SchedulingService>,
    locks: Ref<KeyedLocks>,
    clock: Ref<dyn Clock>,
    settings: Ref<Settings>,
}

impl DialogueOrchestrator {
    pub fn new(
        conversations: Ref<dyn ConversationService>,
        interpreter: Ref<dyn LanguageInterpreter>,
        scheduler: Ref<dyn SchedulingService>,
        locks: Ref<KeyedLocks>,
        clock: Ref<dyn Clock>,
        settings: Ref<Settings>,
    ) -> Self {
        Self {
            conversations,
            interpreter,
            scheduler,
            locks,
            clock,
            settings,
        }
    }

    async fn run_turn(
        &self,
        phone: &str,
        message: &str,
        state: &mut Option<ConversationState>,
    ) -> anyhow::Result<ChatReply> {
        let history = self.conversations.find_or_create_by_phone(phone).await?;
        *state = Some(history.session.state);

        let interpretation = self.interpreter.interpret(&history, message).await;
        let session = history.session;

        self.conversations
            .append_message(session.id, MessageRole::User, message)
            .await?;

        let slots = &interpretation.slots;
        let reply = interpretation.reply.as_str();
        let handled = match interpretation.intent {
            Intent::ConfirmAppointment => self.confirm_appointment(&session, slots, reply).await?,
            Intent::ScheduleAppointment => self.collect_slots(&session, slots, reply),
            Intent::CancelAppointment => self.cancel_appointment(&session, slots).await?,
            Intent::RescheduleAppointment => {
                self.reschedule_appointment(&session, slots).await?
            }
            Intent::Cancel => Handled::reply(reply, Intent::Cancel).with_update(SessionUpdate {
                state: Some(ConversationState::Intro),
                context: Some(Slots::default()),
                ..SessionUpdate::default()
            }),
            other => Handled::reply(reply, other),
        };

        self.conversations
            .append_message(session.id, MessageRole::Bot, &handled.reply.message)
            .await?;

        let update = fold_turn(handled.update, interpretation.intent, slots);
        if !update.is_empty() {
            self.conversations.update_session(session.id, update).await?;
        }

        Ok(handled.reply)
    }

    fn parser(&self) -> DateTimeParser {
        DateTimeParser::at(self.clock.now(), self.settings.business_offset)
    }

    /// Start and end of the slot named by the date and time fragments.
    fn parse_slot(&self, date: &str, time: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let local = self.parser().parse_date_time(date, time)?;
        let starts_at = to_utc(local, self.settings.business_offset);
        Some((starts_at, starts_at + self.settings.appointment_duration))
    }

    fn describe_slot(&self, starts_at: DateTime<Utc>) -> (String, String) {
        let local = to_local(starts_at, self.settings.business_offset);
        (format_long_date(local.date()), format_time(local.time()))
    }

    fn location_line(&self, appointment: &Appointment, rescheduled: bool) -> String {
        match (appointment.appointment_type, &appointment.meeting_link) {
            (AppointmentType::Online, Some(link)) => format!("🔗 Link da reunião: {link}"),
            (AppointmentType::Online, None) if rescheduled => {
                "🔗 Você receberá o novo link da reunião em breve.".to_owned()
            }
            (AppointmentType::Online, None) => {
                "🔗 Você receberá o link da reunião em breve.".to_owned()
            }
            (AppointmentType::InStore, _) => {
                format!("📍 Endereço: {}", self.settings.store_address)
            }
        }
    }

    fn recap(&self, appointment: &Appointment, question: &str) -> String {
        let (date, time) = self.describe_slot(appointment.starts_at);
        format!(
            "Encontrei seu agendamento:\n\n📅 Data: {date}\n🕐 Horário: {time}\n📍 Tipo: {}\n\n{question}",
            type_text(appointment.appointment_type)
        )
    }

    /// Turns a scheduling failure into a reply, listing free slots when the slot was taken.
    async fn failure_reply(
        &self,
        error: SchedulingError,
        starts_at: DateTime<Utc>,
        appointment_type: AppointmentType,
        intent: Intent,
    ) -> anyhow::Result<Handled> {
        match error {
            SchedulingError::Unavailable => {
                let day = to_local(starts_at, self.settings.business_offset).date();
                let free = self.scheduler.available_slots(day, appointment_type).await?;
                let message = if free.is_empty() {
                    format!("{SLOT_TAKEN}\n\nNão há mais horários livres neste dia.")
                } else {
                    format!(
                        "{SLOT_TAKEN}\n\nHorários livres neste dia: {}",
                        free.join(", ")
                    )
                };
                Ok(Handled::reply(message, intent))
            }
            error if error.is_user_facing() => Ok(Handled::reply(error.user_message(), intent)),
            error => Err(error.into()),
        }
    }

    async fn confirm_appointment(
        &self,
        session: &ConversationSession,
        slots: &Slots,
        reply: &str,
    ) -> anyhow::Result<Handled> {
        let (Some(client_name), Some(appointment_type), Some(date), Some(time), true) = (
            slots.client_name.as_deref(),
            slots.appointment_type,
            slots.appointment_date.as_deref(),
            slots.appointment_time.as_deref(),
            slots.is_confirmed(),
        ) else {
            return Ok(Handled::reply(reply, Intent::ConfirmAppointment));
        };

        let Some((starts_at, ends_at)) = self.parse_slot(date, time) else {
            return Ok(Handled::reply(UNPARSED_DATE_TIME, Intent::CollectData));
        };

        let request = NewAppointment {
            client_name: client_name.to_owned(),
            client_phone: session.phone.clone(),
            appointment_type,
            starts_at,
            ends_at,
            editor: CHATBOT_EDITOR.to_owned(),
        };

        let appointment = match self.scheduler.create_appointment(request).await {
            Ok(appointment) => appointment,
            Err(SchedulingError::Validation(message)) => {
                return Ok(Handled::reply(message, Intent::CollectData));
            }
            Err(error) => {
                return self
                    .failure_reply(error, starts_at, appointment_type, Intent::ScheduleAppointment)
                    .await;
            }
        };

        info!(
            "appointment {} booked via chat for {} ({})",
            appointment.id, session.phone, client_name
        );

        let (date, time) = self.describe_slot(appointment.starts_at);
        let message = format!(
            "✅ Agendamento confirmado!\n\n📅 Data: {date}\n🕐 Horário: {time}\n📍 Tipo: {}\n\n{}\n\nAté breve! 😊",
            type_text(appointment.appointment_type),
            self.location_line(&appointment, false)
        );

        Ok(Handled {
            reply: ChatReply {
                message,
                intent: Intent::ConfirmAppointment,
                appointment_created: true,
                appointment_id: Some(appointment.id),
            },
            update: SessionUpdate {
                state: Some(ConversationState::Completed),
                scheduled_appointment_id: Some(Some(appointment.id)),
                ..SessionUpdate::default()
            },
        })
    }

    fn collect_slots(&self, session: &ConversationSession, slots: &Slots, reply: &str) -> Handled {
        let mut context = session.context.0.clone();
        context.merge(slots);

        Handled::reply(reply, Intent::ScheduleAppointment).with_update(SessionUpdate {
            context: Some(context),
            ..SessionUpdate::default()
        })
    }

    async fn cancel_appointment(
        &self,
        session: &ConversationSession,
        slots: &Slots,
    ) -> anyhow::Result<Handled> {
        let Some(appointment) = self.scheduler.find_active_by_phone(&session.phone).await? else {
            return Ok(Handled::reply(NO_ACTIVE_APPOINTMENT, Intent::CancelAppointment));
        };

        if !slots.is_confirmed() {
            return Ok(Handled::reply(
                self.recap(&appointment, "Confirma o cancelamento? (Sim/Não)"),
                Intent::CancelAppointment,
            ));
        }

        match self
            .scheduler
            .cancel_appointment(appointment.id, CHATBOT_EDITOR)
            .await
        {
            Ok(_) => {
                info!("appointment {} cancelled via chat by {}", appointment.id, session.phone);
                Ok(Handled::reply(
                    "✅ Agendamento cancelado com sucesso!\n\nSe precisar agendar novamente, é só me avisar. 😊",
                    Intent::CancelAppointment,
                )
                .with_update(SessionUpdate {
                    state: Some(ConversationState::Intro),
                    scheduled_appointment_id: Some(None),
                    ..SessionUpdate::default()
                }))
            }
            Err(error) => {
                self.failure_reply(
                    error,
                    appointment.starts_at,
                    appointment.appointment_type,
                    Intent::CancelAppointment,
                )
                .await
            }
        }
    }

    async fn reschedule_appointment(
        &self,
        session: &ConversationSession,
        slots: &Slots,
    ) -> anyhow::Result<Handled> {
        let intent = Intent::RescheduleAppointment;
        let Some(appointment) = self.scheduler.find_active_by_phone(&session.phone).await? else {
            return Ok(Handled::reply(NO_ACTIVE_APPOINTMENT, intent));
        };

        let (Some(date), Some(time)) = (
            slots.appointment_date.as_deref(),
            slots.appointment_time.as_deref(),
        ) else {
            return Ok(Handled::reply(
                self.recap(&appointment, "Para qual data e horário gostaria de remarcar?"),
                intent,
            ));
        };

        let Some((starts_at, ends_at)) = self.parse_slot(date, time) else {
            return Ok(Handled::reply(UNPARSED_DATE_TIME, intent));
        };

        if let Err(error) = self
            .scheduler
            .validate_slot(
                appointment.appointment_type,
                starts_at,
                ends_at,
                Some(appointment.id),
            )
            .await
        {
            return self
                .failure_reply(error, starts_at, appointment.appointment_type, intent)
                .await;
        }

        if !slots.is_confirmed() {
            let (date, time) = self.describe_slot(starts_at);
            return Ok(Handled::reply(
                format!(
                    "Perfeito! Confirma o reagendamento para:\n\n📅 Data: {date}\n🕐 Horário: {time}\n\nConfirma? (Sim/Não)"
                ),
                intent,
            ));
        }

        let moved = match self
            .scheduler
            .reschedule_appointment(appointment.id, starts_at, ends_at, CHATBOT_EDITOR)
            .await
        {
            Ok(moved) => moved,
            Err(error) => {
                return self
                    .failure_reply(error, starts_at, appointment.appointment_type, intent)
                    .await;
            }
        };

        info!(
            "appointment {} moved to {} as {} via chat",
            appointment.id, moved.starts_at, moved.id
        );

        let (date, time) = self.describe_slot(moved.starts_at);
        let message = format!(
            "✅ Agendamento remarcado com sucesso!\n\n📅 Nova data: {date}\n🕐 Novo horário: {time}\n📍 Tipo: {}\n\n{}\n\nAté breve! 😊",
            type_text(moved.appointment_type),
            self.location_line(&moved, true)
        );

        Ok(Handled::reply(message, intent).with_update(SessionUpdate {
            state: Some(ConversationState::Intro),
            scheduled_appointment_id: Some(Some(moved.id)),
            ..SessionUpdate::default()
        }))
    }
}

/// Adds the state hint and the slot-backed session fields to the handler's update.
///
/// A state chosen by the handler wins over the hint.
fn fold_turn(mut update: SessionUpdate, intent: Intent, slots: &Slots) -> SessionUpdate {
    if update.state.is_none() {
        update.state = match intent {
            Intent::ScheduleAppointment
                if slots.appointment_date.is_some() && slots.appointment_time.is_some() =>
            {
                Some(ConversationState::Confirming)
            }
            Intent::ScheduleAppointment if slots.appointment_type.is_some() => {
                Some(ConversationState::AskingDate)
            }
            Intent::ScheduleAppointment if slots.client_name.is_some() => {
                Some(ConversationState::AskingAppointmentType)
            }
            Intent::ConfirmAppointment if slots.is_confirmed() => {
                Some(ConversationState::Confirming)
            }
            _ => None,
        };
    }

    if let Some(client_name) = &slots.client_name {
        update.client_name = Some(client_name.clone());
    }
    if let Some(appointment_type) = slots.appointment_type {
        update.appointment_type = Some(appointment_type);
    }
    if let Some(service_intent) = &slots.service_intent {
        update.service_intent = Some(service_intent.clone());
    }

    update
}

#[async_trait]
impl Orchestrator for DialogueOrchestrator {
    async fn process_message(&self, phone: &str, message: &str) -> MessageOutcome {
        let _turn = self.locks.lock_phone(phone).await;

        match self.conversations.is_paused(phone).await {
            Ok(false) => {}
            Ok(true) => {
                let remaining_minutes = self
                    .conversations
                    .pause_remaining_minutes(phone)
                    .await
                    .ok()
                    .flatten();
                info!("message from {phone} ignored, conversation paused ({remaining_minutes:?} min left)");
                return MessageOutcome::Paused { remaining_minutes };
            }
            Err(e) => {
                error!(
                    "cannot check pause for {phone} (message: {:?}): {e}",
                    truncate(message, 100)
                );
                return MessageOutcome::Reply(ChatReply::new(APOLOGY, Intent::SmallTalk));
            }
        }

        let mut state = None;
        match self.run_turn(phone, message, &mut state).await {
            Ok(reply) => MessageOutcome::Reply(reply),
            Err(e) => {
                error!(
                    "failed to process message from {phone} in state {} (message: {:?}): {e:#}",
                    state.map(|s| s.as_str()).unwrap_or("UNKNOWN"),
                    truncate(message, 100)
                );
                MessageOutcome::Reply(ChatReply::new(APOLOGY, Intent::SmallTalk))
            }
        }
    }

    async fn clear_history(&self, phone: &str) -> anyhow::Result<()> {
        let _turn = self.locks.lock_phone(phone).await;
        self.conversations.clear(phone).await?;
        Ok(())
    }

    async fn pause(&self, phone: &str, duration: Duration, reason: &str) -> anyhow::Result<()> {
        let _turn = self.locks.lock_phone(phone).await;
        self.conversations.pause(phone, duration, reason).await?;
        Ok(())
    }

    async fn unpause(&self, phone: &str) -> anyhow::Result<()> {
        let _turn = self.locks.lock_phone(phone).await;
        self.conversations.unpause(phone).await?;
        Ok(())
    }

    async fn pause_status(&self, phone: &str) -> anyhow::Result<PauseStatus> {
        let remaining_minutes = self.conversations.pause_remaining_minutes(phone).await?;
        Ok(PauseStatus {
            is_paused: remaining_minutes.is_some(),
            remaining_minutes,
        })
    }

    async fn handle_operator_message(&self, phone: &str) -> anyhow::Result<()> {
        let duration = Duration::hours(self.settings.human_pause_hours);
        info!("operator took over {phone}, pausing for {duration}");
        self.pause(phone, duration, HUMAN_INTERVENTION).await
    }
}
