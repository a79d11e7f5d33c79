//! Appointment scheduler.
//!
//! Business rules, checked in this order on every create and reschedule:
//!
//! 1. the local date is a weekday (Mon-Fri);
//! 2. start and end fall within 08:00-18:00 of that day;
//! 3. start is strictly in the future;
//! 4. end is strictly after start;
//! 5. no non-cancelled appointment of the same track overlaps `[start, end)`.
//!
//! Rules 1-4 are validation failures, rule 5 is an availability failure.
//! Bookings on a track are serialized by the track lock, and the partial unique
//! index on the slot key rejects whatever still slips through.

use crate::core::calendar::CalendarPayload;
use crate::core::clock::Clock;
use crate::core::datetime::{format_time, is_business_day, to_local, to_utc};
use crate::core::errors::{
    BUSINESS_HOURS_MESSAGE, END_BEFORE_START_MESSAGE, PAST_SLOT_MESSAGE, SchedulingError,
    WEEKEND_MESSAGE,
};
use crate::core::locks::KeyedLocks;
use crate::core::traits::{CalendarSync, SchedulingService};
use crate::infrastructure::entities::{Appointment, AppointmentStatus, AppointmentType};
use crate::infrastructure::settings::Settings;
use crate::infrastructure::traits::AppointmentRepository;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use di::{Ref, injectable};
use log::{debug, info, warn};
use uuid::Uuid;

pub const OPENING_HOUR: u32 = 8;
pub const CLOSING_HOUR: u32 = 18;

const CANCELLED_RESCHEDULE_MESSAGE: &str = "Não é possível reagendar um agendamento cancelado.";

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub client_name: String,
    pub client_phone: String,
    pub appointment_type: AppointmentType,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Recorded as both creator and last editor.
    pub editor: String,
}

/// Rules 1-4, evaluated in the business timezone.
pub fn check_business_rules(
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<(), SchedulingError> {
    let local_start = to_local(starts_at, offset);
    let local_end = to_local(ends_at, offset);
    let day = local_start.date();

    if !is_business_day(day) {
        return Err(SchedulingError::validation(WEEKEND_MESSAGE));
    }

    let opening = day.and_time(NaiveTime::MIN) + chrono::Duration::hours(OPENING_HOUR as i64);
    let closing = day.and_time(NaiveTime::MIN) + chrono::Duration::hours(CLOSING_HOUR as i64);
    let within = |t: NaiveDateTime| t >= opening && t <= closing;
    if !within(local_start) || !within(local_end) {
        return Err(SchedulingError::validation(BUSINESS_HOURS_MESSAGE));
    }

    if starts_at <= now {
        return Err(SchedulingError::validation(PAST_SLOT_MESSAGE));
    }

    if ends_at <= starts_at {
        return Err(SchedulingError::validation(END_BEFORE_START_MESSAGE));
    }

    Ok(())
}

#[injectable(SchedulingService)]
pub struct AppointmentScheduler {
    repository: Ref<dyn AppointmentRepository>,
    calendar: Ref<dyn CalendarSync>,
    locks: Ref<KeyedLocks>,
    clock: Ref<dyn Clock>,
    settings: Ref<Settings>,
}

impl AppointmentScheduler {
    pub fn new(
        repository: Ref<dyn AppointmentRepository>,
        calendar: Ref<dyn CalendarSync>,
        locks: Ref<KeyedLocks>,
        clock: Ref<dyn Clock>,
        settings: Ref<Settings>,
    ) -> Self {
        Self {
            repository,
            calendar,
            locks,
            clock,
            settings,
        }
    }

    async fn existing(&self, id: Uuid) -> Result<Appointment, SchedulingError> {
        self.repository
            .get(id)
            .await?
            .ok_or(SchedulingError::NotFound)
    }

    /// Creates the calendar event and records it. Failures leave the appointment unsynced.
    async fn mirror_to_calendar(&self, appointment: Appointment) -> Appointment {
        let Some(event) = self
            .calendar
            .create_event(&CalendarPayload::from(&appointment))
            .await
        else {
            warn!("appointment {} not mirrored to calendar", appointment.id);
            return appointment;
        };

        self.record_sync(appointment, &event.id, event.meeting_link)
            .await
    }

    async fn record_sync(
        &self,
        appointment: Appointment,
        event_id: &str,
        meeting_link: Option<String>,
    ) -> Appointment {
        match self
            .repository
            .record_calendar_sync(appointment.id, event_id, meeting_link, self.clock.now())
            .await
        {
            Ok(synced) => synced,
            Err(e) => {
                warn!(
                    "calendar event {event_id} created but not recorded on {}: {e}",
                    appointment.id
                );
                appointment
            }
        }
    }
}

#[async_trait]
impl SchedulingService for AppointmentScheduler {
    async fn create_appointment(
        &self,
        request: NewAppointment,
    ) -> Result<Appointment, SchedulingError> {
        let track = self
            .locks
            .lock_track(request.appointment_type.as_str())
            .await;

        self.validate_slot(
            request.appointment_type,
            request.starts_at,
            request.ends_at,
            None,
        )
        .await?;

        let now = self.clock.now();
        let created = self
            .repository
            .insert(Appointment {
                id: Uuid::new_v4(),
                client_name: request.client_name,
                client_phone: request.client_phone,
                appointment_type: request.appointment_type,
                starts_at: request.starts_at,
                ends_at: request.ends_at,
                status: AppointmentStatus::Scheduled,
                slot_key: Appointment::slot_key_for(request.appointment_type, request.starts_at),
                calendar_event_id: None,
                calendar_sync_status: None,
                calendar_synced_at: None,
                meeting_link: None,
                created_by: request.editor.clone(),
                last_edited_by: request.editor,
                created_at: now,
                updated_at: now,
            })
            .await?;
        drop(track);

        info!(
            "appointment {} booked for {} on {} at {}",
            created.id, created.client_phone, created.appointment_type, created.starts_at
        );

        Ok(self.mirror_to_calendar(created).await)
    }

    async fn cancel_appointment(
        &self,
        id: Uuid,
        editor: &str,
    ) -> Result<Appointment, SchedulingError> {
        let existing = self.existing(id).await?;
        if existing.is_cancelled() {
            return Err(SchedulingError::AlreadyCancelled);
        }

        let cancelled = self
            .repository
            .mark_cancelled(id, editor, self.clock.now())
            .await?
            .ok_or(SchedulingError::AlreadyCancelled)?;

        if let Some(event_id) = cancelled.calendar_event_id.as_deref() {
            if !self.calendar.delete_event(event_id).await {
                warn!("calendar event {event_id} of cancelled appointment {id} not removed");
            }
        }

        info!("appointment {id} cancelled by {editor}");
        Ok(cancelled)
    }

    async fn reschedule_appointment(
        &self,
        id: Uuid,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        editor: &str,
    ) -> Result<Appointment, SchedulingError> {
        let existing = self.existing(id).await?;
        if existing.is_cancelled() {
            return Err(SchedulingError::validation(CANCELLED_RESCHEDULE_MESSAGE));
        }

        let track = self
            .locks
            .lock_track(existing.appointment_type.as_str())
            .await;

        self.validate_slot(existing.appointment_type, starts_at, ends_at, Some(id))
            .await?;

        let now = self.clock.now();
        let replacement = Appointment {
            id: Uuid::new_v4(),
            client_name: existing.client_name.clone(),
            client_phone: existing.client_phone.clone(),
            appointment_type: existing.appointment_type,
            starts_at,
            ends_at,
            status: AppointmentStatus::Scheduled,
            slot_key: Appointment::slot_key_for(existing.appointment_type, starts_at),
            calendar_event_id: None,
            calendar_sync_status: None,
            calendar_synced_at: None,
            meeting_link: None,
            created_by: existing.created_by.clone(),
            last_edited_by: editor.to_owned(),
            created_at: now,
            updated_at: now,
        };
        let created = self.repository.replace(id, replacement).await?;
        drop(track);

        // the old event goes only once the old row is gone for good
        if let Some(event_id) = existing.calendar_event_id.as_deref() {
            if !self.calendar.delete_event(event_id).await {
                warn!("calendar event {event_id} of rescheduled appointment {id} not removed");
            }
        }

        info!(
            "appointment {id} rescheduled to {} as {} by {editor}",
            created.starts_at, created.id
        );

        Ok(self.mirror_to_calendar(created).await)
    }

    async fn available_slots(
        &self,
        date: NaiveDate,
        appointment_type: AppointmentType,
    ) -> Result<Vec<String>, SchedulingError> {
        if !is_business_day(date) {
            return Ok(Vec::new());
        }

        let offset = self.settings.business_offset;
        let duration = self.settings.appointment_duration;
        let now = self.clock.now();
        let day_start = to_utc(date.and_time(NaiveTime::MIN), offset);
        let day_end = day_start + chrono::Duration::days(1);

        let booked: Vec<Appointment> = self
            .repository
            .list_overlapping(Some(appointment_type), day_start, day_end)
            .await?
            .into_iter()
            .filter(|appointment| !appointment.is_cancelled())
            .collect();

        let mut free = Vec::new();
        for hour in OPENING_HOUR..CLOSING_HOUR {
            let Some(local_start) = date.and_hms_opt(hour, 0, 0) else {
                continue;
            };
            let starts_at = to_utc(local_start, offset);
            let ends_at = starts_at + duration;

            if check_business_rules(starts_at, ends_at, now, offset).is_err() {
                continue;
            }

            let taken = booked
                .iter()
                .any(|existing| existing.starts_at < ends_at && existing.ends_at > starts_at);
            if !taken {
                free.push(format_time(local_start.time()));
            }
        }

        Ok(free)
    }

    async fn validate_slot(
        &self,
        appointment_type: AppointmentType,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<(), SchedulingError> {
        check_business_rules(
            starts_at,
            ends_at,
            self.clock.now(),
            self.settings.business_offset,
        )?;

        let conflicts = self
            .repository
            .count_conflicts(appointment_type, starts_at, ends_at, exclude)
            .await?;
        if conflicts > 0 {
            debug!("{appointment_type} slot at {starts_at} taken by {conflicts} appointment(s)");
            return Err(SchedulingError::Unavailable);
        }

        Ok(())
    }

    async fn find_active_by_phone(
        &self,
        phone: &str,
    ) -> Result<Option<Appointment>, SchedulingError> {
        Ok(self
            .repository
            .find_active_by_phone(phone, self.clock.now())
            .await?)
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Appointment, SchedulingError> {
        self.existing(id).await
    }

    async fn list_appointments(
        &self,
        appointment_type: Option<AppointmentType>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        Ok(self
            .repository
            .list_overlapping(appointment_type, start, end)
            .await?)
    }

    async fn sync_calendar(&self, id: Uuid) -> Result<Appointment, SchedulingError> {
        let existing = self.existing(id).await?;
        if existing.is_cancelled() {
            return Err(SchedulingError::AlreadyCancelled);
        }

        let Some(event_id) = existing.calendar_event_id.clone() else {
            return Ok(self.mirror_to_calendar(existing).await);
        };

        match self
            .calendar
            .update_event(&event_id, &CalendarPayload::from(&existing))
            .await
        {
            Some(event) => Ok(self.record_sync(existing, &event.id, event.meeting_link).await),
            None => {
                warn!("calendar event {event_id} of appointment {id} not refreshed");
                Ok(existing)
            }
        }
    }

    async fn calendar_is_free(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.calendar.is_free(start, end).await
    }
}
