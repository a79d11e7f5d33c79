//! Appointment administration endpoints

use crate::api::appointments::schemas::{
    Appointment, AppointmentList, AppointmentQuery, AvailabilityQuery, AvailableSlots,
    CreateAppointment, RescheduleAppointment, SlotValidation, ValidateAppointment,
};
use crate::api::{ApiError, ExtractUser};
use crate::core::clock::Clock;
use crate::core::datetime::{format_date, to_local, to_utc};
use crate::core::scheduler::NewAppointment;
use crate::core::traits::SchedulingService;
use crate::infrastructure::entities::AppointmentType;
use crate::infrastructure::settings::Settings;
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use di_axum::Inject;
use uuid::Uuid;

const INVALID_DATE_TIME: &str = "Data ou horário inválido. Use DD/MM/AAAA e HH:mm.";

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_appointments).post(create_appointment))
        .route("/validate", post(validate_appointment))
        .route("/availability/:date", get(available_slots))
        .route("/:id", get(get_appointment))
        .route("/:id/reschedule", put(reschedule_appointment))
        .route("/:id/cancel", post(cancel_appointment))
        .route("/:id/sync-calendar", post(sync_calendar))
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    ["%d/%m/%Y", "%d-%m-%Y", "%Y-%m-%d"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw.trim(), format).ok())
}

/// Start and end of the slot named by `DD/MM/YYYY` and `HH:mm` in business time.
fn slot_from_fields(
    settings: &Settings,
    date: &str,
    time: &str,
) -> Result<(DateTime<Utc>, DateTime<Utc>), ApiError> {
    let date = parse_date(date).ok_or_else(|| ApiError::bad_request(INVALID_DATE_TIME))?;
    let time = NaiveTime::parse_from_str(time.trim(), "%H:%M")
        .map_err(|_| ApiError::bad_request(INVALID_DATE_TIME))?;

    let starts_at = to_utc(date.and_time(time), settings.business_offset);
    Ok((starts_at, starts_at + settings.appointment_duration))
}

fn parse_type(raw: &str) -> Result<AppointmentType, ApiError> {
    AppointmentType::parse(raw)
        .ok_or_else(|| ApiError::bad_request(format!("tipo de atendimento inválido: {raw}")))
}

async fn list_appointments(
    Inject(scheduler): Inject<dyn SchedulingService>,
    Inject(clock): Inject<dyn Clock>,
    Inject(settings): Inject<Settings>,
    ExtractUser(_operator): ExtractUser,
    Query(query): Query<AppointmentQuery>,
) -> Result<(StatusCode, Json<AppointmentList>), ApiError> {
    let appointment_type = query.appointment_type.as_deref().map(parse_type).transpose()?;

    let today = to_local(clock.now(), settings.business_offset).date();
    let start = query
        .start
        .unwrap_or_else(|| to_utc(today.and_time(NaiveTime::MIN), settings.business_offset));
    let end = query.end.unwrap_or(start + Duration::days(30));
    if end <= start {
        return Err(ApiError::bad_request("`end` must be after `start`"));
    }

    let appointments = scheduler
        .list_appointments(appointment_type, start, end)
        .await?;

    Ok((
        StatusCode::OK,
        Json(AppointmentList {
            appointments: appointments.into_iter().map(Appointment::from).collect(),
        }),
    ))
}

async fn get_appointment(
    Inject(scheduler): Inject<dyn SchedulingService>,
    ExtractUser(_operator): ExtractUser,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Appointment>), ApiError> {
    let appointment = scheduler.get_appointment(id).await?;
    Ok((StatusCode::OK, Json(appointment.into())))
}

async fn create_appointment(
    Inject(scheduler): Inject<dyn SchedulingService>,
    Inject(settings): Inject<Settings>,
    ExtractUser(operator): ExtractUser,
    Json(request): Json<CreateAppointment>,
) -> Result<(StatusCode, Json<Appointment>), ApiError> {
    if request.client_name.trim().is_empty() || request.client_phone.trim().is_empty() {
        return Err(ApiError::bad_request("clientName e clientPhone são obrigatórios."));
    }
    let appointment_type = parse_type(&request.appointment_type)?;
    let (starts_at, ends_at) = slot_from_fields(&settings, &request.date, &request.time)?;

    let appointment = scheduler
        .create_appointment(NewAppointment {
            client_name: request.client_name.trim().to_owned(),
            client_phone: request.client_phone.trim().to_owned(),
            appointment_type,
            starts_at,
            ends_at,
            editor: operator.to_string(),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(appointment.into())))
}

async fn reschedule_appointment(
    Inject(scheduler): Inject<dyn SchedulingService>,
    Inject(settings): Inject<Settings>,
    ExtractUser(operator): ExtractUser,
    Path(id): Path<Uuid>,
    Json(request): Json<RescheduleAppointment>,
) -> Result<(StatusCode, Json<Appointment>), ApiError> {
    let (starts_at, ends_at) = slot_from_fields(&settings, &request.date, &request.time)?;

    let appointment = scheduler
        .reschedule_appointment(id, starts_at, ends_at, &operator.to_string())
        .await?;

    Ok((StatusCode::OK, Json(appointment.into())))
}

async fn cancel_appointment(
    Inject(scheduler): Inject<dyn SchedulingService>,
    ExtractUser(operator): ExtractUser,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Appointment>), ApiError> {
    let appointment = scheduler
        .cancel_appointment(id, &operator.to_string())
        .await?;
    Ok((StatusCode::OK, Json(appointment.into())))
}

async fn available_slots(
    Inject(scheduler): Inject<dyn SchedulingService>,
    ExtractUser(_operator): ExtractUser,
    Path(date): Path<String>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<(StatusCode, Json<AvailableSlots>), ApiError> {
    let date = parse_date(&date).ok_or_else(|| ApiError::bad_request(INVALID_DATE_TIME))?;
    let appointment_type = parse_type(&query.appointment_type)?;

    let slots = scheduler.available_slots(date, appointment_type).await?;

    Ok((
        StatusCode::OK,
        Json(AvailableSlots {
            date: format_date(date),
            appointment_type,
            slots,
        }),
    ))
}

async fn validate_appointment(
    Inject(scheduler): Inject<dyn SchedulingService>,
    Inject(settings): Inject<Settings>,
    ExtractUser(_operator): ExtractUser,
    Json(request): Json<ValidateAppointment>,
) -> Result<(StatusCode, Json<SlotValidation>), ApiError> {
    let appointment_type = parse_type(&request.appointment_type)?;
    let (starts_at, ends_at) = slot_from_fields(&settings, &request.date, &request.time)?;

    let verdict = scheduler
        .validate_slot(appointment_type, starts_at, ends_at, None)
        .await;
    let calendar_free = scheduler.calendar_is_free(starts_at, ends_at).await;

    let validation = match verdict {
        Ok(()) => SlotValidation {
            is_valid: true,
            message: "Horário disponível".to_owned(),
            calendar_free,
        },
        Err(error) if error.is_user_facing() => SlotValidation {
            is_valid: false,
            message: error.user_message(),
            calendar_free,
        },
        Err(error) => return Err(error.into()),
    };

    Ok((StatusCode::OK, Json(validation)))
}

async fn sync_calendar(
    Inject(scheduler): Inject<dyn SchedulingService>,
    ExtractUser(_operator): ExtractUser,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Appointment>), ApiError> {
    let appointment = scheduler.sync_calendar(id).await?;
    Ok((StatusCode::OK, Json(appointment.into())))
}

pub mod schemas {
    use crate::infrastructure::entities;
    use crate::infrastructure::entities::{AppointmentStatus, AppointmentType};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Deserialize, Debug)]
    pub struct AppointmentQuery {
        pub start: Option<DateTime<Utc>>,
        pub end: Option<DateTime<Utc>>,
        #[serde(rename = "type")]
        pub appointment_type: Option<String>,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct CreateAppointment {
        pub client_name: String,
        pub client_phone: String,
        #[serde(rename = "type")]
        pub appointment_type: String,
        pub date: String,
        pub time: String,
    }

    #[derive(Deserialize, Debug)]
    pub struct RescheduleAppointment {
        pub date: String,
        pub time: String,
    }

    #[derive(Deserialize, Debug)]
    pub struct ValidateAppointment {
        #[serde(rename = "type")]
        pub appointment_type: String,
        pub date: String,
        pub time: String,
    }

    #[derive(Deserialize, Debug)]
    pub struct AvailabilityQuery {
        #[serde(rename = "type")]
        pub appointment_type: String,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct Appointment {
        pub id: Uuid,
        pub client_name: String,
        pub client_phone: String,
        #[serde(rename = "type")]
        pub appointment_type: AppointmentType,
        pub start: DateTime<Utc>,
        pub end: DateTime<Utc>,
        pub status: AppointmentStatus,
        pub calendar_event_id: Option<String>,
        pub calendar_sync_status: Option<String>,
        pub calendar_synced_at: Option<DateTime<Utc>>,
        pub meeting_link: Option<String>,
        pub created_by: String,
        pub last_edited_by: String,
        pub created_at: DateTime<Utc>,
        pub updated_at: DateTime<Utc>,
    }

    impl From<entities::Appointment> for Appointment {
        fn from(appointment: entities::Appointment) -> Self {
            Appointment {
                id: appointment.id,
                client_name: appointment.client_name,
                client_phone: appointment.client_phone,
                appointment_type: appointment.appointment_type,
                start: appointment.starts_at,
                end: appointment.ends_at,
                status: appointment.status,
                calendar_event_id: appointment.calendar_event_id,
                calendar_sync_status: appointment.calendar_sync_status,
                calendar_synced_at: appointment.calendar_synced_at,
                meeting_link: appointment.meeting_link,
                created_by: appointment.created_by,
                last_edited_by: appointment.last_edited_by,
                created_at: appointment.created_at,
                updated_at: appointment.updated_at,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct AppointmentList {
        pub appointments: Vec<Appointment>,
    }

    #[derive(Serialize, Debug)]
    pub struct AvailableSlots {
        pub date: String,
        #[serde(rename = "type")]
        pub appointment_type: AppointmentType,
        pub slots: Vec<String>,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct SlotValidation {
        pub is_valid: bool,
        pub message: String,
        /// Advisory answer from the external calendar.
        pub calendar_free: bool,
    }
}
