//! Best-effort mirror of appointments into Google Calendar.
//!
//! Every call degrades to a safe default when the calendar is not configured or
//! fails: `None` for event writes, `false` for deletes, "free" for availability.
//! The local appointment store stays the source of truth.

use crate::core::traits::CalendarSync;
use crate::infrastructure::entities::{Appointment, AppointmentType};
use crate::infrastructure::settings::{CalendarSettings, Settings};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use di::{Ref, inject, injectable};
use log::{info, warn};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// What the calendar needs to know about an appointment.
#[derive(Debug, Clone)]
pub struct CalendarPayload {
    pub client_name: String,
    pub client_phone: String,
    pub appointment_type: AppointmentType,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl From<&Appointment> for CalendarPayload {
    fn from(appointment: &Appointment) -> Self {
        CalendarPayload {
            client_name: appointment.client_name.clone(),
            client_phone: appointment.client_phone.clone(),
            appointment_type: appointment.appointment_type,
            starts_at: appointment.starts_at,
            ends_at: appointment.ends_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    pub id: String,
    pub meeting_link: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventBody {
    summary: String,
    description: String,
    start: EventTime,
    end: EventTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    conference_data: Option<serde_json::Value>,
    extended_properties: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    date_time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventResponse {
    id: Option<String>,
    hangout_link: Option<String>,
    conference_data: Option<ConferenceData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConferenceData {
    #[serde(default)]
    entry_points: Vec<EntryPoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryPoint {
    entry_point_type: Option<String>,
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventList {
    #[serde(default)]
    items: Vec<ListedEvent>,
}

#[derive(Debug, Deserialize)]
struct ListedEvent {
    status: Option<String>,
    transparency: Option<String>,
}

impl ListedEvent {
    /// Events marked "free" or cancelled do not block the slot.
    fn blocks_time(&self) -> bool {
        self.transparency.as_deref() != Some("transparent")
            && self.status.as_deref() != Some("cancelled")
    }
}

impl EventResponse {
    fn into_event(self) -> Option<CalendarEvent> {
        let video_link = self.conference_data.and_then(|data| {
            data.entry_points
                .into_iter()
                .find(|entry| entry.entry_point_type.as_deref() == Some("video"))
                .and_then(|entry| entry.uri)
        });

        Some(CalendarEvent {
            id: self.id?,
            meeting_link: self.hangout_link.or(video_link),
        })
    }
}

pub struct GoogleCalendarSync {
    client: Client,
    settings: CalendarSettings,
    offset: FixedOffset,
    store_address: String,
}

#[injectable(CalendarSync)]
impl GoogleCalendarSync {
    #[inject]
    pub fn create(settings: Ref<Settings>) -> GoogleCalendarSync {
        GoogleCalendarSync::new(
            settings.calendar.clone(),
            settings.business_offset,
            settings.store_address.clone(),
        )
    }
}

impl GoogleCalendarSync {
    pub fn new(
        settings: CalendarSettings,
        offset: FixedOffset,
        store_address: String,
    ) -> GoogleCalendarSync {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("falling back to default HTTP client for calendar: {e}");
                Client::new()
            });

        GoogleCalendarSync {
            client,
            settings,
            offset,
            store_address,
        }
    }

    fn events_url(&self) -> String {
        format!(
            "{}/calendars/{}/events",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.calendar_id
        )
    }

    fn authorized(&self, request: RequestBuilder) -> Option<RequestBuilder> {
        let token = self.settings.access_token.as_deref()?;
        Some(request.bearer_auth(token))
    }

    fn event_body(&self, payload: &CalendarPayload) -> EventBody {
        let (type_name, modality) = match payload.appointment_type {
            AppointmentType::Online => ("Reunião Online", "Online"),
            AppointmentType::InStore => ("Visita à Loja", "Visita na loja"),
        };

        let mut description = vec![
            format!("Cliente: {}", payload.client_name),
            format!("Telefone: {}", payload.client_phone),
            format!("Modalidade: {modality}"),
        ];
        if payload.appointment_type == AppointmentType::InStore {
            description.push(format!("Endereço: {}", self.store_address));
        }

        let conference_data = (payload.appointment_type == AppointmentType::Online).then(|| {
            json!({
                "createRequest": {
                    "requestId": format!("meeting_{}_{}", Utc::now().timestamp_millis(), payload.client_phone),
                    "conferenceSolutionKey": { "type": "hangoutsMeet" }
                }
            })
        });

        EventBody {
            summary: format!("Atendimento - {type_name} | {}", payload.client_name),
            description: description.join("\n"),
            start: EventTime {
                date_time: payload.starts_at.with_timezone(&self.offset).to_rfc3339(),
            },
            end: EventTime {
                date_time: payload.ends_at.with_timezone(&self.offset).to_rfc3339(),
            },
            conference_data,
            extended_properties: json!({
                "private": {
                    "clientName": payload.client_name,
                    "clientPhone": payload.client_phone,
                    "appointmentType": payload.appointment_type.as_str(),
                    "source": "scheduling_chatbot",
                }
            }),
        }
    }

    async fn send_event(&self, request: RequestBuilder) -> anyhow::Result<Option<CalendarEvent>> {
        let response = request.send().await.context("calendar request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("calendar answered {status}: {body}"));
        }

        let event: EventResponse = response
            .json()
            .await
            .context("calendar response is not an event")?;
        Ok(event.into_event())
    }
}

#[async_trait]
impl CalendarSync for GoogleCalendarSync {
    async fn create_event(&self, payload: &CalendarPayload) -> Option<CalendarEvent> {
        let request = self.authorized(
            self.client
                .post(self.events_url())
                .query(&[("conferenceDataVersion", "1")])
                .json(&self.event_body(payload)),
        )?;

        match self.send_event(request).await {
            Ok(Some(event)) => {
                info!("calendar event {} created for {}", event.id, payload.client_name);
                Some(event)
            }
            Ok(None) => {
                warn!("calendar returned an event without id");
                None
            }
            Err(e) => {
                warn!("cannot create calendar event: {e:#}");
                None
            }
        }
    }

    async fn update_event(
        &self,
        event_id: &str,
        payload: &CalendarPayload,
    ) -> Option<CalendarEvent> {
        let request = self.authorized(
            self.client
                .patch(format!("{}/{event_id}", self.events_url()))
                .query(&[("conferenceDataVersion", "1")])
                .json(&self.event_body(payload)),
        )?;

        match self.send_event(request).await {
            Ok(event) => event,
            Err(e) => {
                warn!("cannot update calendar event {event_id}: {e:#}");
                None
            }
        }
    }

    async fn delete_event(&self, event_id: &str) -> bool {
        let Some(request) =
            self.authorized(self.client.delete(format!("{}/{event_id}", self.events_url())))
        else {
            return false;
        };

        match request.send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!("cannot delete calendar event {event_id}: {}", response.status());
                false
            }
            Err(e) => {
                warn!("cannot delete calendar event {event_id}: {e}");
                false
            }
        }
    }

    async fn is_free(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        let Some(request) = self.authorized(self.client.get(self.events_url()).query(&[
            ("timeMin", start.to_rfc3339()),
            ("timeMax", end.to_rfc3339()),
            ("singleEvents", "true".to_owned()),
        ])) else {
            return true;
        };

        let result = async {
            let response = request.send().await?.error_for_status()?;
            response.json::<EventList>().await
        }
        .await;

        match result {
            Ok(list) => !list.items.iter().any(ListedEvent::blocks_time),
            Err(e) => {
                warn!("cannot check calendar availability: {e}");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sync() -> GoogleCalendarSync {
        let settings = Settings::defaults();
        GoogleCalendarSync::new(
            settings.calendar,
            settings.business_offset,
            settings.store_address,
        )
    }

    fn payload(appointment_type: AppointmentType) -> CalendarPayload {
        let starts_at = Utc.with_ymd_and_hms(2025, 10, 16, 13, 0, 0).unwrap();
        CalendarPayload {
            client_name: "João".to_owned(),
            client_phone: "5583999990000".to_owned(),
            appointment_type,
            starts_at,
            ends_at: starts_at + chrono::Duration::hours(1),
        }
    }

    #[test]
    fn test_online_event_requests_meeting() {
        let body = sync().event_body(&payload(AppointmentType::Online));
        assert_eq!(body.summary, "Atendimento - Reunião Online | João");
        assert!(body.conference_data.is_some());
        assert_eq!(body.start.date_time, "2025-10-16T10:00:00-03:00");
        assert!(!body.description.contains("Endereço"));
    }

    #[test]
    fn test_in_store_event_has_address() {
        let body = sync().event_body(&payload(AppointmentType::InStore));
        assert_eq!(body.summary, "Atendimento - Visita à Loja | João");
        assert!(body.conference_data.is_none());
        assert!(body.description.contains("Endereço: Av. Almirante Barroso"));
    }

    #[tokio::test]
    async fn test_unconfigured_calendar_degrades() {
        let sync = sync();
        let payload = payload(AppointmentType::Online);
        assert!(sync.create_event(&payload).await.is_none());
        assert!(sync.update_event("evt", &payload).await.is_none());
        assert!(!sync.delete_event("evt").await);
        assert!(sync.is_free(payload.starts_at, payload.ends_at).await);
    }
}
