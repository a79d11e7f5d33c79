//! Calendar client tests against a mock Google Calendar API

use chat_appointment_scheduler::core::calendar::{CalendarPayload, GoogleCalendarSync};
use chat_appointment_scheduler::core::traits::CalendarSync;
use chat_appointment_scheduler::infrastructure::entities::AppointmentType;
use chat_appointment_scheduler::infrastructure::settings::CalendarSettings;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const EVENTS: &str = "/calendars/primary/events";
const ADDRESS: &str = "Rua das Flores, 10";

fn calendar(server: &MockServer) -> GoogleCalendarSync {
    GoogleCalendarSync::new(
        CalendarSettings {
            base_url: server.uri(),
            access_token: Some("token".to_owned()),
            calendar_id: "primary".to_owned(),
            timeout: Duration::from_secs(2),
        },
        FixedOffset::west_opt(3 * 3600).unwrap(),
        ADDRESS.to_owned(),
    )
}

fn at(hour: u32) -> DateTime<Utc> {
    FixedOffset::west_opt(3 * 3600)
        .unwrap()
        .with_ymd_and_hms(2025, 10, 14, hour, 0, 0)
        .unwrap()
        .with_timezone(&Utc)
}

fn payload(appointment_type: AppointmentType) -> CalendarPayload {
    CalendarPayload {
        client_name: "João".to_owned(),
        client_phone: "5583911112222".to_owned(),
        appointment_type,
        starts_at: at(10),
        ends_at: at(11),
    }
}

#[tokio::test]
async fn test_online_event_requests_meeting() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(EVENTS))
        .and(query_param("conferenceDataVersion", "1"))
        .and(header("authorization", "Bearer token"))
        .and(body_partial_json(json!({
            "summary": "Atendimento - Reunião Online | João",
            "start": { "dateTime": "2025-10-14T10:00:00-03:00" },
            "end": { "dateTime": "2025-10-14T11:00:00-03:00" },
            "conferenceData": { "createRequest": { "conferenceSolutionKey": { "type": "hangoutsMeet" } } },
            "extendedProperties": { "private": { "appointmentType": "ONLINE" } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "evt-online",
            "hangoutLink": "https://meet.google.com/abc-defg-hij"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let event = calendar(&server)
        .create_event(&payload(AppointmentType::Online))
        .await
        .unwrap();
    assert_eq!(event.id, "evt-online");
    assert_eq!(
        event.meeting_link.as_deref(),
        Some("https://meet.google.com/abc-defg-hij")
    );
}

#[tokio::test]
async fn test_meeting_link_from_entry_points() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(EVENTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "evt-2",
            "conferenceData": {
                "entryPoints": [
                    { "entryPointType": "phone", "uri": "tel:+55-11-0000" },
                    { "entryPointType": "video", "uri": "https://meet.google.com/xyz" }
                ]
            }
        })))
        .mount(&server)
        .await;

    let event = calendar(&server)
        .create_event(&payload(AppointmentType::Online))
        .await
        .unwrap();
    assert_eq!(event.meeting_link.as_deref(), Some("https://meet.google.com/xyz"));
}

#[tokio::test]
async fn test_in_store_event_carries_address() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(EVENTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "evt-store" })))
        .expect(1)
        .mount(&server)
        .await;

    let event = calendar(&server)
        .create_event(&payload(AppointmentType::InStore))
        .await
        .unwrap();
    assert_eq!(event.id, "evt-store");
    assert!(event.meeting_link.is_none());

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["summary"], "Atendimento - Visita à Loja | João");
    assert!(body["description"].as_str().unwrap().contains(ADDRESS));
    assert!(body.get("conferenceData").is_none());
}

#[tokio::test]
async fn test_create_failure_yields_none() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    assert!(
        calendar(&server)
            .create_event(&payload(AppointmentType::Online))
            .await
            .is_none()
    );
}

#[tokio::test]
async fn test_update_and_delete() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path(format!("{EVENTS}/evt-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "evt-1" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("{EVENTS}/evt-1")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("{EVENTS}/gone")))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let calendar = calendar(&server);
    let updated = calendar
        .update_event("evt-1", &payload(AppointmentType::InStore))
        .await
        .unwrap();
    assert_eq!(updated.id, "evt-1");
    assert!(calendar.delete_event("evt-1").await);
    assert!(!calendar.delete_event("gone").await);
}

#[tokio::test]
async fn test_availability_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(EVENTS))
        .and(query_param("singleEvents", "true"))
        .and(query_param("timeMin", at(10).to_rfc3339()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [ { "id": "x" } ] })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(EVENTS))
        .and(query_param("timeMin", at(14).to_rfc3339()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(EVENTS))
        .and(query_param("timeMin", at(16).to_rfc3339()))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let calendar = calendar(&server);
    assert!(!calendar.is_free(at(10), at(11)).await);
    assert!(calendar.is_free(at(14), at(15)).await);
    // errors count as free
    assert!(calendar.is_free(at(16), at(17)).await);
}

#[tokio::test]
async fn test_transparent_events_do_not_block() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(EVENTS))
        .and(query_param("timeMin", at(9).to_rfc3339()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                { "id": "lunch", "transparency": "transparent" },
                { "id": "old", "status": "cancelled" }
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(EVENTS))
        .and(query_param("timeMin", at(13).to_rfc3339()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                { "id": "reminder", "transparency": "transparent" },
                { "id": "visit", "transparency": "opaque", "status": "confirmed" }
            ]
        })))
        .mount(&server)
        .await;

    let calendar = calendar(&server);
    assert!(calendar.is_free(at(9), at(10)).await);
    assert!(!calendar.is_free(at(13), at(14)).await);
}
