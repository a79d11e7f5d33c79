//! Language service client tests against a mock OpenAI-compatible server

use chat_appointment_scheduler::core::interpreter::{
    Confirmation, FALLBACK_REPLY, Intent, LlmInterpreter,
};
use chat_appointment_scheduler::core::traits::LanguageInterpreter;
use chat_appointment_scheduler::infrastructure::entities::{
    AppointmentType, ConversationMessage, ConversationSession, MessageRole, SessionWithHistory,
};
use chat_appointment_scheduler::infrastructure::settings::LlmSettings;
use chrono::Utc;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(base_url: &str, api_key: Option<&str>) -> LlmSettings {
    LlmSettings {
        base_url: base_url.to_owned(),
        api_key: api_key.map(str::to_owned),
        model: "test-model".to_owned(),
        timeout: Duration::from_secs(2),
    }
}

fn session() -> SessionWithHistory {
    let session = ConversationSession::new("5583900000000", Utc::now());
    let messages = vec![ConversationMessage {
        id: Uuid::new_v4(),
        session_id: session.id,
        role: MessageRole::User,
        content: "oi".to_owned(),
        created_at: Utc::now(),
    }];
    SessionWithHistory { session, messages }
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [
            { "index": 0, "message": { "role": "assistant", "content": content }, "finish_reason": "stop" }
        ]
    })
}

#[tokio::test]
async fn test_interpretation_from_completion() {
    let server = MockServer::start().await;
    let content = json!({
        "reply": "Perfeito, João! Confirma online amanhã às 10h?",
        "intent": "SCHEDULE_APPOINTMENT",
        "slots": {
            "clientName": "João",
            "appointmentType": "ONLINE",
            "appointmentDate": "amanhã",
            "appointmentTime": "10h",
            "confirmation": "sim"
        }
    })
    .to_string();

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer secret"))
        .and(body_partial_json(json!({
            "model": "test-model",
            "response_format": { "type": "json_object" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(&content)))
        .expect(1)
        .mount(&server)
        .await;

    let interpreter = LlmInterpreter::new(settings(&server.uri(), Some("secret")));
    let interpretation = interpreter.interpret(&session(), "amanhã 10h online").await;

    assert_eq!(interpretation.intent, Intent::ScheduleAppointment);
    assert_eq!(interpretation.slots.client_name.as_deref(), Some("João"));
    assert_eq!(
        interpretation.slots.appointment_type,
        Some(AppointmentType::Online)
    );
    assert_eq!(interpretation.slots.confirmation, Some(Confirmation::Yes));
    assert!(interpretation.reply.starts_with("Perfeito"));
}

#[tokio::test]
async fn test_fenced_completion_is_accepted() {
    let server = MockServer::start().await;
    let content = "```json\n{\"reply\":\"Até logo!\",\"intent\":\"GOODBYE\",\"slots\":{}}\n```";

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(content)))
        .mount(&server)
        .await;

    let interpreter = LlmInterpreter::new(settings(&server.uri(), Some("secret")));
    let interpretation = interpreter.interpret(&session(), "tchau").await;
    assert_eq!(interpretation.intent, Intent::Goodbye);
    assert_eq!(interpretation.reply, "Até logo!");
}

#[tokio::test]
async fn test_server_error_falls_back() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let interpreter = LlmInterpreter::new(settings(&server.uri(), Some("secret")));
    let interpretation = interpreter.interpret(&session(), "oi").await;
    assert_eq!(interpretation.intent, Intent::SmallTalk);
    assert_eq!(interpretation.reply, FALLBACK_REPLY);
}

#[tokio::test]
async fn test_garbage_completion_falls_back() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("isso não é json")))
        .mount(&server)
        .await;

    let interpreter = LlmInterpreter::new(settings(&server.uri(), Some("secret")));
    let interpretation = interpreter.interpret(&session(), "oi").await;
    assert_eq!(interpretation.intent, Intent::SmallTalk);
    assert!(interpretation.slots.client_name.is_none());
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("{}"))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let interpreter = LlmInterpreter::new(settings(&server.uri(), Some("secret")));
    let interpretation = interpreter.interpret(&session(), "oi").await;
    assert_eq!(interpretation.reply, FALLBACK_REPLY);
}

#[tokio::test]
async fn test_missing_api_key_skips_the_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("{}")))
        .expect(0)
        .mount(&server)
        .await;

    let interpreter = LlmInterpreter::new(settings(&server.uri(), None));
    let interpretation = interpreter.interpret(&session(), "oi").await;
    assert_eq!(interpretation.reply, FALLBACK_REPLY);
}
