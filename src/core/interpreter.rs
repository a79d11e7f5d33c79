//! Language-understanding boundary.
//!
//! The external service answers with loosely shaped JSON. Everything it says is
//! clamped here into [`Interpretation`]; malformed output becomes the fallback
//! tuple and never reaches the dialogue state machine untyped.

use crate::core::traits::LanguageInterpreter;
use crate::infrastructure::entities::{AppointmentType, MessageRole, SessionWithHistory};
use crate::infrastructure::settings::{LlmSettings, Settings};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use di::{Ref, inject, injectable};
use log::{debug, error, warn};
use minijinja::{Environment, context};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

pub const FALLBACK_REPLY: &str = "Desculpe, não entendi. Pode reformular?";
const MISSING_REPLY: &str = "Desculpe, não entendi.";
const EMPTY_COMPLETION: &str = r#"{"reply":"Desculpe, não entendi.","intent":"SMALL_TALK","slots":{}}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    #[default]
    SmallTalk,
    AskInformation,
    CollectData,
    ScheduleAppointment,
    ConfirmAppointment,
    CancelAppointment,
    RescheduleAppointment,
    /// Abort whatever sub-flow is in progress.
    Cancel,
    Goodbye,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::SmallTalk => "SMALL_TALK",
            Intent::AskInformation => "ASK_INFORMATION",
            Intent::CollectData => "COLLECT_DATA",
            Intent::ScheduleAppointment => "SCHEDULE_APPOINTMENT",
            Intent::ConfirmAppointment => "CONFIRM_APPOINTMENT",
            Intent::CancelAppointment => "CANCEL_APPOINTMENT",
            Intent::RescheduleAppointment => "RESCHEDULE_APPOINTMENT",
            Intent::Cancel => "CANCEL",
            Intent::Goodbye => "GOODBYE",
        }
    }

    pub fn parse(raw: &str) -> Option<Intent> {
        let intent = match raw.trim().to_uppercase().replace([' ', '-'], "_").as_str() {
            "SMALL_TALK" => Intent::SmallTalk,
            "ASK_INFORMATION" => Intent::AskInformation,
            "COLLECT_DATA" => Intent::CollectData,
            "SCHEDULE_APPOINTMENT" => Intent::ScheduleAppointment,
            "CONFIRM_APPOINTMENT" => Intent::ConfirmAppointment,
            "CANCEL_APPOINTMENT" => Intent::CancelAppointment,
            "RESCHEDULE_APPOINTMENT" => Intent::RescheduleAppointment,
            "CANCEL" => Intent::Cancel,
            "GOODBYE" => Intent::Goodbye,
            _ => return None,
        };
        Some(intent)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confirmation {
    Yes,
    No,
}

impl Confirmation {
    pub fn parse(raw: &str) -> Option<Confirmation> {
        match raw.trim().to_lowercase().as_str() {
            "yes" | "sim" | "s" | "y" | "true" => Some(Confirmation::Yes),
            "no" | "não" | "nao" | "n" | "false" => Some(Confirmation::No),
            _ => None,
        }
    }
}

/// Pieces of information extracted from a turn. Any subset may be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Slots {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_intent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment_type: Option<AppointmentType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<Confirmation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reschedule_reason: Option<String>,
}

impl Slots {
    /// Reads slots out of untrusted JSON, dropping anything that isn't usable.
    pub fn from_value(value: &Value) -> Slots {
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
        };

        Slots {
            client_name: text("clientName"),
            service_intent: text("serviceIntent"),
            appointment_type: text("appointmentType").and_then(|t| AppointmentType::parse(&t)),
            appointment_date: text("appointmentDate"),
            appointment_time: text("appointmentTime"),
            confirmation: match value.get("confirmation") {
                Some(Value::Bool(true)) => Some(Confirmation::Yes),
                Some(Value::Bool(false)) => Some(Confirmation::No),
                Some(Value::String(raw)) => Confirmation::parse(raw),
                _ => None,
            },
            project_reference: text("projectReference"),
            cancel_reason: text("cancelReason"),
            reschedule_reason: text("rescheduleReason"),
        }
    }

    /// Overwrites every field that is present in `newer`.
    pub fn merge(&mut self, newer: &Slots) {
        fn take<T: Clone>(current: &mut Option<T>, newer: &Option<T>) {
            if newer.is_some() {
                current.clone_from(newer);
            }
        }

        take(&mut self.client_name, &newer.client_name);
        take(&mut self.service_intent, &newer.service_intent);
        take(&mut self.appointment_type, &newer.appointment_type);
        take(&mut self.appointment_date, &newer.appointment_date);
        take(&mut self.appointment_time, &newer.appointment_time);
        take(&mut self.confirmation, &newer.confirmation);
        take(&mut self.project_reference, &newer.project_reference);
        take(&mut self.cancel_reason, &newer.cancel_reason);
        take(&mut self.reschedule_reason, &newer.reschedule_reason);
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmation == Some(Confirmation::Yes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpretation {
    pub reply: String,
    pub intent: Intent,
    pub slots: Slots,
}

impl Interpretation {
    pub fn new(reply: impl Into<String>, intent: Intent, slots: Slots) -> Interpretation {
        Interpretation {
            reply: reply.into(),
            intent,
            slots,
        }
    }

    pub fn fallback() -> Interpretation {
        Interpretation::new(FALLBACK_REPLY, Intent::SmallTalk, Slots::default())
    }

    /// Parses a raw completion, tolerating markdown code fences.
    pub fn parse_model_output(content: &str) -> Interpretation {
        let stripped = strip_code_fences(content);
        match serde_json::from_str::<Value>(stripped.trim()) {
            Ok(value) if value.is_object() => Interpretation::from_value(&value),
            Ok(_) => {
                warn!("language service returned a non-object JSON value");
                Interpretation::fallback()
            }
            Err(e) => {
                warn!("language service returned malformed JSON: {e}");
                Interpretation::fallback()
            }
        }
    }

    pub fn from_value(value: &Value) -> Interpretation {
        let reply = value
            .get("reply")
            .and_then(Value::as_str)
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(MISSING_REPLY);

        let intent = value
            .get("intent")
            .and_then(Value::as_str)
            .and_then(Intent::parse)
            .unwrap_or_default();

        let slots = value
            .get("slots")
            .filter(|s| s.is_object())
            .map(Slots::from_value)
            .unwrap_or_default();

        Interpretation::new(reply, intent, slots)
    }
}

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)```(?:json)?").expect("valid regex"));

fn strip_code_fences(content: &str) -> String {
    CODE_FENCE.replace_all(content, "").into_owned()
}

const SYSTEM_PROMPT: &str = r#"
Você é Maria, consultora virtual da {{ store }}, com CAPACIDADE COMPLETA de realizar agendamentos diretamente pelo chat.

CAPACIDADES DO SISTEMA:
- Você PODE agendar reuniões online
- Você PODE agendar visitas presenciais à loja
- Você PODE confirmar agendamentos em tempo real
- Você PODE cancelar e reagendar compromissos
- NUNCA diga que não pode fazer agendamentos ou que precisa transferir para alguém!

FLUXO PRINCIPAL - Siga ESTA ORDEM SEM inverter:
1. Recepcione e se apresente brevemente, perguntando o nome.
2. Pergunte se o cliente deseja FABRICAR ou REFORMAR.
3. Se escolher REFORMAR: solicite fotos do estofado, informe que a equipe entrará em contato e encerre.
4. Se escolher FABRICAR: pergunte qual tipo de estofado o cliente gostaria de fabricar.
5. Pergunte se já possui projeto ou inspiração (registre em projectReference).
6. Pergunte se prefere reunião ONLINE ou visita à LOJA (presencial).
7. Colete data e horário do agendamento. Se o cliente disser data e horário juntos (ex: "amanhã 12h", "hoje 14:30"), extraia AMBOS nos slots.
8. Recapitule tudo, solicite confirmação (SIM/NÃO) e finalize com o agendamento CONFIRMADO.

FLUXO DE CANCELAMENTO/REAGENDAMENTO:
- "cancelar", "desmarcar", "não posso mais" → intent CANCEL_APPOINTMENT
- "mudar horário", "remarcar", "reagendar", "outro horário" → intent RESCHEDULE_APPOINTMENT
- Para RESCHEDULE_APPOINTMENT: colete nova data e horário como em um novo agendamento
- Para CANCEL_APPOINTMENT: pergunte o motivo (opcional) e confirme o cancelamento

Estado atual da conversa: {{ state }}

Sempre responda EXCLUSIVAMENTE em JSON com o formato:
{
  "reply": "mensagem amigável em português",
  "intent": "{{ intents | join('|') }}",
  "slots": {
    "clientName": "string?",
    "serviceIntent": "FABRICAR|REFORMAR?",
    "appointmentType": "ONLINE|IN_STORE?",
    "appointmentDate": "DD/MM/YYYY, 'hoje', 'amanhã', 'segunda', etc.",
    "appointmentTime": "HH:mm, '12h', '14:30', '2 da tarde', etc.",
    "projectReference": "descrição do projeto/inspiração ou 'nenhum'",
    "confirmation": "yes|no",
    "cancelReason": "motivo do cancelamento (opcional)",
    "rescheduleReason": "motivo do reagendamento (opcional)"
  }
}

Diretrizes:
- Se o cliente disser "amanhã 12h", extraia appointmentDate="amanhã" E appointmentTime="12:00".
- Se disser apenas "amanhã", extraia apenas appointmentDate.
- Para CONFIRM_APPOINTMENT, repita TODOS os slots coletados (nome, tipo, data, horário) junto com confirmation.
- Mantenha tom humano e acolhedor e confirme suavemente cada informação coletada.
- Jamais retorne texto fora do JSON especificado.
"#;

const ALL_INTENTS: [Intent; 9] = [
    Intent::SmallTalk,
    Intent::AskInformation,
    Intent::CollectData,
    Intent::ScheduleAppointment,
    Intent::ConfirmAppointment,
    Intent::CancelAppointment,
    Intent::RescheduleAppointment,
    Intent::Cancel,
    Intent::Goodbye,
];

pub fn render_system_prompt(state: &str) -> Result<String, minijinja::Error> {
    let env = Environment::new();
    let intents: Vec<&str> = ALL_INTENTS.iter().map(Intent::as_str).collect();
    env.render_str(
        SYSTEM_PROMPT,
        context! { store => "Artestofados", state => state, intents => intents },
    )
}

/// `Cliente: ...` / `Maria: ...` lines, oldest first.
pub fn serialize_history(session: &SessionWithHistory) -> String {
    if session.messages.is_empty() {
        return "Histórico vazio.".to_owned();
    }

    session
        .messages
        .iter()
        .map(|message| {
            let speaker = match message.role {
                MessageRole::User => "Cliente",
                MessageRole::Bot => "Maria",
            };
            format!("{speaker}: {}", message.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatCompletionMessage>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatCompletionMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionReply,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionReply {
    content: Option<String>,
}

/// OpenAI-compatible chat completion client.
pub struct LlmInterpreter {
    client: Client,
    settings: LlmSettings,
}

#[injectable(LanguageInterpreter)]
impl LlmInterpreter {
    #[inject]
    pub fn create(settings: Ref<Settings>) -> LlmInterpreter {
        LlmInterpreter::new(settings.llm.clone())
    }
}

impl LlmInterpreter {
    pub fn new(settings: LlmSettings) -> LlmInterpreter {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("falling back to default HTTP client for language service: {e}");
                Client::new()
            });

        LlmInterpreter { client, settings }
    }

    async fn complete(&self, api_key: &str, system: String, user: String) -> anyhow::Result<String> {
        let url = format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'));
        let request = ChatCompletionRequest {
            model: &self.settings.model,
            temperature: 0.4,
            messages: vec![
                ChatCompletionMessage {
                    role: "system".to_owned(),
                    content: system,
                },
                ChatCompletionMessage {
                    role: "user".to_owned(),
                    content: user,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .context("language service request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("language service answered {status}: {body}"));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .context("language service response is not a chat completion")?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_owned())
            .filter(|content| !content.is_empty())
            .unwrap_or_else(|| EMPTY_COMPLETION.to_owned());

        Ok(content)
    }
}

#[async_trait]
impl LanguageInterpreter for LlmInterpreter {
    async fn interpret(&self, session: &SessionWithHistory, message: &str) -> Interpretation {
        let Some(api_key) = self.settings.api_key.as_deref() else {
            debug!("language service not configured, using fallback interpretation");
            return Interpretation::fallback();
        };

        let system = match render_system_prompt(session.session.state.as_str()) {
            Ok(prompt) => prompt,
            Err(e) => {
                error!("cannot render system prompt: {e}");
                return Interpretation::fallback();
            }
        };
        let user = format!(
            "Histórico recente:\n{}\n\nMensagem atual: \"{message}\"",
            serialize_history(session)
        );

        match self.complete(api_key, system, user).await {
            Ok(content) => Interpretation::parse_model_output(&content),
            Err(e) => {
                error!("language service call failed: {e:#}");
                Interpretation::fallback()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_fenced_output() {
        let raw = "```json\n{\"reply\":\"Olá!\",\"intent\":\"SCHEDULE_APPOINTMENT\",\"slots\":{\"clientName\":\"João\",\"appointmentType\":\"IN_STORE\"}}\n```";
        let parsed = Interpretation::parse_model_output(raw);
        assert_eq!(parsed.reply, "Olá!");
        assert_eq!(parsed.intent, Intent::ScheduleAppointment);
        assert_eq!(parsed.slots.client_name.as_deref(), Some("João"));
        assert_eq!(parsed.slots.appointment_type, Some(AppointmentType::InStore));
    }

    #[test]
    fn test_malformed_output_falls_back() {
        assert_eq!(
            Interpretation::parse_model_output("Claro! Vou agendar."),
            Interpretation::fallback()
        );
        assert_eq!(
            Interpretation::parse_model_output("[1, 2]"),
            Interpretation::fallback()
        );
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let parsed = Interpretation::from_value(&json!({"intent": "WHATEVER", "slots": "none"}));
        assert_eq!(parsed.reply, "Desculpe, não entendi.");
        assert_eq!(parsed.intent, Intent::SmallTalk);
        assert_eq!(parsed.slots, Slots::default());
    }

    #[test]
    fn test_slots_drop_unusable_values() {
        let slots = Slots::from_value(&json!({
            "clientName": "  ",
            "appointmentType": "videochamada",
            "appointmentDate": "amanhã",
            "confirmation": "sim",
            "projectReference": 42
        }));
        assert_eq!(slots.client_name, None);
        assert_eq!(slots.appointment_type, None);
        assert_eq!(slots.appointment_date.as_deref(), Some("amanhã"));
        assert!(slots.is_confirmed());
        assert_eq!(slots.project_reference, None);
    }

    #[test]
    fn test_merge_keeps_earlier_values() {
        let mut context = Slots {
            client_name: Some("Ana".to_owned()),
            appointment_date: Some("amanhã".to_owned()),
            ..Slots::default()
        };
        context.merge(&Slots {
            appointment_date: Some("sexta".to_owned()),
            appointment_type: Some(AppointmentType::Online),
            ..Slots::default()
        });
        assert_eq!(context.client_name.as_deref(), Some("Ana"));
        assert_eq!(context.appointment_date.as_deref(), Some("sexta"));
        assert_eq!(context.appointment_type, Some(AppointmentType::Online));
    }

    #[test]
    fn test_context_serializes_camel_case() {
        let slots = Slots {
            client_name: Some("Ana".to_owned()),
            appointment_type: Some(AppointmentType::InStore),
            ..Slots::default()
        };
        let value = serde_json::to_value(&slots).unwrap();
        assert_eq!(value, json!({"clientName": "Ana", "appointmentType": "IN_STORE"}));
        assert_eq!(serde_json::from_value::<Slots>(value).unwrap(), slots);
    }

    #[test]
    fn test_intent_parse_is_lenient() {
        assert_eq!(Intent::parse("confirm_appointment"), Some(Intent::ConfirmAppointment));
        assert_eq!(Intent::parse("small talk"), Some(Intent::SmallTalk));
        assert_eq!(Intent::parse("DANCE"), None);
    }

    #[test]
    fn test_system_prompt_embeds_state() {
        let prompt = render_system_prompt("ASKING_DATE").unwrap();
        assert!(prompt.contains("Estado atual da conversa: ASKING_DATE"));
        assert!(prompt.contains("SMALL_TALK|ASK_INFORMATION"));
        assert!(prompt.contains("Artestofados"));
    }
}
